//! Nodes of the brick mesh.
//!
//! Nodes live in a flat arena owned by the mesh and are referred to by [`NodeHandle`].
//! Position nodes carry three scalar degrees of freedom, curvature nodes carry nine
//! (the vectors `r_xx`, `r_yy` and `r_zz`, in this order).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(pub(crate) usize);

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<NodeHandle> for usize {
    fn from(handle: NodeHandle) -> Self {
        handle.0
    }
}

/// A material point with a position, velocity and externally applied force.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionNode {
    pub reference_position: Vector3<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Lumped mass, accumulated from the elements during setup.
    pub mass: f64,
    pub fixed: bool,
    pub external_force: Vector3<f64>,
}

impl PositionNode {
    pub fn new(position: Vector3<f64>, fixed: bool) -> Self {
        Self {
            reference_position: position,
            position,
            velocity: Vector3::zeros(),
            mass: 0.0,
            fixed,
            external_force: Vector3::zeros(),
        }
    }
}

/// Element-local enhancement degrees of freedom.
///
/// The columns of `curvature` are `r_xx`, `r_yy` and `r_zz`, the second derivatives
/// of the position field along the element axes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvatureNode {
    pub reference_curvature: Matrix3<f64>,
    pub curvature: Matrix3<f64>,
    pub curvature_velocity: Matrix3<f64>,
    pub fixed: bool,
}

impl CurvatureNode {
    pub fn new() -> Self {
        Self::with_curvature(Matrix3::zeros())
    }

    pub fn with_curvature(curvature: Matrix3<f64>) -> Self {
        Self {
            reference_curvature: curvature,
            curvature,
            curvature_velocity: Matrix3::zeros(),
            fixed: false,
        }
    }
}

impl Default for CurvatureNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Position(PositionNode),
    Curvature(CurvatureNode),
}

impl Node {
    pub fn num_dofs(&self) -> usize {
        match self {
            Node::Position(_) => 3,
            Node::Curvature(_) => 9,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Position(_) => "position",
            Node::Curvature(_) => "curvature",
        }
    }

    pub fn is_fixed(&self) -> bool {
        match self {
            Node::Position(node) => node.fixed,
            Node::Curvature(node) => node.fixed,
        }
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        match self {
            Node::Position(node) => node.fixed = fixed,
            Node::Curvature(node) => node.fixed = fixed,
        }
    }

    pub fn as_position(&self) -> Option<&PositionNode> {
        match self {
            Node::Position(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_position_mut(&mut self) -> Option<&mut PositionNode> {
        match self {
            Node::Position(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_curvature(&self) -> Option<&CurvatureNode> {
        match self {
            Node::Curvature(node) => Some(node),
            _ => None,
        }
    }

    /// Current value of scalar DOF `i` of this node.
    pub fn dof_value(&self, i: usize) -> f64 {
        match self {
            Node::Position(node) => node.position[i],
            Node::Curvature(node) => node.curvature[(i % 3, i / 3)],
        }
    }

    pub fn dof_velocity(&self, i: usize) -> f64 {
        match self {
            Node::Position(node) => node.velocity[i],
            Node::Curvature(node) => node.curvature_velocity[(i % 3, i / 3)],
        }
    }

    pub fn set_dof_value(&mut self, i: usize, value: f64) {
        match self {
            Node::Position(node) => node.position[i] = value,
            Node::Curvature(node) => node.curvature[(i % 3, i / 3)] = value,
        }
    }

    pub fn set_dof_velocity(&mut self, i: usize, value: f64) {
        match self {
            Node::Position(node) => node.velocity[i] = value,
            Node::Curvature(node) => node.curvature_velocity[(i % 3, i / 3)] = value,
        }
    }

    /// Externally applied force on scalar DOF `i`. Curvature nodes never carry applied forces.
    pub fn dof_external_force(&self, i: usize) -> f64 {
        match self {
            Node::Position(node) => node.external_force[i],
            Node::Curvature(_) => 0.0,
        }
    }
}
