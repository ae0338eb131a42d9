//! Node, material and element arenas together with the global DOF layout.

use log::{debug, info};
use nalgebra::{DVectorView, DVectorViewMut, Matrix3, Vector3};
use nalgebra_sparse::pattern::SparsityPattern;

use crate::element::{
    Brick9Element, Brick9ReferenceGeometry, Brick9State, ElementHandle, ElementNodalMatrix, StrainFormulation,
    BRICK9_NUM_DOFS, BRICK9_NUM_SHAPE_FUNCTIONS,
};
use crate::error::{ConfigurationError, MeshError};
use crate::material::{Material, MaterialHandle};
use crate::node::{CurvatureNode, Node, NodeHandle, PositionNode};
use crate::solid::MaterialPointState;
use crate::sparse::sparsity_pattern_from_rows;

/// Local-to-global DOF tables, built once by [`Mesh::setup_initial`].
#[derive(Clone, Debug, PartialEq)]
pub struct DofMap {
    node_dofs: Vec<Vec<Option<usize>>>,
    element_dofs: Vec<[Option<usize>; BRICK9_NUM_DOFS]>,
    num_free_dofs: usize,
    pattern: SparsityPattern,
}

impl DofMap {
    pub fn num_free_dofs(&self) -> usize {
        self.num_free_dofs
    }

    /// Global indices of the scalar DOFs of a node, `None` for fixed DOFs.
    pub fn node_dofs(&self, node: NodeHandle) -> &[Option<usize>] {
        &self.node_dofs[node.0]
    }

    /// Global indices of the local DOFs of an element, in local DOF order.
    pub fn element_dofs(&self, element_index: usize) -> &[Option<usize>; BRICK9_NUM_DOFS] {
        &self.element_dofs[element_index]
    }

    /// Sparsity pattern of global matrices over the free DOFs.
    pub fn sparsity_pattern(&self) -> &SparsityPattern {
        &self.pattern
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    nodes: Vec<Node>,
    curvature_owners: Vec<Option<usize>>,
    materials: Vec<Material>,
    elements: Vec<Brick9Element>,
    automatic_gravity: bool,
    dof_map: Option<DofMap>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set_up(&self) -> bool {
        self.dof_map.is_some()
    }

    fn ensure_not_set_up(&self) -> Result<(), ConfigurationError> {
        if self.is_set_up() {
            Err(ConfigurationError::AlreadySetUp)
        } else {
            Ok(())
        }
    }

    pub fn add_node(&mut self, position: Vector3<f64>, fixed: bool) -> Result<NodeHandle, ConfigurationError> {
        self.ensure_not_set_up()?;
        self.nodes.push(Node::Position(PositionNode::new(position, fixed)));
        self.curvature_owners.push(None);
        Ok(NodeHandle(self.nodes.len() - 1))
    }

    pub fn add_curvature_node(&mut self) -> Result<NodeHandle, ConfigurationError> {
        self.add_curvature_node_with(CurvatureNode::new())
    }

    /// Adds a curvature node with a prescribed (reference) curvature.
    pub fn add_curvature_node_with(&mut self, node: CurvatureNode) -> Result<NodeHandle, ConfigurationError> {
        self.ensure_not_set_up()?;
        self.nodes.push(Node::Curvature(node));
        self.curvature_owners.push(None);
        Ok(NodeHandle(self.nodes.len() - 1))
    }

    pub fn add_material(&mut self, material: Material) -> Result<MaterialHandle, ConfigurationError> {
        self.ensure_not_set_up()?;
        self.materials.push(material);
        Ok(MaterialHandle(self.materials.len() - 1))
    }

    pub fn add_element(&mut self, element: Brick9Element) -> Result<ElementHandle, ConfigurationError> {
        self.ensure_not_set_up()?;
        let index = self.elements.len();

        for &corner in element.corners() {
            self.expect_node_kind(corner, "position")?;
        }
        let curvature = element.curvature_node();
        self.expect_node_kind(curvature, "curvature")?;
        if let Some(owner) = self.curvature_owners[curvature.0] {
            return Err(ConfigurationError::SharedCurvatureNode {
                handle: curvature.0,
                element: owner,
            });
        }

        let material = element
            .material()
            .ok_or(ConfigurationError::MaterialUnset { element: index })?;
        if material.0 >= self.materials.len() {
            return Err(ConfigurationError::UnknownMaterial {
                handle: material.0,
                num_materials: self.materials.len(),
            });
        }

        let dimensions = element.dimensions();
        if !dimensions.iter().all(|d| d.is_finite() && *d > 0.0) {
            return Err(ConfigurationError::InvalidElement {
                element: index,
                reason: format!("dimensions must be positive, got {:?}", dimensions.as_slice()),
            });
        }

        let settings = element.settings();
        if !(settings.alpha_damping >= 0.0 && settings.alpha_damping.is_finite()) {
            return Err(ConfigurationError::InvalidElement {
                element: index,
                reason: format!("alpha_damping must be non-negative, got {}", settings.alpha_damping),
            });
        }
        if let Some(plasticity) = &settings.plasticity {
            if settings.strain != StrainFormulation::Hencky {
                return Err(ConfigurationError::PlasticityRequiresHencky { element: index });
            }
            plasticity
                .validate()
                .map_err(|reason| ConfigurationError::InvalidElement { element: index, reason })?;
        }

        self.curvature_owners[curvature.0] = Some(index);
        self.elements.push(element);
        Ok(ElementHandle(index))
    }

    fn expect_node_kind(&self, handle: NodeHandle, expected: &'static str) -> Result<&Node, ConfigurationError> {
        let node = self.node(handle)?;
        if node.kind_name() != expected {
            return Err(ConfigurationError::WrongNodeKind {
                handle: handle.0,
                expected,
                found: node.kind_name(),
            });
        }
        Ok(node)
    }

    pub fn node(&self, handle: NodeHandle) -> Result<&Node, ConfigurationError> {
        self.nodes.get(handle.0).ok_or(ConfigurationError::DanglingNode {
            handle: handle.0,
            num_nodes: self.nodes.len(),
        })
    }

    fn position_node_mut(&mut self, handle: NodeHandle) -> Result<&mut PositionNode, ConfigurationError> {
        let num_nodes = self.nodes.len();
        let node = self
            .nodes
            .get_mut(handle.0)
            .ok_or(ConfigurationError::DanglingNode {
                handle: handle.0,
                num_nodes,
            })?;
        let found = node.kind_name();
        node.as_position_mut().ok_or(ConfigurationError::WrongNodeKind {
            handle: handle.0,
            expected: "position",
            found,
        })
    }

    pub fn position_node(&self, handle: NodeHandle) -> Result<&PositionNode, ConfigurationError> {
        self.expect_node_kind(handle, "position")?
            .as_position()
            .ok_or(ConfigurationError::WrongNodeKind {
                handle: handle.0,
                expected: "position",
                found: "curvature",
            })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn material(&self, handle: MaterialHandle) -> Result<&Material, ConfigurationError> {
        self.materials.get(handle.0).ok_or(ConfigurationError::UnknownMaterial {
            handle: handle.0,
            num_materials: self.materials.len(),
        })
    }

    pub fn elements(&self) -> &[Brick9Element] {
        &self.elements
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn element(&self, handle: ElementHandle) -> Option<&Brick9Element> {
        self.elements.get(handle.0)
    }

    /// Material of an element, which is guaranteed to exist for elements in the mesh.
    pub fn element_material(&self, element_index: usize) -> Result<&Material, ConfigurationError> {
        let handle = self.elements[element_index]
            .material()
            .ok_or(ConfigurationError::MaterialUnset { element: element_index })?;
        self.material(handle)
    }

    /// Whether elements that do not compute their own gravity load receive one from the mesh.
    pub fn automatic_gravity(&self) -> bool {
        self.automatic_gravity
    }

    pub fn set_automatic_gravity(&mut self, enabled: bool) {
        self.automatic_gravity = enabled;
    }

    pub fn dof_map(&self) -> Option<&DofMap> {
        self.dof_map.as_ref()
    }

    pub fn require_dof_map(&self, operation: &'static str) -> Result<&DofMap, ConfigurationError> {
        self.dof_map.as_ref().ok_or(ConfigurationError::NotSetUp(operation))
    }

    pub fn num_free_dofs(&self) -> usize {
        self.dof_map.as_ref().map(DofMap::num_free_dofs).unwrap_or(0)
    }

    pub fn set_node_fixed(&mut self, handle: NodeHandle, fixed: bool) -> Result<(), ConfigurationError> {
        self.ensure_not_set_up()?;
        self.node(handle)?;
        self.nodes[handle.0].set_fixed(fixed);
        Ok(())
    }

    pub fn set_node_force(&mut self, handle: NodeHandle, force: Vector3<f64>) -> Result<(), ConfigurationError> {
        self.position_node_mut(handle)?.external_force = force;
        Ok(())
    }

    pub fn set_node_position(&mut self, handle: NodeHandle, position: Vector3<f64>) -> Result<(), ConfigurationError> {
        self.position_node_mut(handle)?.position = position;
        Ok(())
    }

    pub fn set_node_velocity(&mut self, handle: NodeHandle, velocity: Vector3<f64>) -> Result<(), ConfigurationError> {
        self.position_node_mut(handle)?.velocity = velocity;
        Ok(())
    }

    /// Reference nodal quantities of an element, one column per shape function.
    fn element_reference_positions(&self, element: &Brick9Element) -> ElementNodalMatrix {
        let mut reference = ElementNodalMatrix::zeros();
        for (k, corner) in element.corners().iter().enumerate() {
            if let Some(node) = self.nodes[corner.0].as_position() {
                reference.set_column(k, &node.reference_position);
            }
        }
        if let Some(node) = self.nodes[element.curvature_node().0].as_curvature() {
            reference
                .fixed_view_mut::<3, 3>(0, 8)
                .copy_from(&node.reference_curvature);
        }
        reference
    }

    /// Current nodal positions and velocities of an element.
    pub fn element_state(&self, element_index: usize) -> Brick9State {
        let element = &self.elements[element_index];
        let mut positions = ElementNodalMatrix::zeros();
        let mut velocities = ElementNodalMatrix::zeros();
        for (k, corner) in element.corners().iter().enumerate() {
            if let Some(node) = self.nodes[corner.0].as_position() {
                positions.set_column(k, &node.position);
                velocities.set_column(k, &node.velocity);
            }
        }
        if let Some(node) = self.nodes[element.curvature_node().0].as_curvature() {
            positions.fixed_view_mut::<3, 3>(0, 8).copy_from(&node.curvature);
            velocities
                .fixed_view_mut::<3, 3>(0, 8)
                .copy_from(&node.curvature_velocity);
        }
        Brick9State { positions, velocities }
    }

    /// Assigns the DOF layout, computes reference geometry and lumped masses and builds the
    /// sparsity pattern of the global matrices. Must be called exactly once.
    pub fn setup_initial(&mut self) -> Result<(), MeshError> {
        coarse_prof::profile!("mesh_setup_initial");
        self.ensure_not_set_up()?;
        if self.elements.is_empty() {
            return Err(ConfigurationError::NoElements.into());
        }

        // Compute everything fallible before touching the mesh
        let geometries = self
            .elements
            .iter()
            .enumerate()
            .map(|(index, element)| -> Result<Brick9ReferenceGeometry, MeshError> {
                let material = self.element_material(index)?;
                let reference = self.element_reference_positions(element);
                Ok(element.compute_reference_geometry(index, &reference, material)?)
            })
            .collect::<Result<Vec<Brick9ReferenceGeometry>, MeshError>>()?;

        let mut num_free_dofs = 0;
        let node_dofs: Vec<Vec<Option<usize>>> = self
            .nodes
            .iter()
            .map(|node| {
                (0..node.num_dofs())
                    .map(|_| {
                        if node.is_fixed() {
                            None
                        } else {
                            num_free_dofs += 1;
                            Some(num_free_dofs - 1)
                        }
                    })
                    .collect()
            })
            .collect();

        let element_dofs: Vec<[Option<usize>; BRICK9_NUM_DOFS]> = self
            .elements
            .iter()
            .map(|element| {
                let mut dofs = [None; BRICK9_NUM_DOFS];
                for k in 0..BRICK9_NUM_SHAPE_FUNCTIONS {
                    let (node, offset) = element.shape_function_node(k);
                    for i in 0..3 {
                        dofs[3 * k + i] = node_dofs[node.0][offset + i];
                    }
                }
                dofs
            })
            .collect();

        let mut rows = vec![Vec::new(); num_free_dofs];
        for dofs in &element_dofs {
            let free: Vec<usize> = dofs.iter().flatten().copied().collect();
            for &row in &free {
                rows[row].extend_from_slice(&free);
            }
        }
        let pattern = sparsity_pattern_from_rows(num_free_dofs, rows);

        for node in &mut self.nodes {
            if let Node::Position(node) = node {
                node.mass = 0.0;
            }
        }
        for (element, geometry) in self.elements.iter_mut().zip(geometries) {
            for (k, corner) in element.corners().iter().enumerate() {
                if let Some(node) = self.nodes[corner.0].as_position_mut() {
                    node.mass += geometry.mass_moments[k];
                }
            }
            element.set_reference_geometry(geometry);
        }

        info!(
            "Mesh set up with {} nodes, {} elements and {} free DOFs ({} nonzeros in the global pattern)",
            self.nodes.len(),
            self.elements.len(),
            num_free_dofs,
            pattern.nnz()
        );

        self.dof_map = Some(DofMap {
            node_dofs,
            element_dofs,
            num_free_dofs,
            pattern,
        });
        Ok(())
    }

    /// Writes the current positions of all free DOFs into `x`.
    pub fn gather_positions_into(&self, x: DVectorViewMut<f64>) -> Result<(), ConfigurationError> {
        self.gather_into(x, Node::dof_value, "gathering positions")
    }

    pub fn gather_velocities_into(&self, v: DVectorViewMut<f64>) -> Result<(), ConfigurationError> {
        self.gather_into(v, Node::dof_velocity, "gathering velocities")
    }

    /// Externally applied nodal forces on the free DOFs, without body loads.
    pub fn gather_external_forces_into(&self, f: DVectorViewMut<f64>) -> Result<(), ConfigurationError> {
        self.gather_into(f, Node::dof_external_force, "gathering external forces")
    }

    fn gather_into(
        &self,
        mut target: DVectorViewMut<f64>,
        value: impl Fn(&Node, usize) -> f64,
        operation: &'static str,
    ) -> Result<(), ConfigurationError> {
        let dof_map = self.require_dof_map(operation)?;
        assert_eq!(target.len(), dof_map.num_free_dofs, "vector must have one entry per free DOF");
        for (node, dofs) in self.nodes.iter().zip(&dof_map.node_dofs) {
            for (i, dof) in dofs.iter().enumerate() {
                if let Some(dof) = dof {
                    target[*dof] = value(node, i);
                }
            }
        }
        Ok(())
    }

    /// Overwrites the positions of all free DOFs.
    pub fn scatter_positions(&mut self, x: DVectorView<f64>) -> Result<(), ConfigurationError> {
        self.scatter(x, Node::set_dof_value, "scattering positions")
    }

    pub fn scatter_velocities(&mut self, v: DVectorView<f64>) -> Result<(), ConfigurationError> {
        self.scatter(v, Node::set_dof_velocity, "scattering velocities")
    }

    fn scatter(
        &mut self,
        source: DVectorView<f64>,
        set_value: impl Fn(&mut Node, usize, f64),
        operation: &'static str,
    ) -> Result<(), ConfigurationError> {
        let dof_map = self
            .dof_map
            .as_ref()
            .ok_or(ConfigurationError::NotSetUp(operation))?;
        assert_eq!(source.len(), dof_map.num_free_dofs, "vector must have one entry per free DOF");
        for (node, dofs) in self.nodes.iter_mut().zip(&dof_map.node_dofs) {
            for (i, dof) in dofs.iter().enumerate() {
                if let Some(dof) = dof {
                    set_value(node, i, source[*dof]);
                }
            }
        }
        Ok(())
    }

    /// Accepts the material point states of a converged solve.
    pub fn commit_material_states(&mut self, states: &[Vec<MaterialPointState<f64>>]) {
        debug!("Committing material states of {} elements", states.len());
        for (element, element_states) in self.elements.iter_mut().zip(states) {
            element.commit_material_states(element_states);
        }
    }

    /// Curvature of the curvature node of an element, `None` for invalid handles.
    pub fn curvature(&self, handle: NodeHandle) -> Option<Matrix3<f64>> {
        self.nodes
            .get(handle.0)
            .and_then(Node::as_curvature)
            .map(|node| node.curvature)
    }
}
