//! Error types shared by the mesh, element and linear solver layers.
//!
//! Only unrecoverable conditions are errors. Convergence outcomes of the iterative solvers are
//! reported through status values on their result types.

use thiserror::Error;

/// Invalid use of the mesh or solver API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("node handle {handle} does not refer to a node in the mesh ({num_nodes} nodes)")]
    DanglingNode { handle: usize, num_nodes: usize },
    #[error("node {handle} is a {found} node, but a {expected} node was expected")]
    WrongNodeKind {
        handle: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("curvature node {handle} is already associated with element {element}")]
    SharedCurvatureNode { handle: usize, element: usize },
    #[error("material handle {handle} does not refer to a material in the mesh ({num_materials} materials)")]
    UnknownMaterial { handle: usize, num_materials: usize },
    #[error("element {element} has no material assigned")]
    MaterialUnset { element: usize },
    #[error("invalid material parameters: {0}")]
    InvalidMaterial(String),
    #[error("invalid element parameters for element {element}: {reason}")]
    InvalidElement { element: usize, reason: String },
    #[error("plasticity on element {element} requires the Hencky strain formulation")]
    PlasticityRequiresHencky { element: usize },
    #[error("the mesh has already been set up")]
    AlreadySetUp,
    #[error("cannot set up a mesh without elements")]
    NoElements,
    #[error("the mesh must be set up before {0}")]
    NotSetUp(&'static str),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Degenerate or inverted element geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error(
        "element {element} has a non-positive reference Jacobian determinant {determinant:e} \
         (inverted or degenerate node ordering)"
    )]
    NonPositiveJacobian { element: usize, determinant: f64 },
    #[error("element {element} is inverted (deformation gradient determinant {determinant:e})")]
    InvertedElement { element: usize, determinant: f64 },
    #[error("element {element} encountered non-finite nodal state or stress")]
    NonFiniteState { element: usize },
}

/// Errors raised by the Krylov solver and its preconditioners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinearSolverError {
    #[error("dimension mismatch: operator has {operator} rows, but vector has {vector} entries")]
    DimensionMismatch { operator: usize, vector: usize },
    #[error("diagonal matrix is not invertible (zero entry in row {row})")]
    SingularPreconditioner { row: usize },
    #[error("linear operator failed: {0}")]
    Operator(String),
}

/// Failures while setting up or evaluating a mesh.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
