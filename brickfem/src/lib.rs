pub mod assembly;
pub mod element;
pub mod error;
pub mod material;
pub mod mesh;
pub mod minres;
pub mod node;
pub mod quadrature;
pub mod solid;
pub mod sparse;

#[cfg(feature = "proptest")]
pub mod proptest;

pub use element::{Brick9Element, Brick9Settings, ElementHandle, StrainFormulation};
pub use material::{Material, MaterialHandle};
pub use mesh::{DofMap, Mesh};
pub use node::{CurvatureNode, Node, NodeHandle, PositionNode};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
