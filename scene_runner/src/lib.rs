//! Benchmark scenes for the 9-node brick simulation and the tooling to run them.

pub mod meshes;
pub mod reference;
pub mod scenes;
