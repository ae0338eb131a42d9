#![allow(clippy::excessive_precision)]
#![allow(clippy::too_many_arguments)]

/// Traits to model dynamic systems that can be integrated by this crate's integrators.
pub mod dynamic_system;
/// Implicit integration schemes for dynamic systems.
pub mod integrators;
