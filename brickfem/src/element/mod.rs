//! Finite elements.

mod brick9;

pub use brick9::*;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub(crate) usize);

impl ElementHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}
