mod hht;

pub use hht::*;
