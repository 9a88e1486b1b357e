//! Core data models: dataset descriptors, tasks and outcomes.

mod descriptor;
mod outcome;
mod years;

pub use descriptor::*;
pub use outcome::*;
pub use years::*;
