//! Core ETL (Extract, Transform, Load) abstractions
//!
//! This module provides the trait definitions the transform handler is built
//! from: read records out of an artifact, project them, write them back out.

mod extract;
mod load;
mod pipeline;
mod transform;

pub use extract::Extractor;
pub use load::Loader;
pub use pipeline::Pipeline;
pub use transform::Transformer;
