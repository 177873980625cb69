//! Small dense linear algebra and running statistics.

mod dmat3;
pub mod linalg;
mod statistics;


pub use dmat3::DMat3;
pub use statistics::Statistics;
