//! Execution and rendering of runnable node trees

pub mod node;
pub mod render;
pub mod tree;

pub use node::*;
pub use render::*;
pub use tree::*;
