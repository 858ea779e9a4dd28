#![forbid(unsafe_code)]

pub mod ir;

pub mod display;
pub mod graph;

pub use ir::*;
pub use display::*;
pub use graph::*;
