// spacefn Event Handling
// Blocking event loop around the disambiguation engine

pub mod r#loop;

pub use r#loop::{run, EventLoopError, EventLoopResult, LoopExit};
