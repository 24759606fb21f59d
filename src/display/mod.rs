//! Terminal output: geometry tracking and the live renderer thread.

pub mod geometry;
pub mod renderer;
