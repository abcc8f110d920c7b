//! Application services layer: renderer pool and render pipeline.

pub mod engine;
pub mod error;
pub mod pool;
pub mod render;

#[cfg(test)]
pub(crate) mod testing;
