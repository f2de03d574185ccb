pub mod batch;
pub mod checkpoint;
pub mod columns;
pub mod common;
pub mod constants;
pub mod input;
pub mod model;
pub mod normalize;
pub mod output;
pub mod projector;
pub mod registry;
pub mod strategy;
