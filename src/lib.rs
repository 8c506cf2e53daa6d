pub mod collect;
pub mod config;
pub mod date;
pub mod extract;
pub mod fetch;
pub mod harness;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod range;
pub mod store;
