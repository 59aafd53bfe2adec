pub mod classifier;
pub mod codes;
pub mod config;
pub mod fixtures;
pub mod forest;
pub mod loader;
pub mod metrics;
pub mod mlp;
pub mod pipeline;
pub mod records;
pub mod rolling;
pub mod split;
