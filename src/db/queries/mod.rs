//! Database queries

pub mod branch_config;
pub mod jobs;
pub mod reconcile;
pub mod staging;
pub mod summary;
