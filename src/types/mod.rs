//! Type definitions

pub mod branch_config;
pub mod mapping;
pub mod processing_job;
pub mod staging;
pub mod upload;

pub use branch_config::*;
pub use mapping::*;
pub use processing_job::*;
pub use staging::*;
pub use upload::*;
