//! Business logic services

pub mod normalizer;
pub mod reconcile;
pub mod upload;
pub mod worker;
