//! Application services: the page loader and the service handle that wires
//! cache, invalidation and telemetry together.

pub mod error;
pub mod generator;
pub mod loader;
pub mod service;
