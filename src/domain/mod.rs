//! Domain layer types shared by the cache, invalidation and performance layers.

pub mod broker;
pub mod error;
pub mod page;
