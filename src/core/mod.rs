//! Core business logic abstractions

pub mod cache;
pub mod config;
pub mod filters;
pub mod log;
pub mod models;
pub mod price;
pub mod summary;

// Re-export main types for cleaner imports
pub use price::{PriceProvider, PriceResult};
