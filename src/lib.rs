//! coinlib - Core Library
//! Unified client for cryptocurrency exchange REST APIs

// Public modules
pub mod core;
pub mod exchanges;
pub mod signer;

// Re-exports
pub use core::{Config, Error, Exchange, ExchangeConfig, Result};
pub use exchanges::connect;
