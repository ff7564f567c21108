pub mod api;
pub mod audit;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod multisig;
pub mod signing;

pub use error::TrustChainError;
