//! Types library for the DAO deal engine
//!
//! This library provides the core type definitions shared across the deal
//! engine: identifier newtypes, the token/asset reference, and fixed-point
//! basis-point fractions.
//!
//! # Modules
//! - `ids`: Unique identifiers (AccountId, ModuleId, RegistryId, DealId)
//! - `token`: Token reference (native currency or fungible asset)
//! - `numeric`: Basis-point fraction type with validated range

// Public modules
pub mod ids;
pub mod numeric;
pub mod token;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::token::*;
}
