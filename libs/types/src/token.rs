//! Token reference type
//!
//! The original contracts pass a nullable token address where the null case
//! means the chain's native currency. Modeled here as an explicit enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fungible token reference: the native currency or an asset symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Token {
    /// The environment's native currency (deposited by value transfer)
    Native,
    /// A fungible asset identified by symbol (e.g. "TKA")
    Asset(String),
}

impl Token {
    /// Create an asset token from a symbol
    pub fn asset(symbol: impl Into<String>) -> Self {
        Self::Asset(symbol.into())
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Token::Native)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Native => write!(f, "NATIVE"),
            Token::Asset(symbol) => write!(f, "{}", symbol),
        }
    }
}
