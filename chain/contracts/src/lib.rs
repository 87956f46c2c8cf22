//! Contract Logic for DAO Escrow Custody & Deal Settlement
//!
//! This crate implements the escrow + deal-execution engine: per-DAO escrows
//! tracking deposits and vesting entitlements keyed by `(module, deal)`, a
//! registry mapping DAO identity to its escrow and allow-listing deal
//! modules, and a token-swap module that validates a deal's funding matrix
//! and performs all-or-nothing multi-party settlement.
//!
//! # Modules
//! - `events`: Contract events emitted by state transitions
//! - `errors`: Contract-specific error types
//! - `ledger`: The external fungible-token transfer primitive interface
//! - `registry`: DAO → escrow map and deal-module allow-list
//! - `escrow`: Per-DAO deposit ledger and vesting entitlements
//! - `swap`: Deal data model, validation, and atomic settlement

pub mod errors;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod escrow;
pub mod swap;

/// Module ABI version — frozen after release
pub const MODULE_ABI_VERSION: &str = "1.0.0";
