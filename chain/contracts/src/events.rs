//! Contract events
//!
//! Events are immutable records emitted by contract operations. Each
//! stateful component keeps an append-only event log; the enum wrapper
//! enables uniform handling across components.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{AccountId, DealId, ModuleId};
use types::numeric::BasisPoints;
use types::token::Token;

/// Escrow created for a DAO by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowCreated {
    pub dao: AccountId,
}

/// Deal module activated on the registry allow-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleActivated {
    pub module: ModuleId,
}

/// Deal module removed from the registry allow-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeactivated {
    pub module: ModuleId,
}

/// Funds deposited into an escrow, tagged to a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    pub module: ModuleId,
    pub deal: DealId,
    pub depositor: AccountId,
    pub index: usize,
    pub token: Token,
    pub amount: Decimal,
}

/// An unconsumed deposit withdrawn by its depositor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawn {
    pub module: ModuleId,
    pub deal: DealId,
    pub depositor: AccountId,
    pub index: usize,
    pub token: Token,
    pub amount: Decimal,
}

/// A vesting entry recorded in a destination escrow during settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingCreated {
    pub module: ModuleId,
    pub deal: DealId,
    pub dao: AccountId,
    pub token: Token,
    pub amount: Decimal,
    pub cliff: i64,
    pub duration: i64,
}

/// Vested funds released to the owning DAO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingClaimed {
    pub module: ModuleId,
    pub deal: DealId,
    pub dao: AccountId,
    pub token: Token,
    pub amount: Decimal,
}

/// Deal created in a swap module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSwapCreated {
    pub module: ModuleId,
    pub deal: DealId,
    pub metadata: String,
}

/// Deal settled atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSwapExecuted {
    pub module: ModuleId,
    pub deal: DealId,
    pub metadata: String,
}

/// Facilitation fee rate changed by the module owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeChanged {
    pub old: BasisPoints,
    pub new: BasisPoints,
}

/// Fee wallet changed by the module owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeWalletChanged {
    pub old: AccountId,
    pub new: AccountId,
}

/// Enum wrapper for all contract events, enabling uniform handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    EscrowCreated(EscrowCreated),
    ModuleActivated(ModuleActivated),
    ModuleDeactivated(ModuleDeactivated),
    Deposited(Deposited),
    Withdrawn(Withdrawn),
    VestingCreated(VestingCreated),
    VestingClaimed(VestingClaimed),
    TokenSwapCreated(TokenSwapCreated),
    TokenSwapExecuted(TokenSwapExecuted),
    FeeChanged(FeeChanged),
    FeeWalletChanged(FeeWalletChanged),
}
