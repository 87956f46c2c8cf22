//! Token ledger — the external fungible-token transfer primitive
//!
//! The engine does not implement a token standard; it only needs an account
//! → token → balance view with checked transfers. `mint` stands in for
//! whatever funding mechanism exists outside the core (a faucet, a bridge,
//! an exchange payout).

use rust_decimal::Decimal;
use std::collections::HashMap;
use types::ids::AccountId;
use types::token::Token;

use crate::errors::LedgerError;

/// Balances per account and token, with overflow-protected mutation.
#[derive(Debug, Default, Clone)]
pub struct TokenLedger {
    /// Balances: account -> (token -> amount)
    balances: HashMap<AccountId, HashMap<Token, Decimal>>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit freshly issued funds to an account.
    pub fn mint(
        &mut self,
        account: AccountId,
        token: Token,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.credit(account, token, amount)
    }

    /// Get balance for a specific account and token.
    pub fn balance_of(&self, account: &AccountId, token: &Token) -> Decimal {
        self.balances
            .get(account)
            .and_then(|tokens| tokens.get(token))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Move `amount` from one account to another.
    ///
    /// Debits with underflow protection, credits with overflow protection.
    /// Fails without mutation on insufficient balance.
    pub fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        token: &Token,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let available = self.balance_of(&from, token);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                token: token.to_string(),
                required: amount.to_string(),
                available: available.to_string(),
            });
        }

        // Validate the credit side before touching either balance.
        let destination = self.balance_of(&to, token);
        let credited = destination
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        self.set_balance(from, token.clone(), available - amount);
        self.set_balance(to, token.clone(), credited);
        Ok(())
    }

    fn credit(
        &mut self,
        account: AccountId,
        token: Token,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let current = self.balance_of(&account, &token);
        let credited = current.checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.set_balance(account, token, credited);
        Ok(())
    }

    fn set_balance(&mut self, account: AccountId, token: Token, amount: Decimal) {
        self.balances
            .entry(account)
            .or_default()
            .insert(token, amount);
    }
}
