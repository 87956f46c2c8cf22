//! Per-DAO escrow: deposit ledger and vesting entitlements
//!
//! One escrow exists per DAO, created by the registry from a configured
//! template. All custody keys deposits and vesting entries by `(module,
//! deal)` so deals from different modules never collide. Funds are parked
//! on a dedicated holding account in the token ledger; the escrow's own
//! books (`tracked`) mirror what it has accounted for, which lets a DAO
//! sweep direct transfers into a deal via the register path.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use types::ids::{AccountId, DealRef, RegistryId};
use types::token::Token;

use crate::errors::{EscrowError, LedgerError};
use crate::events::{ContractEvent, Deposited, VestingClaimed, VestingCreated, Withdrawn};
use crate::ledger::TokenLedger;

/// A single deposit record. Append-only; `withdrawn` is the only mutable
/// field and flips one way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    pub depositor: AccountId,
    pub token: Token,
    pub amount: Decimal,
    pub deposited_at: i64,
    pub withdrawn: bool,
}

/// A vesting schedule recorded during settlement. Releases linearly
/// between the cliff and the end timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VestingEntry {
    pub token: Token,
    pub total: Decimal,
    pub claimed: Decimal,
    pub start: i64,
    pub cliff_at: i64,
    pub end_at: i64,
}

impl VestingEntry {
    /// Cumulative amount released at `now`: zero before the cliff, the
    /// full total at or after the end, linear in between. A zero-width
    /// window (duration not past the cliff) releases fully at the cliff.
    pub fn releasable(&self, now: i64) -> Decimal {
        if now < self.cliff_at {
            return Decimal::ZERO;
        }
        if now >= self.end_at || self.end_at <= self.cliff_at {
            return self.total;
        }
        let window = Decimal::from(self.end_at - self.cliff_at);
        let elapsed = Decimal::from(now - self.cliff_at);
        self.total * elapsed / window
    }

    /// Released but not yet claimed. Never negative: `claimed` only
    /// advances up to `releasable`, which is monotone in `now`.
    pub fn claimable(&self, now: i64) -> Decimal {
        self.releasable(now) - self.claimed
    }
}

/// Per-DAO escrow holding deposits and vesting entitlements.
///
/// Constructed once as an uninitialized template via [`DaoEscrow::template`],
/// then cloned and bound to a DAO by the registry. Every operation except
/// initialization requires the bound state.
#[derive(Debug, Clone, Default)]
pub struct DaoEscrow {
    /// Owning DAO; `None` until initialized
    dao: Option<AccountId>,
    /// Ledger account where escrowed funds sit
    holding: AccountId,
    /// Registry this escrow trusts for module authorization
    deal_manager: Option<RegistryId>,
    /// Deposits per deal, in arrival order
    deposits: BTreeMap<DealRef, Vec<Deposit>>,
    /// Vesting entries per deal
    vestings: BTreeMap<DealRef, Vec<VestingEntry>>,
    /// Per-token amount this escrow has accounted for on its holding account
    tracked: BTreeMap<Token, Decimal>,
    /// Deals whose deposits were consumed by settlement
    executed: HashSet<DealRef>,
    events: Vec<ContractEvent>,
}

impl DaoEscrow {
    /// An unbound escrow, suitable as the registry's implementation template.
    pub fn template() -> Self {
        Self::default()
    }

    /// Bind the escrow to a DAO and the registry that manages it. The
    /// holding account is regenerated so clones of the template never
    /// share custody.
    pub fn initialize(&mut self, dao: AccountId, registry: RegistryId) -> Result<(), EscrowError> {
        if self.dao.is_some() {
            return Err(EscrowError::AlreadyInitialized);
        }
        if dao.is_nil() {
            return Err(EscrowError::InvalidIdentity);
        }
        self.dao = Some(dao);
        self.deal_manager = Some(registry);
        self.holding = AccountId::new();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.dao.is_some()
    }

    pub fn dao(&self) -> Option<AccountId> {
        self.dao
    }

    /// The ledger account this escrow custodies funds on.
    pub fn holding_account(&self) -> AccountId {
        self.holding
    }

    pub fn deal_manager(&self) -> Option<RegistryId> {
        self.deal_manager
    }

    /// Re-point the escrow at a new registry. Only the owning DAO may do
    /// this; it is the migration path when a registry is replaced.
    pub fn set_deal_manager(
        &mut self,
        caller: AccountId,
        registry: RegistryId,
    ) -> Result<(), EscrowError> {
        let dao = self.owner()?;
        if caller != dao {
            return Err(EscrowError::NotAuthorized);
        }
        self.deal_manager = Some(registry);
        Ok(())
    }

    fn owner(&self) -> Result<AccountId, EscrowError> {
        self.dao.ok_or(EscrowError::NotInitialized)
    }

    // ---- deposits ----

    /// Deposit funds for a deal. Native deposits must declare exactly the
    /// value sent alongside the call; asset deposits pull from the caller's
    /// ledger balance. Returns the index of the new deposit record.
    pub fn deposit(
        &mut self,
        ledger: &mut TokenLedger,
        deal: DealRef,
        token: Token,
        amount: Decimal,
        caller: AccountId,
        sent_value: Decimal,
        now: i64,
    ) -> Result<usize, EscrowError> {
        self.owner()?;
        if amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount);
        }
        if token.is_native() && sent_value != amount {
            return Err(EscrowError::InvalidEthValue {
                sent: sent_value.to_string(),
                declared: amount.to_string(),
            });
        }
        // Tracked total must stay addable before funds move.
        self.tracked_after_credit(&token, amount)?;

        ledger.transfer(caller, self.holding, &token, amount)?;
        let index = self.record_deposit(deal, caller, token, amount, now);
        Ok(index)
    }

    /// Deposit several tokens for one deal in a single call. Validates
    /// everything up front so a failure leaves no partial state: array
    /// lengths, positive amounts, the declared native value, and that the
    /// caller can cover every token's summed amount.
    pub fn multiple_deposits(
        &mut self,
        ledger: &mut TokenLedger,
        deal: DealRef,
        tokens: &[Token],
        amounts: &[Decimal],
        caller: AccountId,
        sent_value: Decimal,
        now: i64,
    ) -> Result<Vec<usize>, EscrowError> {
        self.owner()?;
        if tokens.len() != amounts.len() {
            return Err(EscrowError::ArrayLengthMismatch {
                left: tokens.len(),
                right: amounts.len(),
            });
        }

        let mut native_total = Decimal::ZERO;
        let mut per_token: BTreeMap<&Token, Decimal> = BTreeMap::new();
        for (token, &amount) in tokens.iter().zip(amounts) {
            if amount <= Decimal::ZERO {
                return Err(EscrowError::InvalidAmount);
            }
            let sum = per_token.entry(token).or_insert(Decimal::ZERO);
            *sum = sum.checked_add(amount).ok_or(LedgerError::Overflow)?;
            if token.is_native() {
                native_total += amount;
            }
        }
        if native_total != sent_value {
            return Err(EscrowError::InvalidEthValue {
                sent: sent_value.to_string(),
                declared: native_total.to_string(),
            });
        }
        for (token, &required) in &per_token {
            let available = ledger.balance_of(&caller, token);
            if available < required {
                return Err(LedgerError::InsufficientBalance {
                    token: token.to_string(),
                    required: required.to_string(),
                    available: available.to_string(),
                }
                .into());
            }
            self.tracked_after_credit(token, required)?;
        }

        let mut indices = Vec::with_capacity(tokens.len());
        for (token, &amount) in tokens.iter().zip(amounts) {
            ledger.transfer(caller, self.holding, token, amount)?;
            indices.push(self.record_deposit(deal, caller, token.clone(), amount, now));
        }
        Ok(indices)
    }

    /// Sweep funds sent directly to the holding account into a deal. The
    /// swept amount is the gap between the holding account's ledger balance
    /// and what the escrow has already tracked; the record is credited to
    /// the DAO itself. Fails if there is nothing to sweep.
    pub fn register_deposit(
        &mut self,
        ledger: &TokenLedger,
        deal: DealRef,
        token: Token,
        now: i64,
    ) -> Result<usize, EscrowError> {
        let dao = self.owner()?;
        let delta = self.untracked_balance(ledger, &token);
        if delta <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount);
        }
        Ok(self.record_deposit(deal, dao, token, delta, now))
    }

    /// Batch form of [`register_deposit`](Self::register_deposit). All
    /// deltas are computed before any is recorded, so a token with nothing
    /// to sweep (including a repeated token) fails the whole call.
    pub fn register_deposits(
        &mut self,
        ledger: &TokenLedger,
        deal: DealRef,
        tokens: &[Token],
        now: i64,
    ) -> Result<Vec<usize>, EscrowError> {
        let dao = self.owner()?;

        let mut swept: BTreeMap<&Token, Decimal> = BTreeMap::new();
        let mut deltas = Vec::with_capacity(tokens.len());
        for token in tokens {
            let prior = swept.get(token).copied().unwrap_or(Decimal::ZERO);
            let delta = self.untracked_balance(ledger, token) - prior;
            if delta <= Decimal::ZERO {
                return Err(EscrowError::InvalidAmount);
            }
            swept.insert(token, prior + delta);
            deltas.push(delta);
        }

        let mut indices = Vec::with_capacity(tokens.len());
        for (token, delta) in tokens.iter().zip(deltas) {
            indices.push(self.record_deposit(deal, dao, token.clone(), delta, now));
        }
        Ok(indices)
    }

    /// Return an unconsumed deposit to its depositor. Only the original
    /// depositor may withdraw, and only while the deal has not executed.
    pub fn withdraw(
        &mut self,
        ledger: &mut TokenLedger,
        deal: DealRef,
        index: usize,
        caller: AccountId,
    ) -> Result<(Token, Decimal), EscrowError> {
        self.owner()?;
        let executed = self.executed.contains(&deal);
        let count = self.deposit_slice(&deal).len();
        let records = self.deposits.get_mut(&deal);
        let record = records
            .and_then(|r| r.get_mut(index))
            .ok_or(EscrowError::InvalidDepositId { index, count })?;
        if record.depositor != caller {
            return Err(EscrowError::NotAuthorized);
        }
        if record.withdrawn || executed {
            return Err(EscrowError::NotWithdrawable);
        }

        let token = record.token.clone();
        let amount = record.amount;
        ledger.transfer(self.holding, caller, &token, amount)?;
        record.withdrawn = true;
        self.untrack(&token, amount);

        debug!(%deal, index, %token, %amount, "deposit withdrawn");
        self.events.push(ContractEvent::Withdrawn(Withdrawn {
            module: deal.module,
            deal: deal.deal,
            depositor: caller,
            index,
            token: token.clone(),
            amount,
        }));
        Ok((token, amount))
    }

    // ---- deposit views ----

    pub fn get_deposit(&self, deal: DealRef, index: usize) -> Result<&Deposit, EscrowError> {
        let records = self.deposit_slice(&deal);
        records.get(index).ok_or(EscrowError::InvalidDepositId {
            index,
            count: records.len(),
        })
    }

    /// Page through a deal's deposits. Out-of-range bounds clamp to the
    /// available records rather than erroring.
    pub fn get_deposit_range(&self, deal: DealRef, start: usize, count: usize) -> &[Deposit] {
        let records = self.deposit_slice(&deal);
        let from = start.min(records.len());
        let to = start.saturating_add(count).min(records.len());
        &records[from..to]
    }

    pub fn get_total_deposit_count(&self, deal: DealRef) -> usize {
        self.deposit_slice(&deal).len()
    }

    /// Sum of a deal's unconsumed deposits in one token. This is what the
    /// deal module checks funding against.
    pub fn get_available_deal_balance(&self, deal: DealRef, token: &Token) -> Decimal {
        self.deposit_slice(&deal)
            .iter()
            .filter(|d| !d.withdrawn && d.token == *token)
            .map(|d| d.amount)
            .sum()
    }

    /// What one depositor could still withdraw from a deal in one token.
    /// Zero once the deal has executed.
    pub fn get_withdrawable_amount_of_user(
        &self,
        deal: DealRef,
        user: AccountId,
        token: &Token,
    ) -> Decimal {
        if self.executed.contains(&deal) {
            return Decimal::ZERO;
        }
        self.deposit_slice(&deal)
            .iter()
            .filter(|d| !d.withdrawn && d.depositor == user && d.token == *token)
            .map(|d| d.amount)
            .sum()
    }

    // ---- vesting ----

    pub fn get_deal_vestings(&self, deal: DealRef) -> &[VestingEntry] {
        self.vestings.get(&deal).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Release everything currently claimable across all deals to the DAO.
    /// Permissionless: anyone may trigger the release, funds only ever go
    /// to the owning DAO. Returns the per-token totals paid out; an empty
    /// result is not an error.
    pub fn claim_vestings(
        &mut self,
        ledger: &mut TokenLedger,
        now: i64,
    ) -> Result<Vec<(Token, Decimal)>, EscrowError> {
        let deals: Vec<DealRef> = self.vestings.keys().copied().collect();
        self.claim_for_deals(ledger, &deals, now)
    }

    /// Release everything currently claimable for one deal to the DAO.
    pub fn claim_deal_vestings(
        &mut self,
        ledger: &mut TokenLedger,
        deal: DealRef,
        now: i64,
    ) -> Result<Vec<(Token, Decimal)>, EscrowError> {
        self.claim_for_deals(ledger, &[deal], now)
    }

    fn claim_for_deals(
        &mut self,
        ledger: &mut TokenLedger,
        deals: &[DealRef],
        now: i64,
    ) -> Result<Vec<(Token, Decimal)>, EscrowError> {
        let dao = self.owner()?;

        // Plan every claim before mutating anything.
        let mut planned: Vec<(DealRef, usize, Decimal)> = Vec::new();
        let mut per_deal_token: BTreeMap<(DealRef, Token), Decimal> = BTreeMap::new();
        let mut totals: BTreeMap<Token, Decimal> = BTreeMap::new();
        for &deal in deals {
            let entries = self.vestings.get(&deal).map(Vec::as_slice).unwrap_or(&[]);
            for (i, entry) in entries.iter().enumerate() {
                let claim = entry.claimable(now);
                if claim <= Decimal::ZERO {
                    continue;
                }
                planned.push((deal, i, claim));
                *per_deal_token
                    .entry((deal, entry.token.clone()))
                    .or_insert(Decimal::ZERO) += claim;
                *totals.entry(entry.token.clone()).or_insert(Decimal::ZERO) += claim;
            }
        }
        // The credit side must stay addable before any entry advances.
        for (token, &total) in &totals {
            ledger
                .balance_of(&dao, token)
                .checked_add(total)
                .ok_or(LedgerError::Overflow)?;
        }

        for (deal, i, claim) in planned {
            // Indices were taken from the same map moments ago.
            if let Some(entry) = self.vestings.get_mut(&deal).and_then(|v| v.get_mut(i)) {
                entry.claimed += claim;
            }
        }
        for (token, &total) in &totals {
            ledger.transfer(self.holding, dao, token, total)?;
            self.untrack(token, total);
        }
        for ((deal, token), amount) in per_deal_token {
            info!(%deal, %token, %amount, "vesting claimed");
            self.events.push(ContractEvent::VestingClaimed(VestingClaimed {
                module: deal.module,
                deal: deal.deal,
                dao,
                token,
                amount,
            }));
        }
        Ok(totals.into_iter().collect())
    }

    // ---- module-facing operations ----
    //
    // Reachable only through the registry's authorization seam; callers
    // outside this crate go through `DealRegistry::escrow_for_module`.

    /// Move deal funds to a module's transient account for settlement.
    /// Consumes deposit records oldest-first; a partially consumed record
    /// is marked withdrawn and its surplus becomes sweepable again via the
    /// register path.
    pub(crate) fn send_to_module(
        &mut self,
        ledger: &mut TokenLedger,
        deal: DealRef,
        token: &Token,
        amount: Decimal,
        module_account: AccountId,
    ) -> Result<(), EscrowError> {
        self.owner()?;
        let available = self.get_available_deal_balance(deal, token);
        if available < amount {
            return Err(EscrowError::InsufficientDealBalance {
                token: token.to_string(),
                required: amount.to_string(),
                available: available.to_string(),
            });
        }

        ledger.transfer(self.holding, module_account, token, amount)?;

        let mut remaining = amount;
        let mut consumed = Decimal::ZERO;
        if let Some(records) = self.deposits.get_mut(&deal) {
            for record in records.iter_mut() {
                if remaining <= Decimal::ZERO {
                    break;
                }
                if record.withdrawn || record.token != *token {
                    continue;
                }
                record.withdrawn = true;
                consumed += record.amount;
                remaining -= record.amount;
            }
        }
        // Untracking the full consumed total (not just `amount`) leaves any
        // surplus from a partially consumed record sweepable again.
        self.untrack(token, consumed);
        debug!(%deal, %token, %amount, "deal funds sent to module");
        Ok(())
    }

    /// Record a vesting entitlement for the owning DAO. The funds must
    /// already sit on the holding account; this accounts for them.
    pub(crate) fn create_vesting(
        &mut self,
        deal: DealRef,
        token: Token,
        amount: Decimal,
        cliff: i64,
        duration: i64,
        now: i64,
    ) -> Result<(), EscrowError> {
        let dao = self.owner()?;
        if amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount);
        }
        let cliff_at = now.checked_add(cliff).ok_or(EscrowError::InvalidAmount)?;
        let end_at = now.checked_add(duration).ok_or(EscrowError::InvalidAmount)?;
        let tracked = self.tracked_after_credit(&token, amount)?;
        self.tracked.insert(token.clone(), tracked);

        self.vestings.entry(deal).or_default().push(VestingEntry {
            token: token.clone(),
            total: amount,
            claimed: Decimal::ZERO,
            start: now,
            cliff_at,
            end_at,
        });
        info!(%deal, %token, %amount, cliff, duration, "vesting created");
        self.events.push(ContractEvent::VestingCreated(VestingCreated {
            module: deal.module,
            deal: deal.deal,
            dao,
            token,
            amount,
            cliff,
            duration,
        }));
        Ok(())
    }

    /// Freeze a deal's deposits after settlement. All records under the
    /// deal become non-withdrawable, consumed or not.
    pub(crate) fn mark_deal_executed(&mut self, deal: DealRef) {
        self.executed.insert(deal);
    }

    // ---- events ----

    pub fn events(&self) -> &[ContractEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ContractEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- internals ----

    fn deposit_slice(&self, deal: &DealRef) -> &[Deposit] {
        self.deposits.get(deal).map(Vec::as_slice).unwrap_or(&[])
    }

    fn record_deposit(
        &mut self,
        deal: DealRef,
        depositor: AccountId,
        token: Token,
        amount: Decimal,
        now: i64,
    ) -> usize {
        let tracked = self.tracked_amount(&token) + amount;
        self.tracked.insert(token.clone(), tracked);

        let records = self.deposits.entry(deal).or_default();
        let index = records.len();
        records.push(Deposit {
            depositor,
            token: token.clone(),
            amount,
            deposited_at: now,
            withdrawn: false,
        });
        debug!(%deal, index, %token, %amount, "deposit recorded");
        self.events.push(ContractEvent::Deposited(Deposited {
            module: deal.module,
            deal: deal.deal,
            depositor,
            index,
            token,
            amount,
        }));
        index
    }

    fn tracked_amount(&self, token: &Token) -> Decimal {
        self.tracked.get(token).copied().unwrap_or(Decimal::ZERO)
    }

    fn tracked_after_credit(&self, token: &Token, amount: Decimal) -> Result<Decimal, EscrowError> {
        self.tracked_amount(token)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow.into())
    }

    fn untrack(&mut self, token: &Token, amount: Decimal) {
        let remaining = self.tracked_amount(token) - amount;
        self.tracked.insert(token.clone(), remaining);
    }

    fn untracked_balance(&self, ledger: &TokenLedger, token: &Token) -> Decimal {
        ledger.balance_of(&self.holding, token) - self.tracked_amount(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{DealId, ModuleId};

    fn setup() -> (DaoEscrow, TokenLedger, AccountId, DealRef) {
        let dao = AccountId::new();
        let mut escrow = DaoEscrow::template();
        escrow.initialize(dao, RegistryId::new()).unwrap();
        let deal = DealRef::new(ModuleId::new(), DealId::FIRST);
        (escrow, TokenLedger::new(), dao, deal)
    }

    fn fund(ledger: &mut TokenLedger, account: AccountId, token: Token, amount: u64) {
        ledger.mint(account, token, Decimal::from(amount)).unwrap();
    }

    #[test]
    fn test_initialize_once() {
        let mut escrow = DaoEscrow::template();
        assert!(!escrow.is_initialized());
        escrow.initialize(AccountId::new(), RegistryId::new()).unwrap();
        assert!(escrow.is_initialized());

        let again = escrow.initialize(AccountId::new(), RegistryId::new());
        assert_eq!(again, Err(EscrowError::AlreadyInitialized));
    }

    #[test]
    fn test_initialize_rejects_nil_dao() {
        let mut escrow = DaoEscrow::template();
        let result = escrow.initialize(AccountId::nil(), RegistryId::new());
        assert_eq!(result, Err(EscrowError::InvalidIdentity));
    }

    #[test]
    fn test_uninitialized_escrow_rejects_deposits() {
        let mut escrow = DaoEscrow::template();
        let mut ledger = TokenLedger::new();
        let deal = DealRef::new(ModuleId::new(), DealId::FIRST);
        let result = escrow.deposit(
            &mut ledger,
            deal,
            Token::asset("TKA"),
            Decimal::ONE,
            AccountId::new(),
            Decimal::ZERO,
            0,
        );
        assert_eq!(result, Err(EscrowError::NotInitialized));
    }

    #[test]
    fn test_clones_get_distinct_holding_accounts() {
        let template = DaoEscrow::template();
        let mut a = template.clone();
        let mut b = template;
        a.initialize(AccountId::new(), RegistryId::new()).unwrap();
        b.initialize(AccountId::new(), RegistryId::new()).unwrap();
        assert_ne!(a.holding_account(), b.holding_account());
    }

    #[test]
    fn test_deposit_moves_funds_and_records() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);

        let index = escrow
            .deposit(
                &mut ledger,
                deal,
                Token::asset("TKA"),
                Decimal::from(6),
                depositor,
                Decimal::ZERO,
                100,
            )
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(
            ledger.balance_of(&escrow.holding_account(), &Token::asset("TKA")),
            Decimal::from(6)
        );
        let record = escrow.get_deposit(deal, 0).unwrap();
        assert_eq!(record.depositor, depositor);
        assert_eq!(record.amount, Decimal::from(6));
        assert_eq!(record.deposited_at, 100);
        assert!(!record.withdrawn);
        assert!(matches!(
            escrow.events().last(),
            Some(ContractEvent::Deposited(_))
        ));
    }

    #[test]
    fn test_deposit_rejects_nonpositive_amount() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        let result = escrow.deposit(
            &mut ledger,
            deal,
            Token::asset("TKA"),
            Decimal::ZERO,
            depositor,
            Decimal::ZERO,
            0,
        );
        assert_eq!(result, Err(EscrowError::InvalidAmount));
    }

    #[test]
    fn test_native_deposit_requires_matching_value() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::Native, 10);

        let mismatch = escrow.deposit(
            &mut ledger,
            deal,
            Token::Native,
            Decimal::from(5),
            depositor,
            Decimal::from(4),
            0,
        );
        assert!(matches!(mismatch, Err(EscrowError::InvalidEthValue { .. })));

        escrow
            .deposit(
                &mut ledger,
                deal,
                Token::Native,
                Decimal::from(5),
                depositor,
                Decimal::from(5),
                0,
            )
            .unwrap();
        assert_eq!(
            escrow.get_available_deal_balance(deal, &Token::Native),
            Decimal::from(5)
        );
    }

    #[test]
    fn test_multiple_deposits_atomic_on_length_mismatch() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);

        let result = escrow.multiple_deposits(
            &mut ledger,
            deal,
            &[Token::asset("TKA"), Token::asset("TKB")],
            &[Decimal::from(1)],
            depositor,
            Decimal::ZERO,
            0,
        );
        assert_eq!(
            result,
            Err(EscrowError::ArrayLengthMismatch { left: 2, right: 1 })
        );
        assert_eq!(escrow.get_total_deposit_count(deal), 0);
    }

    #[test]
    fn test_multiple_deposits_atomic_on_insufficient_balance() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        // No TKB at all; the TKA leg must not land either.
        let result = escrow.multiple_deposits(
            &mut ledger,
            deal,
            &[Token::asset("TKA"), Token::asset("TKB")],
            &[Decimal::from(1), Decimal::from(1)],
            depositor,
            Decimal::ZERO,
            0,
        );
        assert!(matches!(result, Err(EscrowError::Ledger(_))));
        assert_eq!(escrow.get_total_deposit_count(deal), 0);
        assert_eq!(
            ledger.balance_of(&depositor, &Token::asset("TKA")),
            Decimal::from(10)
        );
    }

    #[test]
    fn test_multiple_deposits_native_sum_checked() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::Native, 10);
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);

        let result = escrow.multiple_deposits(
            &mut ledger,
            deal,
            &[Token::Native, Token::asset("TKA"), Token::Native],
            &[Decimal::from(2), Decimal::from(1), Decimal::from(3)],
            depositor,
            Decimal::from(4),
            0,
        );
        assert!(matches!(result, Err(EscrowError::InvalidEthValue { .. })));

        let indices = escrow
            .multiple_deposits(
                &mut ledger,
                deal,
                &[Token::Native, Token::asset("TKA"), Token::Native],
                &[Decimal::from(2), Decimal::from(1), Decimal::from(3)],
                depositor,
                Decimal::from(5),
                0,
            )
            .unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(
            escrow.get_available_deal_balance(deal, &Token::Native),
            Decimal::from(5)
        );
    }

    #[test]
    fn test_register_deposit_sweeps_direct_transfer() {
        let (mut escrow, mut ledger, dao, deal) = setup();
        // Funds arrive on the holding account without going through deposit().
        ledger
            .mint(escrow.holding_account(), Token::asset("TKA"), Decimal::from(7))
            .unwrap();

        let index = escrow
            .register_deposit(&ledger, deal, Token::asset("TKA"), 50)
            .unwrap();
        let record = escrow.get_deposit(deal, index).unwrap();
        assert_eq!(record.depositor, dao);
        assert_eq!(record.amount, Decimal::from(7));

        // Nothing left to sweep.
        let again = escrow.register_deposit(&ledger, deal, Token::asset("TKA"), 51);
        assert_eq!(again, Err(EscrowError::InvalidAmount));
    }

    #[test]
    fn test_register_deposits_rejects_repeated_token() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        ledger
            .mint(escrow.holding_account(), Token::asset("TKA"), Decimal::from(7))
            .unwrap();

        let tokens = [Token::asset("TKA"), Token::asset("TKA")];
        let result = escrow.register_deposits(&ledger, deal, &tokens, 0);
        assert_eq!(result, Err(EscrowError::InvalidAmount));
        assert_eq!(escrow.get_total_deposit_count(deal), 0);
    }

    #[test]
    fn test_withdraw_returns_funds_once() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        escrow
            .deposit(
                &mut ledger,
                deal,
                Token::asset("TKA"),
                Decimal::from(6),
                depositor,
                Decimal::ZERO,
                0,
            )
            .unwrap();

        let (token, amount) = escrow.withdraw(&mut ledger, deal, 0, depositor).unwrap();
        assert_eq!(token, Token::asset("TKA"));
        assert_eq!(amount, Decimal::from(6));
        assert_eq!(
            ledger.balance_of(&depositor, &Token::asset("TKA")),
            Decimal::from(10)
        );

        let again = escrow.withdraw(&mut ledger, deal, 0, depositor);
        assert_eq!(again, Err(EscrowError::NotWithdrawable));
    }

    #[test]
    fn test_withdraw_requires_depositor() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        escrow
            .deposit(
                &mut ledger,
                deal,
                Token::asset("TKA"),
                Decimal::from(6),
                depositor,
                Decimal::ZERO,
                0,
            )
            .unwrap();

        let stranger = AccountId::new();
        let result = escrow.withdraw(&mut ledger, deal, 0, stranger);
        assert_eq!(result, Err(EscrowError::NotAuthorized));
    }

    #[test]
    fn test_withdraw_bad_index() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let result = escrow.withdraw(&mut ledger, deal, 3, AccountId::new());
        assert_eq!(
            result,
            Err(EscrowError::InvalidDepositId { index: 3, count: 0 })
        );
    }

    #[test]
    fn test_executed_deal_blocks_withdrawal() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        escrow
            .deposit(
                &mut ledger,
                deal,
                Token::asset("TKA"),
                Decimal::from(6),
                depositor,
                Decimal::ZERO,
                0,
            )
            .unwrap();

        escrow.mark_deal_executed(deal);
        let result = escrow.withdraw(&mut ledger, deal, 0, depositor);
        assert_eq!(result, Err(EscrowError::NotWithdrawable));
        assert_eq!(
            escrow.get_withdrawable_amount_of_user(deal, depositor, &Token::asset("TKA")),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_deposit_range_clamps() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        for _ in 0..3 {
            escrow
                .deposit(
                    &mut ledger,
                    deal,
                    Token::asset("TKA"),
                    Decimal::from(2),
                    depositor,
                    Decimal::ZERO,
                    0,
                )
                .unwrap();
        }

        assert_eq!(escrow.get_deposit_range(deal, 0, 2).len(), 2);
        assert_eq!(escrow.get_deposit_range(deal, 1, 10).len(), 2);
        assert_eq!(escrow.get_deposit_range(deal, 5, 10).len(), 0);
        assert_eq!(escrow.get_deposit_range(deal, usize::MAX, usize::MAX).len(), 0);
    }

    #[test]
    fn test_send_to_module_consumes_oldest_first() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let depositor = AccountId::new();
        fund(&mut ledger, depositor, Token::asset("TKA"), 10);
        for amount in [3u64, 4, 3] {
            escrow
                .deposit(
                    &mut ledger,
                    deal,
                    Token::asset("TKA"),
                    Decimal::from(amount),
                    depositor,
                    Decimal::ZERO,
                    0,
                )
                .unwrap();
        }

        let module_account = AccountId::new();
        escrow
            .send_to_module(
                &mut ledger,
                deal,
                &Token::asset("TKA"),
                Decimal::from(5),
                module_account,
            )
            .unwrap();
        assert_eq!(
            ledger.balance_of(&module_account, &Token::asset("TKA")),
            Decimal::from(5)
        );
        // First two records consumed (3 + 4 covers 5), third untouched.
        assert!(escrow.get_deposit(deal, 0).unwrap().withdrawn);
        assert!(escrow.get_deposit(deal, 1).unwrap().withdrawn);
        assert!(!escrow.get_deposit(deal, 2).unwrap().withdrawn);
        assert_eq!(
            escrow.get_available_deal_balance(deal, &Token::asset("TKA")),
            Decimal::from(3)
        );
        // The 2-token surplus of the partially consumed record is sweepable.
        let swept = escrow
            .register_deposit(&ledger, deal, Token::asset("TKA"), 0)
            .unwrap();
        assert_eq!(
            escrow.get_deposit(deal, swept).unwrap().amount,
            Decimal::from(2)
        );
    }

    #[test]
    fn test_send_to_module_insufficient() {
        let (mut escrow, mut ledger, _dao, deal) = setup();
        let result = escrow.send_to_module(
            &mut ledger,
            deal,
            &Token::asset("TKA"),
            Decimal::from(1),
            AccountId::new(),
        );
        assert!(matches!(
            result,
            Err(EscrowError::InsufficientDealBalance { .. })
        ));
    }

    #[test]
    fn test_set_deal_manager_owner_only() {
        let (mut escrow, _ledger, dao, _deal) = setup();
        let stranger = AccountId::new();
        let result = escrow.set_deal_manager(stranger, RegistryId::new());
        assert_eq!(result, Err(EscrowError::NotAuthorized));

        let replacement = RegistryId::new();
        escrow.set_deal_manager(dao, replacement).unwrap();
        assert_eq!(escrow.deal_manager(), Some(replacement));
    }

    // ---- vesting ----

    fn vested_escrow(total: u64, cliff: i64, duration: i64) -> (DaoEscrow, TokenLedger, AccountId, DealRef) {
        let (mut escrow, mut ledger, dao, deal) = setup();
        ledger
            .mint(escrow.holding_account(), Token::asset("TKA"), Decimal::from(total))
            .unwrap();
        escrow
            .create_vesting(deal, Token::asset("TKA"), Decimal::from(total), cliff, duration, 1_000)
            .unwrap();
        (escrow, ledger, dao, deal)
    }

    #[test]
    fn test_releasable_zero_before_cliff() {
        let entry = VestingEntry {
            token: Token::asset("TKA"),
            total: Decimal::from(100),
            claimed: Decimal::ZERO,
            start: 0,
            cliff_at: 100,
            end_at: 200,
        };
        assert_eq!(entry.releasable(0), Decimal::ZERO);
        assert_eq!(entry.releasable(99), Decimal::ZERO);
    }

    #[test]
    fn test_releasable_linear_after_cliff() {
        let entry = VestingEntry {
            token: Token::asset("TKA"),
            total: Decimal::from(100),
            claimed: Decimal::ZERO,
            start: 0,
            cliff_at: 100,
            end_at: 200,
        };
        assert_eq!(entry.releasable(100), Decimal::ZERO);
        assert_eq!(entry.releasable(150), Decimal::from(50));
        assert_eq!(entry.releasable(200), Decimal::from(100));
        assert_eq!(entry.releasable(10_000), Decimal::from(100));
    }

    #[test]
    fn test_releasable_zero_width_window() {
        // duration <= cliff collapses the window; everything releases at
        // the cliff.
        let entry = VestingEntry {
            token: Token::asset("TKA"),
            total: Decimal::from(100),
            claimed: Decimal::ZERO,
            start: 0,
            cliff_at: 100,
            end_at: 100,
        };
        assert_eq!(entry.releasable(99), Decimal::ZERO);
        assert_eq!(entry.releasable(100), Decimal::from(100));
    }

    #[test]
    fn test_claim_pays_dao_and_never_overpays() {
        let (mut escrow, mut ledger, dao, deal) = vested_escrow(100, 100, 300);
        // cliff at 1100, end at 1300; midpoint 1200 releases half.
        let paid = escrow.claim_deal_vestings(&mut ledger, deal, 1_200).unwrap();
        assert_eq!(paid, vec![(Token::asset("TKA"), Decimal::from(50))]);
        assert_eq!(
            ledger.balance_of(&dao, &Token::asset("TKA")),
            Decimal::from(50)
        );

        // Claiming again at the same instant releases nothing more.
        let paid = escrow.claim_deal_vestings(&mut ledger, deal, 1_200).unwrap();
        assert!(paid.is_empty());

        // Past the end, the remainder comes out and never exceeds total.
        let paid = escrow.claim_deal_vestings(&mut ledger, deal, 2_000).unwrap();
        assert_eq!(paid, vec![(Token::asset("TKA"), Decimal::from(50))]);
        assert_eq!(
            ledger.balance_of(&dao, &Token::asset("TKA")),
            Decimal::from(100)
        );
        let paid = escrow.claim_deal_vestings(&mut ledger, deal, 3_000).unwrap();
        assert!(paid.is_empty());
    }

    #[test]
    fn test_claim_before_cliff_is_empty_not_error() {
        let (mut escrow, mut ledger, _dao, deal) = vested_escrow(100, 100, 300);
        let paid = escrow.claim_deal_vestings(&mut ledger, deal, 1_050).unwrap();
        assert!(paid.is_empty());
        let paid = escrow.claim_vestings(&mut ledger, 1_050).unwrap();
        assert!(paid.is_empty());
    }

    #[test]
    fn test_claim_vestings_spans_deals() {
        let (mut escrow, mut ledger, dao, deal_a) = vested_escrow(100, 0, 100);
        let deal_b = DealRef::new(ModuleId::new(), DealId::FIRST);
        ledger
            .mint(escrow.holding_account(), Token::asset("TKB"), Decimal::from(40))
            .unwrap();
        escrow
            .create_vesting(deal_b, Token::asset("TKB"), Decimal::from(40), 0, 100, 1_000)
            .unwrap();

        // Both schedules fully vested at 2000.
        let paid = escrow.claim_vestings(&mut ledger, 2_000).unwrap();
        assert_eq!(
            paid,
            vec![
                (Token::asset("TKA"), Decimal::from(100)),
                (Token::asset("TKB"), Decimal::from(40)),
            ]
        );
        assert_eq!(ledger.balance_of(&dao, &Token::asset("TKA")), Decimal::from(100));
        assert_eq!(ledger.balance_of(&dao, &Token::asset("TKB")), Decimal::from(40));
        assert_eq!(escrow.get_deal_vestings(deal_a)[0].claimed, Decimal::from(100));
        let claimed_events = escrow
            .events()
            .iter()
            .filter(|e| matches!(e, ContractEvent::VestingClaimed(_)))
            .count();
        assert_eq!(claimed_events, 2);
    }

    #[test]
    fn test_create_vesting_rejects_nonpositive() {
        let (mut escrow, _ledger, _dao, deal) = setup();
        let result = escrow.create_vesting(deal, Token::asset("TKA"), Decimal::ZERO, 0, 100, 0);
        assert_eq!(result, Err(EscrowError::InvalidAmount));
    }

    #[test]
    fn test_create_vesting_rejects_overflowing_schedule() {
        let (mut escrow, _ledger, _dao, deal) = setup();
        let cliff_overflow =
            escrow.create_vesting(deal, Token::asset("TKA"), Decimal::ONE, i64::MAX, 100, 1);
        assert_eq!(cliff_overflow, Err(EscrowError::InvalidAmount));

        let duration_overflow =
            escrow.create_vesting(deal, Token::asset("TKA"), Decimal::ONE, 0, i64::MAX, 1);
        assert_eq!(duration_overflow, Err(EscrowError::InvalidAmount));

        assert!(escrow.get_deal_vestings(deal).is_empty());
    }
}
