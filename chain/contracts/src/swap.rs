//! Token-swap deal module: deal data model, validation, atomic settlement
//!
//! A deal is a funding matrix (what each DAO sends, per token) and an
//! allocation matrix (what each DAO receives, split into an instant and a
//! vested portion). Settlement is all-or-nothing: every transfer is planned
//! with checked arithmetic and simulated on scratch balances before any
//! state mutates. The module's own ledger account only holds funds
//! transiently inside a single `execute_swap` call.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};
use types::ids::{AccountId, DealId, DealRef, ModuleId, RegistryId};
use types::numeric::{shares_are_complete, BasisPoints};
use types::token::Token;

use crate::errors::SwapError;
use crate::events::{ContractEvent, FeeChanged, FeeWalletChanged, TokenSwapCreated, TokenSwapExecuted};
use crate::ledger::TokenLedger;
use crate::registry::{DealModule, DealRegistry};

/// Most daoplomats a deal may reward
pub const MAX_DAOPLOMATS: usize = 8;

/// Default ceiling for the daoplomat reward pool rate: 10%
pub const DEFAULT_REWARD_CAP: u32 = 1_000;

/// One cell of the allocation matrix: what a DAO receives of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Paid to the DAO's account at execution
    pub instant: Decimal,
    /// Locked into a vesting schedule in the DAO's escrow
    pub vested: Decimal,
    /// Seconds after execution before anything releases
    pub cliff: i64,
    /// Seconds after execution at which the schedule completes
    pub duration: i64,
}

impl Allocation {
    pub fn instant_only(amount: Decimal) -> Self {
        Self {
            instant: amount,
            vested: Decimal::ZERO,
            cliff: 0,
            duration: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.instant.is_zero() && self.vested.is_zero()
    }
}

/// Daoplomat compensation: a pool rate carved out of the settled value,
/// split between recipients by shares that must total 100%.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardShares {
    pub pool_rate: BasisPoints,
    pub recipient_shares: Vec<BasisPoints>,
}

impl RewardShares {
    /// No reward pool, no recipients.
    pub fn none() -> Self {
        Self {
            pool_rate: BasisPoints::ZERO,
            recipient_shares: Vec::new(),
        }
    }
}

/// A registered token swap deal.
#[derive(Debug, Clone)]
pub struct TokenSwap {
    pub id: DealId,
    pub daos: Vec<AccountId>,
    pub tokens: Vec<Token>,
    /// `path_from[t][d]`: what DAO `d` must fund of token `t`
    pub path_from: Vec<Vec<Decimal>>,
    /// `path_to[t][d]`: what DAO `d` receives of token `t`
    pub path_to: Vec<Vec<Allocation>>,
    pub daoplomats: Vec<AccountId>,
    pub reward_shares: RewardShares,
    pub metadata: String,
    pub deadline: i64,
    pub created_at: i64,
    pub executed_at: Option<i64>,
}

impl TokenSwap {
    pub fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    pub fn has_expired(&self, now: i64) -> bool {
        now >= self.deadline
    }
}

/// A ledger movement planned during settlement, applied only after the
/// whole plan simulates cleanly.
#[derive(Debug)]
struct PlannedTransfer {
    from: AccountId,
    to: AccountId,
    token: Token,
    amount: Decimal,
}

#[derive(Debug)]
struct SettlementPlan {
    /// Escrow pulls: (source dao, token, amount)
    pulls: Vec<(AccountId, Token, Decimal)>,
    /// Payouts from the module account (fees, rewards, instant portions)
    payouts: Vec<PlannedTransfer>,
    /// Vested portions: (destination dao, token, amount, cliff, duration)
    vestings: Vec<(AccountId, Token, Decimal, i64, i64)>,
}

/// The deal module. Registers swaps, answers executability queries, and
/// settles funded deals atomically through the registry's escrows.
#[derive(Debug)]
pub struct TokenSwapModule {
    id: ModuleId,
    /// Transient settlement account on the token ledger
    account: AccountId,
    deal_manager: RegistryId,
    owner: AccountId,
    fee: BasisPoints,
    fee_wallet: AccountId,
    reward_cap: BasisPoints,
    deals: BTreeMap<DealId, TokenSwap>,
    used_metadata: HashSet<String>,
    next_id: DealId,
    events: Vec<ContractEvent>,
}

impl DealModule for TokenSwapModule {
    fn module_id(&self) -> ModuleId {
        self.id
    }

    fn backing_registry(&self) -> RegistryId {
        self.deal_manager
    }
}

impl TokenSwapModule {
    pub fn new(registry: &DealRegistry, owner: AccountId, fee_wallet: AccountId) -> Self {
        Self::with_reward_cap(
            registry,
            owner,
            fee_wallet,
            BasisPoints::new(DEFAULT_REWARD_CAP).unwrap(),
        )
    }

    pub fn with_reward_cap(
        registry: &DealRegistry,
        owner: AccountId,
        fee_wallet: AccountId,
        reward_cap: BasisPoints,
    ) -> Self {
        Self {
            id: ModuleId::new(),
            account: AccountId::new(),
            deal_manager: registry.id(),
            owner,
            fee: BasisPoints::ZERO,
            fee_wallet,
            reward_cap,
            deals: BTreeMap::new(),
            used_metadata: HashSet::new(),
            next_id: DealId::FIRST,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// The module's transient ledger account.
    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn fee(&self) -> BasisPoints {
        self.fee
    }

    pub fn fee_wallet(&self) -> AccountId {
        self.fee_wallet
    }

    pub fn reward_cap(&self) -> BasisPoints {
        self.reward_cap
    }

    /// Change the facilitation fee. Owner-only; setting the same value is
    /// a no-op without an event.
    pub fn set_fee(&mut self, caller: AccountId, fee: BasisPoints) -> Result<(), SwapError> {
        if caller != self.owner {
            return Err(SwapError::NotAuthorized);
        }
        if fee == self.fee {
            return Ok(());
        }
        info!(old = %self.fee, new = %fee, "fee changed");
        self.events.push(ContractEvent::FeeChanged(FeeChanged {
            old: self.fee,
            new: fee,
        }));
        self.fee = fee;
        Ok(())
    }

    /// Change the fee destination. Owner-only; nil wallets are rejected.
    pub fn set_fee_wallet(&mut self, caller: AccountId, wallet: AccountId) -> Result<(), SwapError> {
        if caller != self.owner {
            return Err(SwapError::NotAuthorized);
        }
        if wallet.is_nil() {
            return Err(SwapError::InvalidIdentity);
        }
        if wallet == self.fee_wallet {
            return Ok(());
        }
        info!(old = %self.fee_wallet, new = %wallet, "fee wallet changed");
        self.events.push(ContractEvent::FeeWalletChanged(FeeWalletChanged {
            old: self.fee_wallet,
            new: wallet,
        }));
        self.fee_wallet = wallet;
        Ok(())
    }

    // ---- deal registration ----

    /// Register a new swap. Validates the whole configuration, lazily
    /// creates an escrow for any participant that lacks one, and assigns
    /// the next sequential id. The deal is funded afterwards by deposits
    /// into the participants' escrows.
    #[allow(clippy::too_many_arguments)]
    pub fn create_swap(
        &mut self,
        registry: &mut DealRegistry,
        daos: Vec<AccountId>,
        tokens: Vec<Token>,
        path_from: Vec<Vec<Decimal>>,
        path_to: Vec<Vec<Allocation>>,
        daoplomats: Vec<AccountId>,
        reward_shares: RewardShares,
        metadata: impl Into<String>,
        deadline_offset: i64,
        now: i64,
    ) -> Result<DealId, SwapError> {
        let metadata = metadata.into();

        if daos.iter().any(AccountId::is_nil) {
            return Err(SwapError::InvalidIdentity);
        }
        if daos.len() < 2 {
            return Err(SwapError::TooFewParticipants { count: daos.len() });
        }
        if tokens.is_empty() {
            return Err(SwapError::TooFewTokens);
        }
        let mut seen = HashSet::new();
        for token in &tokens {
            if !seen.insert(token) {
                return Err(SwapError::DuplicateToken {
                    token: token.to_string(),
                });
            }
        }
        Self::check_matrix_shape(&path_from, tokens.len(), daos.len())?;
        Self::check_matrix_shape(&path_to, tokens.len(), daos.len())?;
        if daoplomats.len() > MAX_DAOPLOMATS {
            return Err(SwapError::TooManyRecipients {
                count: daoplomats.len(),
                max: MAX_DAOPLOMATS,
            });
        }
        if daoplomats.iter().any(AccountId::is_nil) {
            return Err(SwapError::InvalidIdentity);
        }
        if metadata.is_empty() {
            return Err(SwapError::EmptyMetadata);
        }
        if self.used_metadata.contains(&metadata) {
            return Err(SwapError::DuplicateMetadata { metadata });
        }
        if deadline_offset <= 0 {
            return Err(SwapError::InvalidDeadline);
        }
        let deadline = now
            .checked_add(deadline_offset)
            .ok_or(SwapError::InvalidDeadline)?;
        if reward_shares.recipient_shares.len() != daoplomats.len() {
            return Err(SwapError::ArrayLengthMismatch {
                expected: daoplomats.len(),
                got: reward_shares.recipient_shares.len(),
            });
        }
        if daoplomats.is_empty() {
            if !reward_shares.pool_rate.is_zero() {
                return Err(SwapError::InvalidRewardShares);
            }
        } else if !shares_are_complete(&reward_shares.recipient_shares) {
            return Err(SwapError::InvalidRewardShares);
        }
        if reward_shares.pool_rate > self.reward_cap {
            return Err(SwapError::RewardTooLarge {
                rate: reward_shares.pool_rate.to_string(),
                cap: self.reward_cap.to_string(),
            });
        }
        for row in &path_from {
            if row.iter().any(|amount| amount.is_sign_negative()) {
                return Err(SwapError::InvalidAmount);
            }
        }
        for row in &path_to {
            for cell in row {
                if cell.instant.is_sign_negative()
                    || cell.vested.is_sign_negative()
                    || cell.cliff < 0
                    || cell.duration < 0
                {
                    return Err(SwapError::InvalidAmount);
                }
            }
        }

        for dao in &daos {
            if !registry.has_escrow(dao) {
                registry.create_escrow(*dao)?;
            }
        }

        let id = self.next_id;
        self.next_id = id.next();
        self.used_metadata.insert(metadata.clone());
        self.deals.insert(
            id,
            TokenSwap {
                id,
                daos,
                tokens,
                path_from,
                path_to,
                daoplomats,
                reward_shares,
                metadata: metadata.clone(),
                deadline,
                created_at: now,
                executed_at: None,
            },
        );

        info!(deal = %id, %metadata, "token swap created");
        self.events.push(ContractEvent::TokenSwapCreated(TokenSwapCreated {
            module: self.id,
            deal: id,
            metadata,
        }));
        Ok(id)
    }

    fn check_matrix_shape<T>(
        matrix: &[Vec<T>],
        token_count: usize,
        dao_count: usize,
    ) -> Result<(), SwapError> {
        if matrix.len() != token_count {
            return Err(SwapError::ArrayLengthMismatch {
                expected: token_count,
                got: matrix.len(),
            });
        }
        for row in matrix {
            if row.len() != dao_count {
                return Err(SwapError::ArrayLengthMismatch {
                    expected: dao_count,
                    got: row.len(),
                });
            }
        }
        Ok(())
    }

    // ---- queries ----

    pub fn get_tokenswap_from_id(&self, id: DealId) -> Result<&TokenSwap, SwapError> {
        self.deals.get(&id).ok_or(SwapError::UnknownId { id: id.to_string() })
    }

    pub fn get_tokenswap_from_metadata(&self, metadata: &str) -> Result<&TokenSwap, SwapError> {
        self.deals
            .values()
            .find(|deal| deal.metadata == metadata)
            .ok_or_else(|| SwapError::MetadataNotFound {
                metadata: metadata.to_string(),
            })
    }

    /// Whether the deal could settle right now: known, live, unexecuted,
    /// and every funding-matrix cell covered by escrowed deposits.
    pub fn check_executability(
        &self,
        registry: &DealRegistry,
        id: DealId,
        now: i64,
    ) -> Result<bool, SwapError> {
        let deal = self.get_tokenswap_from_id(id)?;
        if deal.has_expired(now) || deal.is_executed() {
            return Ok(false);
        }
        Ok(self.is_fully_funded(registry, deal))
    }

    fn is_fully_funded(&self, registry: &DealRegistry, deal: &TokenSwap) -> bool {
        let deal_ref = DealRef::new(self.id, deal.id);
        for (t, token) in deal.tokens.iter().enumerate() {
            for (d, dao) in deal.daos.iter().enumerate() {
                let required = deal.path_from[t][d];
                if required.is_zero() {
                    continue;
                }
                let funded = registry
                    .get_escrow(dao)
                    .map(|escrow| escrow.get_available_deal_balance(deal_ref, token))
                    .unwrap_or(Decimal::ZERO);
                if funded < required {
                    return false;
                }
            }
        }
        true
    }

    // ---- settlement ----

    /// Settle a funded deal. Pulls every funding-matrix amount into the
    /// module account, then distributes fee, daoplomat rewards, instant
    /// payouts, and vesting schedules per the allocation matrix. The whole
    /// settlement is planned and simulated before any balance moves, so a
    /// failure leaves every escrow and ledger balance untouched.
    pub fn execute_swap(
        &mut self,
        registry: &mut DealRegistry,
        ledger: &mut TokenLedger,
        id: DealId,
        now: i64,
    ) -> Result<(), SwapError> {
        let deal = self
            .deals
            .get(&id)
            .ok_or(SwapError::UnknownId { id: id.to_string() })?;
        if deal.has_expired(now) {
            return Err(SwapError::Expired);
        }
        if deal.is_executed() {
            return Err(SwapError::AlreadyExecuted);
        }
        if !self.is_fully_funded(registry, deal) {
            return Err(SwapError::NotExecutable);
        }

        let deal_ref = DealRef::new(self.id, id);
        let participants = deal.daos.clone();
        let metadata = deal.metadata.clone();
        let plan = self.plan_settlement(deal)?;

        // Every participant escrow must be reachable through the registry
        // before anything mutates.
        for dao in &participants {
            registry.escrow_for_module(self.id, dao)?;
        }
        self.simulate(registry, ledger, &plan)?;

        for (dao, token, amount) in &plan.pulls {
            registry
                .escrow_for_module(self.id, dao)?
                .send_to_module(ledger, deal_ref, token, *amount, self.account)?;
        }
        for dao in &participants {
            registry.escrow_for_module(self.id, dao)?.mark_deal_executed(deal_ref);
        }
        for transfer in &plan.payouts {
            ledger.transfer(transfer.from, transfer.to, &transfer.token, transfer.amount)?;
        }
        for (dao, token, amount, cliff, duration) in plan.vestings {
            let escrow = registry.escrow_for_module(self.id, &dao)?;
            let holding = escrow.holding_account();
            ledger.transfer(self.account, holding, &token, amount)?;
            escrow.create_vesting(deal_ref, token, amount, cliff, duration, now)?;
        }

        // Checked above; the map cannot have lost the entry since.
        if let Some(deal) = self.deals.get_mut(&id) {
            deal.executed_at = Some(now);
        }
        info!(deal = %id, %metadata, "token swap executed");
        self.events.push(ContractEvent::TokenSwapExecuted(TokenSwapExecuted {
            module: self.id,
            deal: id,
            metadata,
        }));
        Ok(())
    }

    /// Compute every movement the settlement needs, with overflow-checked
    /// arithmetic and no state access beyond the deal itself.
    fn plan_settlement(&self, deal: &TokenSwap) -> Result<SettlementPlan, SwapError> {
        let mut pulls = Vec::new();
        let mut payouts = Vec::new();
        let mut vestings = Vec::new();

        for (t, token) in deal.tokens.iter().enumerate() {
            for (d, dao) in deal.daos.iter().enumerate() {
                let required = deal.path_from[t][d];
                if !required.is_zero() {
                    pulls.push((*dao, token.clone(), required));
                }
            }

            for (d, dao) in deal.daos.iter().enumerate() {
                let cell = &deal.path_to[t][d];
                if cell.is_zero() {
                    continue;
                }

                let fee_instant = self.fee_part(cell.instant)?;
                let fee_vested = self.fee_part(cell.vested)?;
                let net_instant = cell.instant - fee_instant;
                let net_vested = cell.vested - fee_vested;

                let pool_instant = Self::rate_part(deal.reward_shares.pool_rate, net_instant)?;
                let pool_vested = Self::rate_part(deal.reward_shares.pool_rate, net_vested)?;
                let pool_total = pool_instant
                    .checked_add(pool_vested)
                    .ok_or(SwapError::Overflow)?;

                let fee_total = fee_instant
                    .checked_add(fee_vested)
                    .ok_or(SwapError::Overflow)?;
                if !fee_total.is_zero() {
                    payouts.push(PlannedTransfer {
                        from: self.account,
                        to: self.fee_wallet,
                        token: token.clone(),
                        amount: fee_total,
                    });
                }

                if !pool_total.is_zero() {
                    // The last recipient takes the remainder so the pool
                    // splits without residue.
                    let mut distributed = Decimal::ZERO;
                    let count = deal.daoplomats.len();
                    for (k, recipient) in deal.daoplomats.iter().enumerate() {
                        let reward = if k + 1 == count {
                            pool_total - distributed
                        } else {
                            Self::rate_part(deal.reward_shares.recipient_shares[k], pool_total)?
                        };
                        distributed += reward;
                        if !reward.is_zero() {
                            payouts.push(PlannedTransfer {
                                from: self.account,
                                to: *recipient,
                                token: token.clone(),
                                amount: reward,
                            });
                        }
                    }
                }

                let instant_out = net_instant - pool_instant;
                if !instant_out.is_zero() {
                    payouts.push(PlannedTransfer {
                        from: self.account,
                        to: *dao,
                        token: token.clone(),
                        amount: instant_out,
                    });
                }
                let vested_out = net_vested - pool_vested;
                if !vested_out.is_zero() {
                    vestings.push((*dao, token.clone(), vested_out, cell.cliff, cell.duration));
                }
            }
        }

        debug!(
            pulls = pulls.len(),
            payouts = payouts.len(),
            vestings = vestings.len(),
            "settlement planned"
        );
        Ok(SettlementPlan {
            pulls,
            payouts,
            vestings,
        })
    }

    fn fee_part(&self, amount: Decimal) -> Result<Decimal, SwapError> {
        Self::rate_part(self.fee, amount)
    }

    fn rate_part(rate: BasisPoints, amount: Decimal) -> Result<Decimal, SwapError> {
        if rate.is_zero() || amount.is_zero() {
            return Ok(Decimal::ZERO);
        }
        rate.checked_apply(amount).ok_or(SwapError::Overflow)
    }

    /// Dry-run the full plan on scratch balances. Catches an allocation
    /// matrix that distributes more than the funding matrix pulls in, and
    /// any overflow on a credited account.
    fn simulate(
        &self,
        registry: &DealRegistry,
        ledger: &TokenLedger,
        plan: &SettlementPlan,
    ) -> Result<(), SwapError> {
        let mut scratch: HashMap<(AccountId, Token), Decimal> = HashMap::new();
        let mut balance = |scratch: &mut HashMap<(AccountId, Token), Decimal>,
                           account: AccountId,
                           token: &Token| {
            *scratch
                .entry((account, token.clone()))
                .or_insert_with(|| ledger.balance_of(&account, token))
        };

        let mut moves: Vec<(AccountId, AccountId, &Token, Decimal)> = Vec::new();
        for (dao, token, amount) in &plan.pulls {
            let holding = registry
                .get_escrow(dao)
                .map(|escrow| escrow.holding_account())
                .ok_or_else(|| SwapError::Registry(
                    crate::errors::RegistryError::EscrowNotFound {
                        dao: dao.to_string(),
                    },
                ))?;
            moves.push((holding, self.account, token, *amount));
        }
        for transfer in &plan.payouts {
            moves.push((transfer.from, transfer.to, &transfer.token, transfer.amount));
        }
        for (dao, token, amount, _, _) in &plan.vestings {
            if let Some(escrow) = registry.get_escrow(dao) {
                moves.push((self.account, escrow.holding_account(), token, *amount));
            }
        }

        for (from, to, token, amount) in moves {
            if amount.is_zero() {
                continue;
            }
            let available = balance(&mut scratch, from, token);
            if available < amount {
                return Err(SwapError::Ledger(
                    crate::errors::LedgerError::InsufficientBalance {
                        token: token.to_string(),
                        required: amount.to_string(),
                        available: available.to_string(),
                    },
                ));
            }
            scratch.insert((from, token.clone()), available - amount);
            let credited = balance(&mut scratch, to, token)
                .checked_add(amount)
                .ok_or(SwapError::Ledger(crate::errors::LedgerError::Overflow))?;
            scratch.insert((to, token.clone()), credited);
        }
        Ok(())
    }

    // ---- events ----

    pub fn events(&self) -> &[ContractEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ContractEvent> {
        std::mem::take(&mut self.events)
    }
}
