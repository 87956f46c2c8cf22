//! Deal registry: DAO → escrow map and deal-module allow-list
//!
//! The registry owns every escrow it creates. New escrows are cloned from
//! a configured implementation template and bound to their DAO, mirroring
//! a proxy-factory deployment. Deal modules must be activated by the owner
//! before they can reach any escrow's settlement operations; the
//! [`escrow_for_module`](DealRegistry::escrow_for_module) seam is the only
//! path a module has into an escrow's books.

use std::collections::{HashMap, HashSet};
use tracing::info;
use types::ids::{AccountId, ModuleId, RegistryId};

use crate::errors::RegistryError;
use crate::escrow::DaoEscrow;
use crate::events::{ContractEvent, EscrowCreated, ModuleActivated, ModuleDeactivated};

/// What the registry needs to know about a deal module to activate it.
pub trait DealModule {
    fn module_id(&self) -> ModuleId;
    /// The registry this module was constructed against
    fn backing_registry(&self) -> RegistryId;
}

/// Root contract mapping DAO identity to escrow and allow-listing modules.
#[derive(Debug)]
pub struct DealRegistry {
    id: RegistryId,
    owner: AccountId,
    implementation: Option<DaoEscrow>,
    escrows: HashMap<AccountId, DaoEscrow>,
    modules: HashSet<ModuleId>,
    events: Vec<ContractEvent>,
}

impl DealRegistry {
    pub fn new(owner: AccountId) -> Self {
        Self {
            id: RegistryId::new(),
            owner,
            implementation: None,
            escrows: HashMap::new(),
            modules: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn owner(&self) -> AccountId {
        self.owner
    }

    /// Configure the escrow template new escrows are cloned from.
    /// Owner-only.
    pub fn set_escrow_implementation(
        &mut self,
        caller: AccountId,
        template: DaoEscrow,
    ) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::NotAuthorized);
        }
        self.implementation = Some(template);
        Ok(())
    }

    /// Create and bind an escrow for a DAO. Permissionless; fails if the
    /// DAO already has one or no template is configured.
    pub fn create_escrow(&mut self, dao: AccountId) -> Result<&DaoEscrow, RegistryError> {
        if dao.is_nil() {
            return Err(RegistryError::InvalidIdentity);
        }
        if self.escrows.contains_key(&dao) {
            return Err(RegistryError::AlreadyExists {
                dao: dao.to_string(),
            });
        }
        let template = self
            .implementation
            .as_ref()
            .ok_or(RegistryError::ImplementationNotSet)?;

        let mut escrow = template.clone();
        escrow.initialize(dao, self.id)?;

        info!(%dao, holding = %escrow.holding_account(), "escrow created");
        self.events
            .push(ContractEvent::EscrowCreated(EscrowCreated { dao }));
        Ok(self.escrows.entry(dao).or_insert(escrow))
    }

    pub fn has_escrow(&self, dao: &AccountId) -> bool {
        self.escrows.contains_key(dao)
    }

    pub fn get_escrow(&self, dao: &AccountId) -> Option<&DaoEscrow> {
        self.escrows.get(dao)
    }

    /// Mutable escrow access for depositor-facing operations (deposits,
    /// withdrawals, claims). Module-facing operations go through
    /// [`escrow_for_module`](Self::escrow_for_module) instead.
    pub fn get_escrow_mut(&mut self, dao: &AccountId) -> Option<&mut DaoEscrow> {
        self.escrows.get_mut(dao)
    }

    /// Allow-list a deal module. Owner-only; the module's back-reference
    /// must point at this registry.
    pub fn activate_module(
        &mut self,
        caller: AccountId,
        module: &dyn DealModule,
    ) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::NotAuthorized);
        }
        let id = module.module_id();
        if id.is_nil() {
            return Err(RegistryError::InvalidIdentity);
        }
        if module.backing_registry() != self.id {
            return Err(RegistryError::ModuleSetupInvalid);
        }
        if self.modules.insert(id) {
            info!(module = %id, "module activated");
            self.events
                .push(ContractEvent::ModuleActivated(ModuleActivated { module: id }));
        }
        Ok(())
    }

    /// Remove a module from the allow-list. Owner-only. Removing a module
    /// that was never active is a no-op.
    pub fn deactivate_module(
        &mut self,
        caller: AccountId,
        module: ModuleId,
    ) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::NotAuthorized);
        }
        if self.modules.remove(&module) {
            info!(module = %module, "module deactivated");
            self.events.push(ContractEvent::ModuleDeactivated(ModuleDeactivated {
                module,
            }));
        }
        Ok(())
    }

    pub fn address_is_module(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }

    /// Authorization seam for settlement: resolves a DAO's escrow on behalf
    /// of a module. Fails unless the module is active, the escrow exists,
    /// and the escrow trusts this registry.
    pub fn escrow_for_module(
        &mut self,
        module: ModuleId,
        dao: &AccountId,
    ) -> Result<&mut DaoEscrow, RegistryError> {
        if !self.modules.contains(&module) {
            return Err(RegistryError::ModuleNotActive {
                module: module.to_string(),
            });
        }
        let escrow = self
            .escrows
            .get_mut(dao)
            .ok_or_else(|| RegistryError::EscrowNotFound {
                dao: dao.to_string(),
            })?;
        if escrow.deal_manager() != Some(self.id) {
            return Err(RegistryError::NotAuthorized);
        }
        Ok(escrow)
    }

    pub fn events(&self) -> &[ContractEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ContractEvent> {
        std::mem::take(&mut self.events)
    }
}
