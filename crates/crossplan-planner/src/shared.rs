//! A plan shared between threads.
//!
//! Structural changes take the write lock for the whole transformation, so a
//! reader never sees a half-rewired plan. Reads (estimation, traversal) share
//! the read lock.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossplan_core::id::Epoch;

use crate::error::Result;
use crate::mapping::MappingRegistry;
use crate::plan::Plan;
use crate::rewrite::{EpochOutcome, RewriteEngine, RunSummary};

#[derive(Debug, Clone, Default)]
pub struct SharedPlan {
    inner: Arc<RwLock<Plan>>,
}

impl SharedPlan {
    pub fn new(plan: Plan) -> Self {
        Self {
            inner: Arc::new(RwLock::new(plan)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Plan> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Plan> {
        self.inner.write()
    }

    /// Run `f` under a single write guard.
    pub fn transform<T>(&self, f: impl FnOnce(&mut Plan) -> Result<T>) -> Result<T> {
        let mut plan = self.inner.write();
        f(&mut plan)
    }

    pub fn run_epoch(&self, engine: &RewriteEngine, registry: &MappingRegistry, epoch: Epoch) -> Result<EpochOutcome> {
        self.transform(|plan| engine.run_epoch(plan, registry, epoch))
    }

    pub fn run(&self, engine: &RewriteEngine, registry: &MappingRegistry) -> Result<RunSummary> {
        self.transform(|plan| engine.run(plan, registry))
    }

    pub fn snapshot(&self) -> Plan {
        self.inner.read().clone()
    }
}
