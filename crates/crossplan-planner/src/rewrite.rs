//! Epoch-driven rewrite engine.
//!
//! One epoch is one pass over the registered mappings:
//!
//! 1. collect matches of every enabled mapping (registration order) against
//!    the plan as it stood when the epoch started;
//! 2. keep the first-found match for each operator, report the rest as
//!    `SkippedMatch` (overlap is a warning, never an error);
//! 3. prepare and commit the kept matches, tagging inserted operators with
//!    the epoch so later passes do not re-match them.
//!
//! The engine never abandons a transformation halfway. Callers that want to
//! stop early do so between epochs.

use tracing::{debug, warn};

use crossplan_core::config::PlannerConfig;
use crossplan_core::id::{Epoch, OpId};

use crate::error::{PlanError, Result};
use crate::mapping::{Mapping, MappingRegistry};
use crate::matching::{find_matches, MatchClaims, SubplanMatch};
use crate::plan::Plan;
use crate::transform::{AppliedTransformation, PlanTransformation};
use crate::verify::check_consistency;

/// A candidate match dropped because an earlier match claimed its operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMatch {
    pub mapping: String,
    pub operators: Vec<OpId>,
    /// Operators already taken, with the mapping that took them.
    pub conflicts: Vec<(OpId, String)>,
}

/// A match whose transformation was rejected during preparation.
#[derive(Debug)]
pub struct FailedTransformation {
    pub mapping: String,
    pub operators: Vec<OpId>,
    pub error: PlanError,
}

#[derive(Debug)]
pub struct EpochOutcome {
    pub epoch: Epoch,
    pub applied: Vec<AppliedTransformation>,
    pub skipped: Vec<SkippedMatch>,
    pub failed: Vec<FailedTransformation>,
}

impl EpochOutcome {
    fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            applied: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Nothing was rewritten in this epoch.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub epochs: Vec<EpochOutcome>,
}

impl RunSummary {
    pub fn applied(&self) -> impl Iterator<Item = &AppliedTransformation> + '_ {
        self.epochs.iter().flat_map(|e| e.applied.iter())
    }

    pub fn num_applied(&self) -> usize {
        self.epochs.iter().map(|e| e.applied.len()).sum()
    }

    /// Last epoch that ran, if any.
    pub fn last_epoch(&self) -> Option<Epoch> {
        self.epochs.last().map(|e| e.epoch)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteEngine {
    config: PlannerConfig,
}

impl RewriteEngine {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run one epoch of `registry` over `plan`.
    ///
    /// Rejected transformations land in `failed` and leave the plan as it
    /// was; only a broken invariant during commit is returned as `Err`.
    pub fn run_epoch(&self, plan: &mut Plan, registry: &MappingRegistry, epoch: Epoch) -> Result<EpochOutcome> {
        let mut outcome = EpochOutcome::new(epoch);

        let mut candidates: Vec<(&Mapping, SubplanMatch)> = Vec::new();
        for mapping in registry.enabled(self.config.platforms) {
            for m in find_matches(plan, mapping.pattern(), epoch) {
                candidates.push((mapping, m));
            }
        }

        let mut claims = MatchClaims::new();
        let mut accepted: Vec<(&Mapping, SubplanMatch)> = Vec::new();
        for (mapping, m) in candidates {
            if let Err(conflicts) = claims.try_claim(mapping.name(), &m) {
                warn!(
                    mapping = mapping.name(),
                    operators = ?m.operators(),
                    conflicts = ?conflicts,
                    %epoch,
                    "overlapping match skipped"
                );
                outcome.skipped.push(SkippedMatch {
                    mapping: mapping.name().to_string(),
                    operators: m.operators().to_vec(),
                    conflicts,
                });
            } else {
                accepted.push((mapping, m));
            }
        }

        for (mapping, m) in accepted {
            match PlanTransformation::prepare(mapping, &m, plan, epoch) {
                Ok(staged) => outcome.applied.push(staged.commit(plan)?),
                Err(error) => {
                    warn!(mapping = mapping.name(), operators = ?m.operators(), %error, "transformation rejected");
                    outcome.failed.push(FailedTransformation {
                        mapping: mapping.name().to_string(),
                        operators: m.operators().to_vec(),
                        error,
                    });
                }
            }
        }

        if self.config.verify_rewrites && !outcome.applied.is_empty() {
            check_consistency(plan)?;
        }
        debug!(
            %epoch,
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "epoch finished"
        );
        Ok(outcome)
    }

    /// Run epochs starting after `Epoch::INITIAL` until one applies nothing or
    /// `max_epochs` have run.
    pub fn run(&self, plan: &mut Plan, registry: &MappingRegistry) -> Result<RunSummary> {
        let mut summary = RunSummary { epochs: Vec::new() };
        let mut epoch = Epoch::INITIAL.next();
        for _ in 0..self.config.max_epochs {
            let outcome = self.run_epoch(plan, registry, epoch)?;
            let done = outcome.is_noop();
            summary.epochs.push(outcome);
            if done {
                break;
            }
            epoch = epoch.next();
        }
        if self.config.verify_rewrites {
            debug!(
                epochs = summary.epochs.len(),
                applied = summary.num_applied(),
                fingerprint = %plan.fingerprint()?.short(),
                "rewrite finished"
            );
        }
        Ok(summary)
    }
}
