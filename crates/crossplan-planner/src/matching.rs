//! Subplan matching.
//!
//! Anchor on pattern operator 0, scan anchor candidates in ascending `OpId`
//! order, then extend the binding along the pattern's edges (breadth-first from
//! the anchor), backtracking whenever a neighbour fails to match. The first
//! complete binding per anchor wins.
//!
//! A binding is complete when:
//! - every pattern edge is a real slot connection between the bound operators,
//! - internal outputs feed nothing outside the binding,
//! - exact operator patterns have every boundary input occupied and exactly one
//!   consumer per boundary output.
//!
//! Only operators from earlier epochs are eligible, so operators inserted
//! during the current epoch are never re-matched.

use std::collections::{BTreeMap, BTreeSet};

use crossplan_core::id::{Epoch, OpId};

use crate::operator::Operator;
use crate::pattern::SubplanPattern;
use crate::plan::Plan;
use crate::slot::{InputRef, OutputRef};

/// Concrete operators bound to a pattern's operator patterns (by position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubplanMatch {
    bindings: Vec<OpId>,
    names: Vec<String>,
}

impl SubplanMatch {
    pub(crate) fn new(pattern: &SubplanPattern, bindings: Vec<OpId>) -> Self {
        Self {
            bindings,
            names: pattern.operators().iter().map(|p| p.name().to_string()).collect(),
        }
    }

    pub fn anchor(&self) -> OpId {
        self.bindings[0]
    }

    /// Operator bound to pattern operator `index`.
    pub fn get(&self, index: usize) -> Option<OpId> {
        self.bindings.get(index).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<OpId> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.get(i))
    }

    pub fn operators(&self) -> &[OpId] {
        &self.bindings
    }

    pub fn operator_set(&self) -> BTreeSet<OpId> {
        self.bindings.iter().copied().collect()
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.bindings.contains(&id)
    }

    pub fn overlaps(&self, other: &SubplanMatch) -> bool {
        self.bindings.iter().any(|id| other.contains(*id))
    }
}

fn eligible(op: &Operator, epoch: Epoch) -> bool {
    op.epoch() < epoch
}

/// All first-found bindings of `pattern` in `plan`, one per anchor candidate.
///
/// Results may overlap each other; use `MatchClaims` to pick a disjoint set.
pub fn find_matches(plan: &Plan, pattern: &SubplanPattern, epoch: Epoch) -> Vec<SubplanMatch> {
    let order = pattern.walk_order();
    let anchor = &pattern.operators()[0];
    let mut found = Vec::new();

    for (id, op) in plan.operators() {
        if !eligible(op, epoch) || !anchor.matches(op) {
            continue;
        }
        let mut binding: Vec<Option<OpId>> = vec![None; pattern.len()];
        binding[0] = Some(id);
        if extend(plan, pattern, &order, 1, &mut binding, epoch) {
            let bound: Vec<OpId> = binding.into_iter().flatten().collect();
            found.push(SubplanMatch::new(pattern, bound));
        }
    }
    found
}

fn extend(
    plan: &Plan,
    pattern: &SubplanPattern,
    order: &[usize],
    pos: usize,
    binding: &mut [Option<OpId>],
    epoch: Epoch,
) -> bool {
    if pos == order.len() {
        let bound: Vec<OpId> = binding.iter().flatten().copied().collect();
        return bound.len() == pattern.len() && is_complete(plan, pattern, &bound);
    }

    let p = order[pos];
    for candidate in candidates(plan, pattern, p, binding) {
        if binding.contains(&Some(candidate)) {
            continue;
        }
        let Ok(op) = plan.operator(candidate) else {
            continue;
        };
        if !eligible(op, epoch) || !pattern.operators()[p].matches(op) {
            continue;
        }
        binding[p] = Some(candidate);
        if extend(plan, pattern, order, pos + 1, binding, epoch) {
            return true;
        }
        binding[p] = None;
    }
    false
}

/// Real neighbours that could play pattern operator `p`, via the first pattern
/// edge linking `p` to an already bound operator.
fn candidates(
    plan: &Plan,
    pattern: &SubplanPattern,
    p: usize,
    binding: &[Option<OpId>],
) -> BTreeSet<OpId> {
    let mut out = BTreeSet::new();
    for e in pattern.edges() {
        if e.to == p {
            if let Some(producer) = binding[e.from] {
                if let Ok(slot) = plan.operator(producer).and_then(|op| op.output(e.output)) {
                    out.extend(
                        slot.occupied_slots()
                            .iter()
                            .filter(|i| i.index == e.input)
                            .map(|i| i.op),
                    );
                }
                return out;
            }
        } else if e.from == p {
            if let Some(consumer) = binding[e.to] {
                if let Ok(slot) = plan.operator(consumer).and_then(|op| op.input(e.input)) {
                    if let Some(occupant) = slot.occupant() {
                        if occupant.index == e.output {
                            out.insert(occupant.op);
                        }
                    }
                }
                return out;
            }
        }
    }
    out
}

fn is_complete(plan: &Plan, pattern: &SubplanPattern, bound: &[OpId]) -> bool {
    // Every required edge exists.
    for e in pattern.edges() {
        let from = OutputRef::new(bound[e.from], e.output);
        let occupant = plan
            .operator(bound[e.to])
            .and_then(|op| op.input(e.input))
            .map(|slot| slot.occupant());
        if !matches!(occupant, Ok(Some(o)) if o == from) {
            return false;
        }
    }

    // Required (producer slot, consumer slot) pairs per internal output.
    let mut internal: BTreeMap<OutputRef, BTreeSet<InputRef>> = BTreeMap::new();
    for e in pattern.edges() {
        internal
            .entry(OutputRef::new(bound[e.from], e.output))
            .or_default()
            .insert(InputRef::new(bound[e.to], e.input));
    }

    for (k, op_pattern) in pattern.operators().iter().enumerate() {
        let Ok(op) = plan.operator(bound[k]) else {
            return false;
        };

        for (i, slot) in op.outputs().iter().enumerate() {
            let here = OutputRef::new(bound[k], i);
            match internal.get(&here) {
                // Internal outputs may only feed their pattern consumers.
                Some(expected) => {
                    if slot.occupied_slots().iter().any(|c| !expected.contains(c)) {
                        return false;
                    }
                }
                None => {
                    if op_pattern.is_exact() && slot.occupied_slots().len() != 1 {
                        return false;
                    }
                }
            }
        }

        if op_pattern.is_exact() {
            for (j, slot) in op.inputs().iter().enumerate() {
                if !pattern.is_internal_input(k, j) && !slot.is_occupied() {
                    return false;
                }
            }
        }
    }
    true
}

/// Tracks which operators already belong to an accepted match in one pass,
/// and which mapping took each of them.
#[derive(Debug, Default)]
pub struct MatchClaims {
    owners: BTreeMap<OpId, String>,
}

impl MatchClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim all operators of `m` for `owner`, or return the already-claimed
    /// ones it overlaps together with their owners. A failed claim takes nothing.
    pub fn try_claim(&mut self, owner: &str, m: &SubplanMatch) -> Result<(), Vec<(OpId, String)>> {
        let taken: Vec<(OpId, String)> = m
            .operators()
            .iter()
            .filter_map(|id| self.owners.get(id).map(|o| (*id, o.clone())))
            .collect();
        if !taken.is_empty() {
            return Err(taken);
        }
        for id in m.operators() {
            self.owners.insert(*id, owner.to_string());
        }
        Ok(())
    }

    pub fn is_claimed(&self, id: OpId) -> bool {
        self.owners.contains_key(&id)
    }

    /// Mapping that claimed `id`, if any.
    pub fn owner(&self, id: OpId) -> Option<&str> {
        self.owners.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
