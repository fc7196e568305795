//! The plan: an arena of operators whose edges are slot occupancies.
//!
//! There is no separate edge list. `OutputSlot::occupied_slots` and
//! `InputSlot::occupant` are the edges, and every mutation below keeps the two
//! sides in agreement:
//!
//! ```text
//! input.occupant == Some(out)  <=>  out.occupied_slots contains input
//! ```
//!
//! Operator ids are handed out monotonically and never reused, so a removed
//! operator's id can only ever miss, never alias a newer operator.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crossplan_core::hash::{hash_serde, Hash256, PLAN_CONTEXT};
use crossplan_core::id::OpId;

use crate::error::{PlanError, Result};
use crate::operator::Operator;
use crate::slot::{InputRef, OutputRef};

/// Walk direction for reachability queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
    Both,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    operators: BTreeMap<OpId, Operator>,
    next_id: u64,
    /// Operators referenced from outside the graph (e.g. by the plan builder).
    pinned: BTreeSet<OpId>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an operator into the arena and return its id.
    ///
    /// The operator must not carry connections; build it fresh or take a
    /// `derive()`d copy.
    pub fn add_operator(&mut self, mut op: Operator) -> Result<OpId> {
        let connected = op.inputs().iter().any(|s| s.is_occupied())
            || op.outputs().iter().any(|s| !s.occupied_slots().is_empty());
        if connected {
            return Err(PlanError::InvalidOperator(format!(
                "{op} still carries slot connections"
            )));
        }
        let id = OpId::new(self.next_id);
        self.next_id += 1;
        op.bind(id);
        trace!(op = %op, "added operator");
        self.operators.insert(id, op);
        Ok(id)
    }

    pub fn operator(&self, id: OpId) -> Result<&Operator> {
        self.operators.get(&id).ok_or(PlanError::UnknownOperator(id))
    }

    fn operator_mut(&mut self, id: OpId) -> Result<&mut Operator> {
        self.operators.get_mut(&id).ok_or(PlanError::UnknownOperator(id))
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.operators.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Operator ids in ascending order (the planner's canonical traversal order).
    pub fn ids(&self) -> impl Iterator<Item = OpId> + '_ {
        self.operators.keys().copied()
    }

    pub fn operators(&self) -> impl Iterator<Item = (OpId, &Operator)> + '_ {
        self.operators.iter().map(|(id, op)| (*id, op))
    }

    /// Every edge as `(producer, consumer)`, ordered by producer then fan-out order.
    pub fn edges(&self) -> Vec<(OutputRef, InputRef)> {
        let mut edges = Vec::new();
        for (id, op) in &self.operators {
            for (index, out) in op.outputs().iter().enumerate() {
                for input in out.occupied_slots() {
                    edges.push((OutputRef::new(*id, index), *input));
                }
            }
        }
        edges
    }

    /// Connect `from` to `to`.
    ///
    /// Element types must be equal (`TypeMismatch`), and `to` must be vacant
    /// (`ConnectionState`). Both checks run before either slot is touched.
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<()> {
        let out_type = self.operator(from.op)?.output(from.index)?.data_type().clone();
        let input = self.operator(to.op)?.input(to.index)?;
        if *input.data_type() != out_type {
            return Err(PlanError::TypeMismatch {
                output: out_type,
                input: input.data_type().clone(),
            });
        }
        input.check_vacant(to)?;

        self.operator_mut(from.op)?.output_mut(from.index)?.attach(to);
        self.operator_mut(to.op)?
            .input_mut(to.index)?
            .set_occupant(Some(from));
        trace!(%from, %to, "connected");
        Ok(())
    }

    /// Undo `connect(from, to)`; fails unless `from` is the occupant of `to`.
    pub fn disconnect(&mut self, from: OutputRef, to: InputRef) -> Result<()> {
        self.operator(from.op)?.output(from.index)?;
        self.operator(to.op)?.input(to.index)?.check_occupied_by(to, from)?;

        self.operator_mut(from.op)?.output_mut(from.index)?.detach(to);
        self.operator_mut(to.op)?.input_mut(to.index)?.set_occupant(None);
        trace!(%from, %to, "disconnected");
        Ok(())
    }

    /// Add a structurally identical, disconnected copy of `id`.
    pub fn clone_operator(&mut self, id: OpId) -> Result<OpId> {
        let new_id = OpId::new(self.next_id);
        let copy = self.operator(id)?.copy_for(new_id);
        self.next_id += 1;
        trace!(source = %id, copy = %new_id, "cloned operator");
        self.operators.insert(new_id, copy);
        Ok(new_id)
    }

    /// Detach every slot of `id` and drop it from the arena.
    pub fn remove_operator(&mut self, id: OpId) -> Result<Operator> {
        let op = self.operator(id)?;
        let incoming: Vec<(OutputRef, InputRef)> = op
            .inputs()
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.occupant().map(|o| (o, InputRef::new(id, i))))
            .collect();
        let outgoing: Vec<(OutputRef, InputRef)> = op
            .outputs()
            .iter()
            .enumerate()
            .flat_map(|(i, s)| {
                s.occupied_slots()
                    .iter()
                    .map(move |input| (OutputRef::new(id, i), *input))
            })
            .collect();

        // A self-loop shows up on both sides; disconnect it once.
        let edges: BTreeSet<(OutputRef, InputRef)> = incoming.into_iter().chain(outgoing).collect();
        for (from, to) in edges {
            self.disconnect(from, to)?;
        }
        self.pinned.remove(&id);
        let removed = self.operators.remove(&id).ok_or(PlanError::UnknownOperator(id))?;
        trace!(op = %removed, "removed operator");
        Ok(removed)
    }

    pub fn pin(&mut self, id: OpId) -> Result<()> {
        self.operator(id)?;
        self.pinned.insert(id);
        Ok(())
    }

    pub fn unpin(&mut self, id: OpId) {
        self.pinned.remove(&id);
    }

    pub fn is_pinned(&self, id: OpId) -> bool {
        self.pinned.contains(&id)
    }

    /// True if any slot of `id` takes part in an edge.
    pub fn is_connected(&self, id: OpId) -> Result<bool> {
        let op = self.operator(id)?;
        Ok(op.inputs().iter().any(|s| s.is_occupied())
            || op.outputs().iter().any(|s| !s.occupied_slots().is_empty()))
    }

    /// Drop unpinned operators that have no connections left. Returns their ids.
    pub fn collect_detached(&mut self) -> Vec<OpId> {
        let garbage: Vec<OpId> = self
            .operators
            .iter()
            .filter(|(id, op)| {
                !self.pinned.contains(id)
                    && op.inputs().iter().all(|s| !s.is_occupied())
                    && op.outputs().iter().all(|s| s.occupied_slots().is_empty())
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &garbage {
            self.operators.remove(id);
        }
        garbage
    }

    pub fn sources(&self) -> Vec<OpId> {
        self.operators()
            .filter(|(_, op)| op.is_source())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn sinks(&self) -> Vec<OpId> {
        self.operators()
            .filter(|(_, op)| op.is_sink())
            .map(|(id, _)| id)
            .collect()
    }

    /// Immediate producers of `id`, deduplicated, ascending.
    pub fn upstream(&self, id: OpId) -> Result<Vec<OpId>> {
        let set: BTreeSet<OpId> = self
            .operator(id)?
            .inputs()
            .iter()
            .filter_map(|s| s.occupant().map(|o| o.op))
            .collect();
        Ok(set.into_iter().collect())
    }

    /// Immediate consumers of `id`, deduplicated, ascending.
    pub fn downstream(&self, id: OpId) -> Result<Vec<OpId>> {
        let set: BTreeSet<OpId> = self
            .operator(id)?
            .outputs()
            .iter()
            .flat_map(|s| s.occupied_slots().iter().map(|i| i.op))
            .collect();
        Ok(set.into_iter().collect())
    }

    /// Every operator reachable from `starts` (inclusive) following `direction`.
    ///
    /// Uses a visited set, so it terminates even if a cycle slipped in.
    pub fn reachable_from(&self, starts: &[OpId], direction: Direction) -> Result<BTreeSet<OpId>> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<OpId> = VecDeque::new();
        for s in starts {
            self.operator(*s)?;
            if seen.insert(*s) {
                queue.push_back(*s);
            }
        }
        while let Some(id) = queue.pop_front() {
            let mut next = Vec::new();
            if matches!(direction, Direction::Upstream | Direction::Both) {
                next.extend(self.upstream(id)?);
            }
            if matches!(direction, Direction::Downstream | Direction::Both) {
                next.extend(self.downstream(id)?);
            }
            for n in next {
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        Ok(seen)
    }

    /// Kahn order, ties broken by ascending id. Fails with `Cycle` on cyclic plans.
    pub fn topological_order(&self) -> Result<Vec<OpId>> {
        let mut in_degree: BTreeMap<OpId, usize> = BTreeMap::new();
        for id in self.ids() {
            in_degree.insert(id, self.upstream(id)?.len());
        }

        let mut ready: BTreeSet<OpId> = in_degree
            .iter()
            .filter_map(|(id, &deg)| if deg == 0 { Some(*id) } else { None })
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for d in self.downstream(id)? {
                if let Some(deg) = in_degree.get_mut(&d) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(d);
                    }
                }
            }
        }

        if order.len() != self.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, &deg)| deg > 0)
                .map(|(id, _)| *id)
                .ok_or_else(|| {
                    PlanError::Core(crossplan_core::Error::Invariant(
                        "topological order lost operators".into(),
                    ))
                })?;
            return Err(PlanError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Stable content hash of the whole plan (operators, slots, edges, pins).
    pub fn fingerprint(&self) -> Result<Hash256> {
        Ok(hash_serde(PLAN_CONTEXT, self)?)
    }
}
