//! Consistency checks for plans.
//!
//! Cheap enough to run after every epoch in debug builds (see
//! `PlannerConfig::verify_rewrites`) and after every mutation in tests.

use crossplan_core::Error as CoreError;

use crate::error::{PlanError, Result};
use crate::plan::Plan;
use crate::slot::{InputRef, OutputRef};

fn broken(msg: String) -> PlanError {
    PlanError::Core(CoreError::Invariant(msg))
}

/// Check owner back-references and bidirectional slot consistency.
pub fn check_consistency(plan: &Plan) -> Result<()> {
    for (id, op) in plan.operators() {
        if op.id() != Some(id) {
            return Err(broken(format!("{op} is stored under {id}")));
        }

        for (j, slot) in op.inputs().iter().enumerate() {
            let here = InputRef::new(id, j);
            if slot.owner() != Some(id) {
                return Err(broken(format!("{here} has owner {:?}", slot.owner())));
            }
            if let Some(occupant) = slot.occupant() {
                let out = plan
                    .operator(occupant.op)
                    .and_then(|o| o.output(occupant.index))
                    .map_err(|_| broken(format!("{here} is occupied by missing {occupant}")))?;
                let listed = out.occupied_slots().iter().filter(|i| **i == here).count();
                if listed != 1 {
                    return Err(broken(format!("{occupant} lists {here} {listed} time(s)")));
                }
            }
        }

        for (i, slot) in op.outputs().iter().enumerate() {
            let here = OutputRef::new(id, i);
            if slot.owner() != Some(id) {
                return Err(broken(format!("{here} has owner {:?}", slot.owner())));
            }
            for consumer in slot.occupied_slots() {
                let input = plan
                    .operator(consumer.op)
                    .and_then(|o| o.input(consumer.index))
                    .map_err(|_| broken(format!("{here} feeds missing {consumer}")))?;
                if input.occupant() != Some(here) {
                    return Err(broken(format!(
                        "{here} lists {consumer}, whose occupant is {:?}",
                        input.occupant()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Panicking variant for tests and debug assertions.
pub fn assert_consistent(plan: &Plan) {
    if let Err(e) = check_consistency(plan) {
        panic!("inconsistent plan: {e}");
    }
}
