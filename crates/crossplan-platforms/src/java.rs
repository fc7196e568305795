//! Local, single-process engine.

use crossplan_core::platform::Platform;
use crossplan_planner::mapping::Mapping;

/// Lower every logical operator kind to its Java counterpart.
pub fn mappings() -> Vec<Mapping> {
    crate::lowering(Platform::Java)
}
