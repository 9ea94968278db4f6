/*!

  The multi-unit dispatch core: several functional units read one instruction
  bundle per cycle, compute independently into retire stations, and have
  their results merged deterministically at cycle end.

  The cycle is a strict state machine (issue, execute, advance, retire,
  branch arbitration, terminate) and the merge order is fixed: ALU slot 0
  upward, then flow slot 0 upward, fast values before slow within a slot.
  Two drivers share the cycle functions: a serial one that runs the units
  inline, and a parallel one that gives each unit a worker thread behind a
  cycle barrier. Both produce identical machines.

*/

mod core;
mod unit;
mod parallel;

pub use self::core::{complete_cycle, execute_all, issue, MillCore};
pub use self::parallel::ParallelCore;
pub use self::unit::{execute_unit, UnitWork};

/// Shape of the core: how many slots each pipeline issues per cycle. The
/// defaults are the layout the reference program generator schedules for.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct MillConfig {
  pub alu_units  : usize,
  pub flow_units : usize,
}

impl Default for MillConfig {
  fn default() -> MillConfig {
    MillConfig { alu_units: 2, flow_units: 1 }
  }
}
