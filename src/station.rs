/*!

  Retire stations: the per-unit, per-cycle scratch that decouples computing a
  result from making it visible.

  During a cycle every functional unit writes only to its own station; at
  cycle end the stations are merged onto the current frame's belts in a fixed
  order, which is what makes the multi-unit core deterministic. A station
  belongs to the frame whose instructions filled it, because a frame that
  performed a call must keep its not-yet-applied flow stations alive until
  the callee returns.

*/

use crate::belt::BeltValue;
use crate::bytecode::MemWidth;

/// What a flow unit asks the orchestrator to do when its station is applied.
/// At most one intent per station; `None` covers pure loads and stores.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub enum FlowIntent {
  #[default]
  None,
  /// Push a frame at the absolute entry point, seeding its fast belt with
  /// the gathered operands. `ret` is the declared return count of the call
  /// word, kept for the snapshot.
  Call {
    entry : usize,
    ret   : u8,
  },
  /// Pop the frame, delivering the gathered operands to the caller.
  Ret,
  /// Invoke the host service table on the gathered operands and retire
  /// whatever it returns onto the chosen belt.
  Interrupt {
    slow: bool
  },
  /// Rebase the chosen belt to exactly the gathered operands.
  Canon {
    slow: bool
  },
}

/// A store buffered during execute and applied at retirement. Buffering
/// keeps execute read-only and serializes same-address conflicts in slot
/// order.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PendingStore {
  /// The raw address payload; the width decides how it scales.
  pub address : u32,
  pub value   : u32,
  pub width   : MemWidth,
}

/// A fault latched by a unit, applied (and thereby ordered) at retirement.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UnitFault {
  /// Reserved opcode, standalone ARGS, or a malformed extension word.
  InvalidOperation { pc: usize },
  /// Instruction fetch from outside memory.
  InvalidProgramCounter { pc: usize },
  /// Branch or call through a value carrying INVALID.
  BranchToInvalid { pc: usize },
  /// Store of a value carrying INVALID.
  StoreOfInvalid { pc: usize },
  /// Store aimed outside memory.
  StoreToInvalid { pc: usize },
  /// Unknown host service code.
  InvalidInterrupt { code: u32 },
}

impl UnitFault {
  pub fn describe(&self) -> String {
    match self {
      UnitFault::InvalidOperation { pc } =>
        format!("invalid operation: {}", pc),
      UnitFault::InvalidProgramCounter { pc } =>
        format!("invalid program counter: {}", pc),
      UnitFault::BranchToInvalid { pc } =>
        format!("branch to invalid: {}", pc),
      UnitFault::StoreOfInvalid { pc } =>
        format!("store of invalid: {}", pc),
      UnitFault::StoreToInvalid { pc } =>
        format!("store to invalid: {}", pc),
      UnitFault::InvalidInterrupt { code } =>
        format!("invalid interrupt: {}", code),
    }
  }
}

/**
  One unit's output for one cycle. Everything a unit may produce is here and
  nowhere else: belt values split by destination, a NOP count for the
  opposite pipeline, and, for flow units, a branch target, an intent, the
  operand-fetch belt, buffered stores, and the count of extension words the
  instruction consumed.

  `Default` is the cleared state the core resets every station to at issue.
  In the snapshot codec, vacant value slots are padded with the `EMPTY`
  sentinel, the only place that flag appears.
*/
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct RetireStation {
  pub fast      : Vec<BeltValue>,
  pub slow      : Vec<BeltValue>,
  /// Elide count declared by the executed instruction: NOPs queued for the
  /// opposite pipeline.
  pub nops      : u8,
  /// Absolute entry point a non-call branch wants to establish.
  pub branch    : Option<usize>,
  pub intent    : FlowIntent,
  /// The operand-fetch belt: values gathered through ARGS words.
  pub gathered  : Vec<BeltValue>,
  pub stores    : Vec<PendingStore>,
  /// Extension words (ARGS, displacement words) consumed by the
  /// instruction; the flow pc advances past them.
  pub ext_words : u32,
  pub fault     : Option<UnitFault>,
}

impl RetireStation {
  pub fn clear(&mut self) {
    *self = RetireStation::default();
  }

  /// Queue a value for the chosen destination belt.
  pub fn produce(&mut self, value: BeltValue, slow: bool) {
    match slow {
      false => self.fast.push(value),
      true  => self.slow.push(value),
    }
  }

  pub fn is_clear(&self) -> bool {
    *self == RetireStation::default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cleared_station_is_default() {
    let mut station = RetireStation::default();
    station.produce(BeltValue::numeric(1), false);
    station.produce(BeltValue::numeric(2), true);
    station.nops = 3;
    assert!(!station.is_clear());
    station.clear();
    assert!(station.is_clear());
  }

  #[test]
  fn produce_routes_by_destination() {
    let mut station = RetireStation::default();
    station.produce(BeltValue::numeric(1), false);
    station.produce(BeltValue::numeric(2), false);
    station.produce(BeltValue::numeric(3), true);
    assert_eq!(station.fast.len(), 2);
    assert_eq!(station.slow.len(), 1);
  }
}
