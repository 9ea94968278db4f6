/*!

  Per-slot execution: one issued instruction in, one retire station out.

  A unit only ever reads the machine: the current frame's belts for
  operands, memory for loads. Everything it wants done lands in its own
  station: values, buffered stores, branch targets, call/return/interrupt
  intents, faults. That read-only discipline is what lets the parallel
  driver run every unit concurrently against one shared borrow.

*/

use crate::alu::execute_tick;
use crate::belt::BeltValue;
use crate::bytecode::{
  BranchOffset, TickInstruction, TockInstruction, Word, ARGS_SLOT_COUNT
};
use crate::exnum::propagate1;
use crate::machine::{Frame, Machine};
use crate::station::{FlowIntent, PendingStore, RetireStation, UnitFault};

/// What the issue phase handed a unit for this cycle.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum UnitWork {
  /// Stalled pipeline: the unit sits the cycle out.
  Idle,
  Alu {
    instruction : TickInstruction,
    pc          : usize,
  },
  Flow {
    instruction : TockInstruction,
    pc          : usize,
    /// Raw extension words fetched below the instruction, outermost first.
    ext         : Vec<Word>,
  },
  /// The fetch or decode itself failed; the fault retires in slot order.
  Fault {
    fault: UnitFault
  },
}

/// Executes one unit's work against the pre-cycle machine state.
pub fn execute_unit(machine: &Machine, work: &UnitWork) -> RetireStation {
  let mut station = RetireStation::default();

  match work {
    UnitWork::Idle => {}

    UnitWork::Fault { fault } => {
      station.fault = Some(*fault);
    }

    UnitWork::Alu { instruction, pc } => {
      let effect = execute_tick(instruction, machine.frame(), *pc);
      for value in effect.values {
        station.produce(value, effect.slow);
      }
      station.nops = effect.elide;
    }

    UnitWork::Flow { instruction, pc, ext } => {
      execute_flow(machine, *instruction, *pc, ext, &mut station);
      station.ext_words = ext.len() as u32;
    }
  }

  station
}

fn execute_flow(
  machine     : &Machine,
  instruction : TockInstruction,
  pc          : usize,
  ext         : &[Word],
  station     : &mut RetireStation
) {
  let frame = machine.frame();
  station.nops = instruction.elide();

  match instruction {
    TockInstruction::Nop { .. } => {}

    TockInstruction::Args { .. } => {
      station.fault = Some(UnitFault::InvalidOperation { pc });
    }

    TockInstruction::Jmp { cond, src, target } => {
      let src = frame.read_belt(src as usize);
      let op1 = frame.read_belt(target as usize);
      if op1.has(BeltValue::TRANSIENT) && cond.holds(src) {
        match op1.has(BeltValue::INVALID) {
          true  => station.fault = Some(UnitFault::BranchToInvalid { pc }),
          false => station.branch = Some(
            (op1.payload() as usize).wrapping_add(frame.entry_point) & 0xFFFF_FFFF
          ),
        }
      }
    }

    TockInstruction::Load { width, cond, src, addr, slow, .. } => {
      let src = frame.read_belt(src as usize);
      match cond.holds(src) {
        true => {
          let op1 = frame.read_belt(addr as usize);
          let value = match propagate1(op1) {
            Some(marker) => marker,
            None => match machine.load_access(op1.payload(), width) {
              Some(value) => value,
              None        => BeltValue::invalid_at(pc),
            }
          };
          station.produce(value, slow);
        }
        false => station.produce(BeltValue::transient_at(pc), slow),
      }
    }

    TockInstruction::Store { width, cond, src, addr, value, .. } => {
      let src = frame.read_belt(src as usize);
      let op1 = frame.read_belt(addr as usize);
      let op2 = frame.read_belt(value as usize);
      if 0 == ((op1.raw() | op2.raw()) & BeltValue::TRANSIENT) && cond.holds(src) {
        if 0 != ((op1.raw() | op2.raw()) & BeltValue::INVALID) {
          station.fault = Some(UnitFault::StoreOfInvalid { pc });
          return;
        }
        let address = op1.payload();
        // Bounds are checked now, while the memory is readable; the write
        // itself is buffered until retirement.
        if (address >> width.index_shift()) as usize >= machine.memsize() {
          station.fault = Some(UnitFault::StoreToInvalid { pc });
          return;
        }
        station.stores.push(PendingStore { address, value: op2.payload(), width });
      }
    }

    TockInstruction::Canon { cond, src, num, slow, .. } => {
      let src = frame.read_belt(src as usize);
      if cond.holds(src) {
        match gather(frame, ext, num as usize, pc) {
          Ok(values) => {
            station.gathered = values;
            station.intent = FlowIntent::Canon { slow };
          }
          Err(fault) => station.fault = Some(fault),
        }
      }
    }

    TockInstruction::Ret { cond, src, num, .. } => {
      let src = frame.read_belt(src as usize);
      if cond.holds(src) {
        match gather(frame, ext, num as usize, pc) {
          Ok(values) => {
            station.gathered = values;
            station.intent = FlowIntent::Ret;
          }
          Err(fault) => station.fault = Some(fault),
        }
      }
    }

    TockInstruction::JmpI { cond, src, offset, .. } => {
      let src = frame.read_belt(src as usize);
      if cond.holds(src) {
        match offset {
          BranchOffset::Inline(displacement) => {
            station.branch =
              Some(frame.entry_point.wrapping_add(displacement as usize));
          }
          // The extension-word form belongs to the other dialect.
          BranchOffset::Extension => {
            station.fault = Some(UnitFault::InvalidOperation { pc });
          }
        }
      }
    }

    TockInstruction::CallI { cond, src, num, ret, offset, slow, .. } => {
      let src = frame.read_belt(src as usize);
      match cond.holds(src) {
        true => {
          let displacement = match offset {
            BranchOffset::Inline(displacement) => displacement,
            BranchOffset::Extension => {
              station.fault = Some(UnitFault::InvalidOperation { pc });
              return;
            }
          };
          match gather(frame, ext, num as usize, pc) {
            Ok(values) => {
              station.gathered = values;
              station.intent = FlowIntent::Call {
                entry: frame.entry_point.wrapping_add(displacement as usize),
                ret,
              };
            }
            Err(fault) => station.fault = Some(fault),
          }
        }
        false => {
          for _ in 0..ret {
            station.produce(BeltValue::transient_at(pc), slow);
          }
        }
      }
    }

    TockInstruction::Call { cond, src, target, num, ret, slow, .. } => {
      let src = frame.read_belt(src as usize);
      let op1 = frame.read_belt(target as usize);
      if op1.has(BeltValue::TRANSIENT) && cond.holds(src) {
        if op1.has(BeltValue::INVALID) {
          station.fault = Some(UnitFault::BranchToInvalid { pc });
          return;
        }
        match gather(frame, ext, num as usize, pc) {
          Ok(values) => {
            station.gathered = values;
            station.intent = FlowIntent::Call {
              entry: (op1.payload() as usize)
                .wrapping_add(frame.entry_point) & 0xFFFF_FFFF,
              ret,
            };
          }
          Err(fault) => station.fault = Some(fault),
        }
      } else {
        let marker = match op1.has(BeltValue::TRANSIENT) {
          true  => op1,
          false => BeltValue::transient_at(pc),
        };
        for _ in 0..ret {
          station.produce(marker, slow);
        }
      }
    }

    TockInstruction::Int { cond, src, num, ret, slow, .. } => {
      let src = frame.read_belt(src as usize);
      match cond.holds(src) {
        true => {
          match gather(frame, ext, num as usize, pc) {
            Ok(values) => {
              station.gathered = values;
              station.intent = FlowIntent::Interrupt { slow };
            }
            Err(fault) => station.fault = Some(fault),
          }
        }
        false => {
          for _ in 0..ret {
            station.produce(BeltValue::transient_at(pc), slow);
          }
        }
      }
    }
  }
}

/// Reads `num` belt operands out of the pre-fetched ARGS words. The words
/// must wear the ARGS tag; anything else is a program bug surfaced as an
/// invalid operation.
fn gather(
  frame : &Frame,
  ext   : &[Word],
  num   : usize,
  pc    : usize
) -> Result<Vec<BeltValue>, UnitFault> {
  let mut gathered = Vec::with_capacity(num);
  for i in 0..num {
    let word = match ext.get(i / ARGS_SLOT_COUNT) {
      Some(word) => *word,
      None       => return Err(UnitFault::InvalidOperation { pc }),
    };
    if 0x10 != (word & 0x1F) {
      return Err(UnitFault::InvalidOperation { pc });
    }
    let slot = (word >> (5 + 6 * (i % ARGS_SLOT_COUNT))) & 0x3F;
    gathered.push(frame.read_belt(slot as usize));
  }
  Ok(gathered)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::belt::Cond;
  use crate::bytecode::{args_word, MemWidth};

  fn machine_with_belt(values: &[BeltValue]) -> Machine {
    let mut machine = Machine::new(8);
    for value in values {
      machine.frame_mut().retire(*value, false);
    }
    machine
  }

  fn flow(machine: &Machine, instruction: TockInstruction, pc: usize, ext: &[Word])
    -> RetireStation
  {
    execute_unit(machine, &UnitWork::Flow { instruction, pc, ext: ext.to_vec() })
  }

  #[test]
  fn register_jump_needs_transient_provenance() {
    let mut machine = machine_with_belt(&[BeltValue::transient_at(6)]);
    machine.frame_mut().entry_point = 10;
    let jmp = TockInstruction::Jmp { cond: Cond::Always, src: 31, target: 0 };

    let station = flow(&machine, jmp, 2, &[]);
    assert_eq!(station.branch, Some(16));
    assert_eq!(station.fault, None);

    // A plain numeric target is silently not a jump.
    let machine = machine_with_belt(&[BeltValue::numeric(6)]);
    let station = flow(&machine, jmp, 2, &[]);
    assert_eq!(station.branch, None);
    assert_eq!(station.fault, None);

    // A target carrying INVALID on top of TRANSIENT is a trap.
    let poisoned = BeltValue(BeltValue::TRANSIENT | BeltValue::INVALID | 6);
    let machine = machine_with_belt(&[poisoned]);
    let station = flow(&machine, jmp, 2, &[]);
    assert_eq!(station.fault, Some(UnitFault::BranchToInvalid { pc: 2 }));
  }

  #[test]
  fn register_call_gathers_and_targets_like_a_jump() {
    // The callee address rides a TRANSIENT provenance value, offset from
    // the entry point; arguments come off the ARGS extension.
    let mut machine = machine_with_belt(&[
      BeltValue::numeric(7),
      BeltValue::transient_at(20),
    ]);
    machine.frame_mut().entry_point = 100;
    let call = TockInstruction::Call {
      cond: Cond::Always, src: 31, target: 0, num: 1, ret: 1,
      slow: false, elide: 0
    };
    let station = flow(&machine, call, 5, &[args_word(&[1])]);
    assert_eq!(station.intent, FlowIntent::Call { entry: 120, ret: 1 });
    assert_eq!(station.gathered, vec![BeltValue::numeric(7)]);

    // A numeric target skips the call and keeps the belt shape with a
    // fresh marker.
    let machine = machine_with_belt(&[BeltValue::numeric(3)]);
    let station = flow(&machine, call, 5, &[args_word(&[1])]);
    assert_eq!(station.intent, FlowIntent::None);
    assert_eq!(station.fast, vec![BeltValue::transient_at(5)]);

    // A TRANSIENT target that failed its own condition is reused verbatim.
    let skip = TockInstruction::Call {
      cond: Cond::Zero, src: 31, target: 0, num: 1, ret: 2,
      slow: false, elide: 0
    };
    let machine = machine_with_belt(&[BeltValue::transient_at(44)]);
    let station = flow(&machine, skip, 5, &[args_word(&[1])]);
    assert_eq!(station.fast, vec![
      BeltValue::transient_at(44),
      BeltValue::transient_at(44),
    ]);
  }

  #[test]
  fn loads_are_read_only_and_stores_buffer() {
    let mut machine = machine_with_belt(&[BeltValue::numeric(3)]);
    machine.memory[3] = 77;
    let load = TockInstruction::Load {
      width: MemWidth::Word, cond: Cond::Always, src: 31, addr: 0,
      slow: false, elide: 0
    };
    let station = flow(&machine, load, 1, &[]);
    assert_eq!(station.fast[0].payload(), 77);

    let store = TockInstruction::Store {
      width: MemWidth::Word, cond: Cond::Always, src: 31, addr: 0, value: 0,
      elide: 0
    };
    let station = flow(&machine, store, 1, &[]);
    assert_eq!(station.stores.len(), 1);
    assert_eq!(station.stores[0].address, 3);
    assert_eq!(station.stores[0].value, 3);
    // Nothing hit memory yet.
    assert_eq!(machine.memory[3], 77);
  }

  #[test]
  fn out_of_range_store_faults_at_execute() {
    let machine = machine_with_belt(&[BeltValue::numeric(64)]);
    let store = TockInstruction::Store {
      width: MemWidth::Word, cond: Cond::Always, src: 31, addr: 0, value: 0,
      elide: 0
    };
    let station = flow(&machine, store, 4, &[]);
    assert_eq!(station.fault, Some(UnitFault::StoreToInvalid { pc: 4 }));
    assert!(station.stores.is_empty());
  }

  #[test]
  fn gather_reads_the_operand_list() {
    let machine = machine_with_belt(&[
      BeltValue::numeric(10),
      BeltValue::numeric(20),
    ]);
    let ret = TockInstruction::Ret { cond: Cond::Always, src: 0, num: 3, elide: 0 };
    // Gather belt[1], the constant one, belt[0].
    let station = flow(&machine, ret, 0, &[args_word(&[1, 31, 0])]);
    assert_eq!(station.intent, FlowIntent::Ret);
    assert_eq!(station.gathered.len(), 3);
    assert_eq!(station.gathered[0].payload(), 10);
    assert_eq!(station.gathered[1].payload(), 1);
    assert_eq!(station.gathered[2].payload(), 20);

    // A missing or mistagged extension word is an invalid operation.
    let station = flow(&machine, ret, 0, &[]);
    assert_eq!(station.fault, Some(UnitFault::InvalidOperation { pc: 0 }));
    let station = flow(&machine, ret, 0, &[0]);
    assert_eq!(station.fault, Some(UnitFault::InvalidOperation { pc: 0 }));
  }

  #[test]
  fn failed_interrupt_keeps_the_belt_shape() {
    let machine = machine_with_belt(&[BeltValue::numeric(1)]);
    let int = TockInstruction::Int {
      cond: Cond::Zero, src: 0, num: 0, ret: 2, slow: true, elide: 0
    };
    let station = flow(&machine, int, 9, &[]);
    assert_eq!(station.intent, FlowIntent::None);
    assert_eq!(station.slow.len(), 2);
    assert_eq!(station.slow[0], BeltValue::transient_at(9));
  }
}
