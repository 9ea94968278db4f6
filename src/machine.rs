/*!

  Structures for the machine state: call frames and the machine itself.

  A `Frame` is one call activation. It owns two belts, the program counters,
  and the record needed to route a callee's return values back onto the
  right belt. Frames form a LIFO; the innermost frame is the last element of
  `Machine::frames`, and only the innermost frame executes.

  The `Machine` owns memory exclusively. Cores borrow it for the duration of
  a run; nothing here knows how instructions are dispatched.

*/

use std::fmt::{Display, Formatter};

use prettytable::{format as TableFormat, Table};

use crate::belt::{Belt, BeltKind, BeltValue, BELT_SIZE};
use crate::bytecode::{MemWidth, Word};
use crate::station::RetireStation;

/// One call activation.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Frame {
  pub fast : Belt,
  pub slow : Belt,

  /// The program counter; the ALU-stream counter in the multi-unit core.
  pub pc          : usize,
  /// The flow-stream counter. Unused by the single-unit core.
  pub flow_pc     : usize,
  /// The destination of the last branch or call; the origin for pc-relative
  /// displacements.
  pub entry_point : usize,
  /// The call word that created the frame above this one. Routes RET values
  /// to the right belt and, in the single-unit core, restores the stream
  /// toggle.
  pub call_op     : Word,

  // Multi-unit core state. Stations are frame-owned so a calling frame's
  // unapplied flow work survives until its callee returns.
  /// Flow-station index at which retirement resumes after a return.
  pub resume_slot   : usize,
  /// Pending NOPs in the ALU pipeline, fed by flow elide counts.
  pub alu_stall     : u32,
  /// Pending NOPs in the flow pipeline, fed by ALU elide counts.
  pub flow_stall    : u32,
  pub alu_stations  : Vec<RetireStation>,
  pub flow_stations : Vec<RetireStation>,
}

impl Frame {
  pub fn new() -> Frame {
    Frame {
      fast          : Belt::new(BeltKind::Fast),
      slow          : Belt::new(BeltKind::Slow),
      pc            : 0,
      flow_pc       : 0,
      entry_point   : 0,
      call_op       : 0,
      resume_slot   : 0,
      alu_stall     : 0,
      flow_stall    : 0,
      alu_stations  : Vec::new(),
      flow_stations : Vec::new(),
    }
  }

  /**
    Reads the six-bit operand space: positions 0–31 address the fast belt,
    32–63 the slow belt. The constant positions and the beyond-fill rule are
    the belts' own business.
  */
  pub fn read_belt(&self, position: usize) -> BeltValue {
    match 0 == (position & BELT_SIZE) {
      true  => self.fast.read(position & (BELT_SIZE - 1)),
      false => self.slow.read(position & (BELT_SIZE - 1)),
    }
  }

  /// Retires one value to the chosen belt.
  pub fn retire(&mut self, value: BeltValue, slow: bool) {
    match slow {
      false => self.fast.push(value),
      true  => self.slow.push(value),
    }
  }
}

impl Default for Frame {
  fn default() -> Frame {
    Frame::new()
  }
}

impl Display for Frame {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let fast_table = make_belt_table("fast", &self.fast);
    let slow_table = make_belt_table("slow", &self.slow);

    let mut combined = table!([fast_table, slow_table]);
    combined.set_titles(row![ub->"Fast Belt", ub->"Slow Belt"]);
    combined.set_format(*TABLE_DISPLAY_FORMAT);

    write!(
      f,
      "pc: {}  flowpc: {}  entry: {}\n{}",
      self.pc, self.flow_pc, self.entry_point, combined
    )
  }
}

/// Renders the addressable prefix of a belt, youngest first.
fn make_belt_table(name: &str, belt: &Belt) -> Table {
  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(row![ubr->"Position", ubl->"Contents"]);
  for position in 0..belt.len() {
    table.add_row(row![r->format!("{}[{}] =", name, position),
                       format!("{}", belt.read(position))]);
  }
  table
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}


/// A memory store fault. Stores are the one access whose failure terminates
/// the machine, so they report instead of returning a tagged value.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StoreFault {
  OutOfBounds,
}

/// The machine: word-indexed memory and the frame stack, plus the two latch
/// flags that record why a run ended.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Machine {
  pub memory     : Vec<Word>,
  pub frames     : Vec<Frame>,
  pub invalid_op : bool,
  pub stop       : bool,
}

impl Machine {
  /// A machine with zeroed memory and a single bottom frame.
  pub fn new(memsize: usize) -> Machine {
    Machine {
      memory     : vec![0; memsize],
      frames     : vec![Frame::new()],
      invalid_op : false,
      stop       : false,
    }
  }

  pub fn memsize(&self) -> usize {
    self.memory.len()
  }

  /// The innermost frame. The stack is never empty.
  pub fn frame(&self) -> &Frame {
    self.frames.last().unwrap()
  }

  pub fn frame_mut(&mut self) -> &mut Frame {
    self.frames.last_mut().unwrap()
  }

  pub fn halted(&self) -> bool {
    self.invalid_op || self.stop
  }

  /**
    Reads a memory word as a belt value. Out-of-bounds reads yield a bare
    `INVALID`; the caller decides whether that is a fetch fault, a load that
    tags the pc, or survivable.
  */
  pub fn get_memory(&self, location: u64) -> BeltValue {
    match self.memory.get(location as usize) {
      Some(word) => BeltValue(*word as i64),
      None       => BeltValue(BeltValue::INVALID),
    }
  }

  /// Writes a memory word. Out-of-bounds stores fault.
  pub fn set_memory(&mut self, location: u64, value: Word) -> Result<(), StoreFault> {
    match self.memory.get_mut(location as usize) {
      Some(slot) => {
        *slot = value;
        Ok(())
      }
      None => Err(StoreFault::OutOfBounds),
    }
  }

  /**
    A load of the given width through a raw address payload. Sub-word loads
    read the containing word and sign-extend the selected lane. `None` means
    the access missed memory; the caller retires `INVALID` tagged with its
    own pc.
  */
  pub fn load_access(&self, address: u32, width: MemWidth) -> Option<BeltValue> {
    let word = self.get_memory((address >> width.index_shift()) as u64);
    if word.has(BeltValue::INVALID) {
      return None;
    }
    let raw = word.raw();
    let value = match width {
      MemWidth::Word => raw,
      MemWidth::Half => {
        let lane = (raw >> (16 * (address & 1) as i64)) & 0xFFFF;
        match 0 != (lane & 0x8000) {
          true  => lane | 0xFFFF_0000,
          false => lane
        }
      }
      MemWidth::Byte => {
        let lane = (raw >> (8 * (address & 3) as i64)) & 0xFF;
        match 0 != (lane & 0x80) {
          true  => lane | 0xFFFF_FF00,
          false => lane
        }
      }
    };
    Some(BeltValue(value).with_zero())
  }

  /**
    A store of the given width through a raw address payload. Sub-word
    stores read-modify-write their containing word.
  */
  pub fn store_access(
    &mut self,
    address: u32,
    value: u32,
    width: MemWidth
  ) -> Result<(), StoreFault> {
    let location = (address >> width.index_shift()) as u64;
    match width {
      MemWidth::Word => self.set_memory(location, value),
      MemWidth::Half => {
        let current = self.get_memory(location);
        if current.has(BeltValue::INVALID) {
          return Err(StoreFault::OutOfBounds);
        }
        let shift = 16 * (address & 1);
        let merged = (current.payload() & !(0xFFFF << shift))
          | ((value & 0xFFFF) << shift);
        self.set_memory(location, merged)
      }
      MemWidth::Byte => {
        let current = self.get_memory(location);
        if current.has(BeltValue::INVALID) {
          return Err(StoreFault::OutOfBounds);
        }
        let shift = 8 * (address & 3);
        let merged = (current.payload() & !(0xFF << shift))
          | ((value & 0xFF) << shift);
        self.set_memory(location, merged)
      }
    }
  }
}

impl Display for Machine {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    writeln!(
      f,
      "memsize: {}  frames: {}  invalidOp: {}  stop: {}",
      self.memsize(), self.frames.len(), self.invalid_op, self.stop
    )?;
    write!(f, "{}", self.frame())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operand_space_splits_at_bit_five() {
    let mut frame = Frame::new();
    frame.retire(BeltValue::numeric(7), false);
    frame.retire(BeltValue::numeric(9), true);
    assert_eq!(frame.read_belt(0).payload(), 7);
    assert_eq!(frame.read_belt(32).payload(), 9);
    // The four constant positions.
    assert_eq!(frame.read_belt(30), BeltValue(BeltValue::ZERO));
    assert_eq!(frame.read_belt(31), BeltValue(1));
    assert_eq!(frame.read_belt(62), BeltValue(BeltValue::INVALID));
    assert_eq!(frame.read_belt(63), BeltValue(BeltValue::TRANSIENT));
  }

  #[test]
  fn memory_bounds() {
    let mut machine = Machine::new(4);
    assert_eq!(machine.get_memory(3).raw(), 0);
    assert!(machine.get_memory(4).has(BeltValue::INVALID));
    assert!(machine.set_memory(3, 12).is_ok());
    assert_eq!(machine.get_memory(3).raw(), 12);
    assert_eq!(machine.set_memory(4, 1), Err(StoreFault::OutOfBounds));
  }

  #[test]
  fn half_and_byte_loads_sign_extend() {
    let mut machine = Machine::new(2);
    machine.memory[0] = 0x8000_7FFF;
    // Low half is positive, high half negative.
    assert_eq!(machine.load_access(0, MemWidth::Half).unwrap().payload(), 0x7FFF);
    assert_eq!(machine.load_access(1, MemWidth::Half).unwrap().payload(), 0xFFFF_8000);
    machine.memory[1] = 0x0000_0080;
    assert_eq!(machine.load_access(4, MemWidth::Byte).unwrap().payload(), 0xFFFF_FF80);
    assert_eq!(machine.load_access(5, MemWidth::Byte).unwrap().payload(), 0);
    assert!(machine.load_access(5, MemWidth::Byte).unwrap().has(BeltValue::ZERO));
    // Word addressing scales by the width.
    assert!(machine.load_access(8, MemWidth::Byte).is_none());
    assert!(machine.load_access(2, MemWidth::Word).is_none());
  }

  #[test]
  fn sub_word_stores_merge() {
    let mut machine = Machine::new(1);
    machine.memory[0] = 0xAABB_CCDD;
    machine.store_access(1, 0x1122, MemWidth::Half).unwrap();
    assert_eq!(machine.memory[0], 0x1122_CCDD);
    machine.store_access(2, 0xEE, MemWidth::Byte).unwrap();
    assert_eq!(machine.memory[0], 0x11EE_CCDD);
    assert!(machine.store_access(4, 0, MemWidth::Word).is_err());
  }
}
