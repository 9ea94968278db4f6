/*!

  Embedded programs: what runs when no image is given, and the scheduled
  demonstration block for the multi-unit core.

  The single-unit bootstrap is the classic three-words-per-character loop:
  materialize a character with an immediate add against the zero constant,
  request the put-character service, repeat. The multi-unit block is more
  interesting: the ALU stream assembles the message out of belt arithmetic
  while the flow stream drains it one character per cycle, with elide counts
  hand-balanced so the ALU pipeline idles exactly until the final return.

*/

use crate::belt::Cond;
use crate::bytecode::{
  args_word, BranchOffset, Dialect, TickInstruction, TickOp, TockInstruction, Word
};
use crate::machine::Machine;

fn immediate(dialect: Dialect, opcode: TickOp, lhs: u8, imm: u32, elide: u8) -> Word {
  TickInstruction::Immediate { opcode, lhs, imm, slow: false, elide }.encode(dialect)
}

/// The `Linear` hello-world bootstrap: 14 characters, each an ADDI against
/// the zero constant followed by a put-character interrupt.
pub fn hello_world() -> Machine {
  const TEXT: &[u8] = b"Hello, World!\n";
  const D: Dialect = Dialect::Linear;

  let mut machine = Machine::new(3 * TEXT.len() + 3);
  let mut address = 0;

  for (index, character) in TEXT.iter().enumerate() {
    machine.memory[address] =
      immediate(D, TickOp::AddI, 30, *character as u32, 0);
    let mut interrupt = TockInstruction::Int {
      cond: Cond::Always, src: 0, num: 2, ret: 0, slow: false, elide: 0
    }.encode(D);
    if index == TEXT.len() - 1 {
      // Keep the stream on tock so the return below is reached directly.
      interrupt |= 0x8000_0000;
    }
    machine.memory[address + 1] = interrupt;
    machine.memory[address + 2] = args_word(&[31, 0]);
    address += 3;
  }

  // Return from the bottommost frame: quit.
  machine.memory[address] = TockInstruction::Ret {
    cond: Cond::Always, src: 0, num: 0, elide: 0
  }.encode(D);
  // A restart lands on a tick, so a NOP precedes the loop-back jump.
  machine.memory[address + 1] = TickInstruction::Nop { elide: 0 }.encode(D);
  machine.memory[address + 2] = TockInstruction::JmpI {
    cond: Cond::Always, src: 0, offset: BranchOffset::Inline(0), elide: 0
  }.encode(D);

  machine.frames[0].pc = 0;
  machine.frames[0].entry_point = 0;
  machine
}

/**
  The `Mill` demonstration block: hello world scheduled for a 2-ALU, 1-flow
  core. Entry is in the middle; the ALU stream climbs from it while the
  flow stream descends, reading each interrupt's ARGS word beneath it.
*/
pub fn mill_demo() -> Machine {
  const D: Dialect = Dialect::Mill;

  let int = |elide: u8| -> Word {
    TockInstruction::Int {
      cond: Cond::Always, src: 0, num: 2, ret: 0, slow: false, elide
    }.encode(D)
  };
  let addi = |lhs: u8, imm: i32| immediate(D, TickOp::AddI, lhs, imm as u32, 0);
  let subi = |lhs: u8, imm: i32| immediate(D, TickOp::SubI, lhs, imm as u32, 0);

  let mut machine = Machine::new(43);

  // Flow stream, executed top-down from address 30.
  machine.memory[0] = TockInstruction::JmpI {
    cond: Cond::Always, src: 0, offset: BranchOffset::Inline(0), elide: 0
  }.encode(D);
  machine.memory[1] = TockInstruction::Ret {
    cond: Cond::Always, src: 0, num: 0, elide: 0
  }.encode(D);
  machine.memory[2]  = args_word(&[31, 0]); // '\n'
  machine.memory[3]  = int(0);
  machine.memory[4]  = args_word(&[31, 1]); // '!'
  machine.memory[5]  = int(1);
  machine.memory[6]  = args_word(&[31, 2]); // 'd'
  machine.memory[7]  = int(3);
  machine.memory[8]  = args_word(&[31, 8]); // 'l'
  machine.memory[9]  = int(0);
  machine.memory[10] = args_word(&[31, 3]); // 'r'
  machine.memory[11] = int(0);
  machine.memory[12] = args_word(&[31, 7]); // 'o'
  machine.memory[13] = int(0);
  machine.memory[14] = args_word(&[31, 4]); // 'W'
  machine.memory[15] = int(0);
  machine.memory[16] = args_word(&[31, 6]); // ' '
  machine.memory[17] = int(1);
  machine.memory[18] = args_word(&[31, 5]); // ','
  machine.memory[19] = int(3);
  machine.memory[20] = args_word(&[31, 5]); // 'o'
  machine.memory[21] = int(3);
  machine.memory[22] = args_word(&[31, 4]); // 'l'
  machine.memory[23] = int(0);
  machine.memory[24] = args_word(&[31, 2]); // 'l'
  machine.memory[25] = int(0);
  machine.memory[26] = args_word(&[31, 1]); // 'e'
  machine.memory[27] = int(0);
  machine.memory[28] = args_word(&[31, 0]); // 'H'
  machine.memory[29] = int(0);
  machine.memory[30] = TockInstruction::Nop { elide: 0 }.encode(D);

  // ALU stream, two instructions per cycle from the entry point.
  machine.memory[31] = immediate(D, TickOp::OrI, 30, b'H' as u32, 0);
  machine.memory[32] = TickInstruction::Nop { elide: 0 }.encode(D);
  machine.memory[33] = addi(0, 29);          // 'H' + 29 = 'e'
  machine.memory[34] = addi(0, 36);          // 'H' + 36 = 'l'
  machine.memory[35] = addi(0, 3);           // 'l' + 3  = 'o'
  machine.memory[36] = immediate(D, TickOp::XorI, 2, b'h' as u32, 0); // ' '
  machine.memory[37] = addi(0, 12);          // ' ' + 12 = ','
  machine.memory[38] = addi(4, 15);          // 'H' + 15 = 'W'
  machine.memory[39] = addi(3, 3);           // 'o' + 3  = 'r'
  machine.memory[40] = subi(5, 1);           // 'e' - 1  = 'd'
  machine.memory[41] = addi(4, 1);           // ' ' + 1  = '!'
  machine.memory[42] = subi(4, 22);          // ' ' - 22 = '\n'

  let entry = 31;
  machine.frames[0].pc = entry;
  machine.frames[0].flow_pc = entry;
  machine.frames[0].entry_point = entry;
  machine
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::Buffered;
  use crate::interp::Interp;

  #[test]
  fn hello_world_runs_to_completion() {
    let mut machine = hello_world();
    let mut host = Buffered::new();
    Interp::new(&mut machine, &mut host).run();
    assert!(machine.stop, "the bottom-frame return must stop the machine");
    assert!(!machine.invalid_op);
    assert_eq!(host.output(), "Hello, World!\n");
  }

  #[test]
  fn bootstrap_memory_is_well_formed() {
    let machine = hello_world();
    // Every third word wears the ARGS tag.
    for index in 0..14 {
      assert_eq!(machine.memory[3 * index + 2] & 0x1F, 0x10);
    }
    let machine = mill_demo();
    assert_eq!(machine.frames[0].pc, 31);
    assert_eq!(machine.memory[30], 0);
  }
}
