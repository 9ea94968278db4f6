/*!

  The single-unit core: one instruction word consumed per cycle, retiring
  directly onto the current frame's belts.

  The stream alternates between tick and tock unless the executed word's
  high bit is set, which pins the next word to the same stream. A taken
  branch masks that bit, so the word at a branch target is always read as a
  tick. Dispatch is a dense match on the decoded opcode; a threaded
  interpreter would be semantically equivalent, and slower to get right.

  Faults latch on the machine rather than unwinding: an invalid operation or
  fetch stops the run loop at the top of the next iteration, leaving the
  machine inspectable (and snapshottable) exactly as it died.

*/

use either::Either;
use log::{debug, error};

use crate::alu::execute_tick;
use crate::belt::BeltValue;
use crate::bytecode::{
  args_words_for, decode_word, BranchOffset, Dialect, TockInstruction, Word
};
use crate::exnum::propagate1;
use crate::host::{HostOutcome, HostService};
use crate::machine::Machine;

/// The bit of an executed word that keeps the next word in the same stream.
const STAY_BIT: Word = 0x8000_0000;

/// Drives a `Machine` through the `Linear` dialect until it stops or traps.
pub struct Interp<'a> {
  machine : &'a mut Machine,
  host    : &'a mut dyn HostService,
}

impl<'a> Interp<'a> {
  pub fn new(machine: &'a mut Machine, host: &'a mut dyn HostService) -> Interp<'a> {
    Interp { machine, host }
  }

  /**
    Runs to termination. On return the machine's latch flags say why: `stop`
    for a clean halt (bottom-frame return or a host stop request),
    `invalid_op` for a trap.
  */
  pub fn run(&mut self) {
    let mut tick = true;

    let mut word = match self.fetch(self.machine.frame().pc) {
      Some(word) => word,
      None       => return,
    };

    while !self.machine.halted() {
      #[cfg(feature = "trace_execution")]
      {
        let pc = self.machine.frame().pc;
        match decode_word(word, tick, Dialect::Linear) {
          Some(Either::Left(i))  => println!("{:6}  {}", pc, i),
          Some(Either::Right(i)) => println!("{:6}  {}", pc, i),
          None                   => println!("{:6}  <reserved {:#010X}>", pc, word),
        }
      }

      match tick {
        true  => self.exec_tick_word(word),
        false => word = self.exec_tock_word(word),
      }

      if self.machine.invalid_op {
        break;
      }
      if self.machine.stop {
        // A clean stop still steps past the halting instruction, so the
        // snapshot resumes after it.
        let frame = self.machine.frame_mut();
        frame.pc = frame.pc.wrapping_add(1);
        break;
      }

      if 0 == (word & STAY_BIT) {
        tick = !tick;
      }
      let frame = self.machine.frame_mut();
      frame.pc = frame.pc.wrapping_add(1);
      word = match self.fetch(self.machine.frame().pc) {
        Some(word) => word,
        None       => break,
      };
    }

    debug!(
      "run ended: pc {} invalidOp {} stop {}",
      self.machine.frame().pc, self.machine.invalid_op, self.machine.stop
    );
  }

  /// Fetches an instruction word, trapping an out-of-range pc.
  fn fetch(&mut self, pc: usize) -> Option<Word> {
    let word = self.machine.get_memory(pc as u64);
    if word.has(BeltValue::INVALID) {
      error!("Terminate initiated due to invalid program counter: {}", pc);
      self.machine.invalid_op = true;
      return None;
    }
    Some(word.payload())
  }

  fn trap(&mut self, reason: &str) {
    error!(
      "Terminate initiated due to {}: {}",
      reason, self.machine.frame().pc
    );
    self.machine.invalid_op = true;
  }

  fn exec_tick_word(&mut self, word: Word) {
    let instruction = match decode_word(word, true, Dialect::Linear) {
      Some(Either::Left(instruction)) => instruction,
      _ => {
        self.trap("invalid operation");
        return;
      }
    };

    let frame = self.machine.frame();
    let effect = execute_tick(&instruction, frame, frame.pc);
    let frame = self.machine.frame_mut();
    for value in effect.values {
      frame.retire(value, effect.slow);
    }
  }

  /**
    Executes one tock word. Returns the word whose stay-bit governs the next
    stream choice: usually the input, but a taken branch masks the bit and
    a return substitutes the caller's saved call word.
  */
  fn exec_tock_word(&mut self, word: Word) -> Word {
    let instruction = match decode_word(word, false, Dialect::Linear) {
      Some(Either::Right(instruction)) => instruction,
      _ => {
        self.trap("invalid operation");
        return word;
      }
    };

    let pc = self.machine.frame().pc;

    match instruction {
      TockInstruction::Nop { .. } => word,

      TockInstruction::Args { .. } => {
        // ARGS is operand data; reaching one as an instruction is a bug in
        // the program.
        self.trap("invalid operation");
        word
      }

      TockInstruction::Jmp { cond, src, target } => {
        let src = self.machine.frame().read_belt(src as usize);
        let op1 = self.machine.frame().read_belt(target as usize);
        if op1.has(BeltValue::TRANSIENT) && cond.holds(src) {
          if op1.has(BeltValue::INVALID) {
            self.trap("branch to invalid");
            return word;
          }
          let frame = self.machine.frame_mut();
          frame.entry_point =
            (op1.payload() as usize).wrapping_add(frame.entry_point) & 0xFFFF_FFFF;
          frame.pc = frame.entry_point.wrapping_sub(1);
          return word & !STAY_BIT;
        }
        word
      }

      TockInstruction::Load { width, cond, src, addr, slow, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        match cond.holds(src) {
          true => {
            let op1 = self.machine.frame().read_belt(addr as usize);
            let value = match propagate1(op1) {
              Some(marker) => marker,
              None => match self.machine.load_access(op1.payload(), width) {
                Some(value) => value,
                None        => BeltValue::invalid_at(pc),
              }
            };
            self.machine.frame_mut().retire(value, slow);
          }
          false => {
            self.machine.frame_mut().retire(BeltValue::transient_at(pc), slow);
          }
        }
        word
      }

      TockInstruction::Store { width, cond, src, addr, value, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        let op1 = self.machine.frame().read_belt(addr as usize);
        let op2 = self.machine.frame().read_belt(value as usize);
        let transient = (op1.raw() | op2.raw()) & BeltValue::TRANSIENT;
        if 0 == transient && cond.holds(src) {
          if 0 != ((op1.raw() | op2.raw()) & BeltValue::INVALID) {
            self.trap("store of invalid");
            return word;
          }
          if self.machine
                 .store_access(op1.payload(), op2.payload(), width)
                 .is_err()
          {
            self.trap("store to invalid");
          }
        }
        word
      }

      TockInstruction::Canon { cond, src, num, slow, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        match cond.holds(src) {
          true => {
            if let Some(gathered) = self.gather(num as usize) {
              let frame = self.machine.frame_mut();
              match slow {
                false => frame.fast.rebase(&gathered),
                true  => frame.slow.rebase(&gathered),
              }
            }
          }
          false => {
            self.machine.frame_mut().pc = pc + args_words_for(num as usize);
          }
        }
        word
      }

      TockInstruction::Ret { cond, src, num, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        match cond.holds(src) {
          true => {
            let gathered = match self.gather(num as usize) {
              Some(gathered) => gathered,
              None           => return word,
            };
            if self.machine.frames.len() > 1 {
              let caller = self.machine.frames.len() - 2;
              let to_slow = 0 != (self.machine.frames[caller].call_op & 0x10);
              for value in gathered {
                self.machine.frames[caller].retire(value, to_slow);
              }
              self.machine.frames.pop();
              // The caller's saved call word resumes the stream discipline.
              return self.machine.frame().call_op;
            }
            // Returning from the bottommost frame exits.
            self.machine.stop = true;
            word
          }
          false => {
            self.machine.frame_mut().pc = pc + args_words_for(num as usize);
            word
          }
        }
      }

      TockInstruction::JmpI { cond, src, offset, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        if cond.holds(src) {
          let displacement = match offset {
            BranchOffset::Inline(displacement) => displacement,
            BranchOffset::Extension => match self.jump_displacement() {
              Some(displacement) => displacement,
              None               => return word,
            }
          };
          let frame = self.machine.frame_mut();
          frame.entry_point = frame.entry_point.wrapping_add(displacement as usize);
          frame.pc = frame.entry_point.wrapping_sub(1);
          return word & !STAY_BIT;
        }
        word
      }

      TockInstruction::CallI { cond, src, num, ret, slow, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        match cond.holds(src) {
          true => {
            let displacement = match self.call_displacement() {
              Some(displacement) => displacement,
              None               => return word,
            };
            self.machine.frame_mut().call_op = word;
            let gathered = match self.gather(num as usize) {
              Some(gathered) => gathered,
              None           => return word,
            };
            let entry = self.machine.frame()
                            .entry_point.wrapping_add(displacement as usize);
            self.push_frame(entry, &gathered);
            word & !STAY_BIT
          }
          false => {
            for _ in 0..ret {
              self.machine.frame_mut().retire(BeltValue::transient_at(pc), slow);
            }
            self.machine.frame_mut().pc = pc + 1 + args_words_for(num as usize);
            word
          }
        }
      }

      TockInstruction::Call { cond, src, target, num, ret, slow, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        let op1 = self.machine.frame().read_belt(target as usize);
        if op1.has(BeltValue::TRANSIENT) && cond.holds(src) {
          if op1.has(BeltValue::INVALID) {
            self.trap("branch to invalid");
            return word;
          }
          self.machine.frame_mut().call_op = word;
          let gathered = match self.gather(num as usize) {
            Some(gathered) => gathered,
            None           => return word,
          };
          let entry = (op1.payload() as usize)
            .wrapping_add(self.machine.frame().entry_point) & 0xFFFF_FFFF;
          self.push_frame(entry, &gathered);
          word & !STAY_BIT
        } else {
          // Keep the caller's belt shape stable, preserving the target's
          // provenance when it already carries one.
          let marker = match op1.has(BeltValue::TRANSIENT) {
            true  => op1,
            false => BeltValue::transient_at(pc),
          };
          for _ in 0..ret {
            self.machine.frame_mut().retire(marker, slow);
          }
          self.machine.frame_mut().pc = pc + args_words_for(num as usize);
          word
        }
      }

      TockInstruction::Int { cond, src, num, ret, slow, .. } => {
        let src = self.machine.frame().read_belt(src as usize);
        match cond.holds(src) {
          true => {
            let gathered = match self.gather(num as usize) {
              Some(gathered) => gathered,
              None           => return word,
            };
            match self.host.request(&gathered) {
              HostOutcome::Values(values) => {
                for value in values {
                  self.machine.frame_mut().retire(value, slow);
                }
              }
              HostOutcome::Stop  => self.machine.stop = true,
              HostOutcome::Fault => self.machine.invalid_op = true,
            }
          }
          false => {
            for _ in 0..ret {
              self.machine.frame_mut().retire(BeltValue::transient_at(pc), slow);
            }
            self.machine.frame_mut().pc = pc + args_words_for(num as usize);
          }
        }
        word
      }
    }
  }

  /**
    Gathers `num` belt operands from the ARGS words following the current
    instruction, advancing the pc past them. `None` means the gather trapped:
    the extension was missing, out of range, or not an ARGS word.
  */
  fn gather(&mut self, num: usize) -> Option<Vec<BeltValue>> {
    let mut gathered = Vec::with_capacity(num);
    let mut current: Word = 0;
    for i in 0..num {
      if 0 == i % 4 {
        let frame = self.machine.frame_mut();
        frame.pc += 1;
        let word = self.machine.get_memory(self.machine.frame().pc as u64);
        if word.has(BeltValue::INVALID) {
          self.trap("invalid operation");
          return None;
        }
        current = word.payload();
        if 0x10 != (current & 0x1F) {
          self.trap("invalid operation");
          return None;
        }
      }
      let slot = (current >> (5 + 6 * (i % 4))) & 0x3F;
      gathered.push(self.machine.frame().read_belt(slot as usize));
    }
    Some(gathered)
  }

  /// Reads the 26-bit displacement extension of a long JMPI. The word must
  /// not wear the ARGS tag.
  fn jump_displacement(&mut self) -> Option<i64> {
    let frame = self.machine.frame_mut();
    frame.pc += 1;
    let word = self.machine.get_memory(self.machine.frame().pc as u64);
    if word.has(BeltValue::INVALID) || 0 != (word.payload() & 0x10) {
      self.trap("bad branch");
      return None;
    }
    Some(extension_displacement(word.payload()))
  }

  /// Reads the 26-bit displacement extension of a CALLI. The word must wear
  /// the ARGS tag.
  fn call_displacement(&mut self) -> Option<i64> {
    let frame = self.machine.frame_mut();
    frame.pc += 1;
    let word = self.machine.get_memory(self.machine.frame().pc as u64);
    if word.has(BeltValue::INVALID) || 0 == (word.payload() & 0x10) {
      self.trap("bad branch");
      return None;
    }
    Some(extension_displacement(word.payload()))
  }

  /// Pushes the callee frame, seeding its fast belt with the gathered
  /// arguments in order.
  fn push_frame(&mut self, entry: usize, arguments: &[BeltValue]) {
    let mut callee = crate::machine::Frame::new();
    for argument in arguments {
      callee.retire(*argument, false);
    }
    callee.entry_point = entry;
    callee.pc = entry.wrapping_sub(1);
    self.machine.frames.push(callee);
  }
}

/// Sign-extends the 26-bit displacement field of an extension word.
fn extension_displacement(word: Word) -> i64 {
  let field = (word >> 5) & 0x3FF_FFFF;
  match 0 != (field & 0x200_0000) {
    true  => (field as i64) - (1 << 26),
    false => field as i64
  }
}
