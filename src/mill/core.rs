/*!

  The cycle engine: issue, advance, and the retirement merge.

  Each cycle is four strictly ordered phases over one shared `Machine`:

  1. *Issue*: clear the current frame's stations and fetch/decode one word
     per unit. The ALU pipeline reads ascending addresses from `pc`; the
     flow pipeline walks descending addresses from `flow_pc`, stepping over
     each instruction's extension words.
  2. *Execute*: every unit computes into its own station (`unit.rs`).
  3. *Advance*: stall counters gate the pcs; declared elide counts feed the
     opposite pipeline's counter for the next cycle.
  4. *Retire*: ALU slots in order, then flow slots from the frame's resume
     index, fast before slow within a slot. Calls push frames and end the
     cycle's flow processing; returns pop and continue with the caller's own
     pending stations; the first non-call branch target wins arbitration.

  The serial `MillCore` driver runs the phases inline. The parallel driver
  reuses exactly these functions and moves only phase 2 onto worker threads.

*/

use log::{debug, error};

use crate::belt::BeltValue;
use crate::bytecode::{
  args_words_for, Dialect, TickInstruction, TockInstruction, Word
};
use crate::host::{HostOutcome, HostService};
use crate::machine::{Frame, Machine};
use crate::station::{FlowIntent, RetireStation, UnitFault};

use super::unit::{execute_unit, UnitWork};
use super::MillConfig;

/// Issues one cycle's work. Clears the current frame's stations, fetches
/// and decodes for every slot, and leaves faults in the work list for the
/// retirement order to arbitrate.
pub fn issue(machine: &mut Machine, config: &MillConfig) -> Vec<UnitWork> {
  let frame = machine.frame_mut();
  frame.alu_stations.clear();
  frame.alu_stations.resize(config.alu_units, RetireStation::default());
  frame.flow_stations.clear();
  frame.flow_stations.resize(config.flow_units, RetireStation::default());
  frame.resume_slot = 0;

  let mut works = Vec::with_capacity(config.alu_units + config.flow_units);

  // ALU slots fetch ascending from pc, unless the pipeline is stalled.
  let alu_stalled = machine.frame().alu_stall > 0;
  for k in 0..config.alu_units {
    if alu_stalled {
      works.push(UnitWork::Idle);
      continue;
    }
    let pc = machine.frame().pc.wrapping_add(k);
    works.push(issue_alu(machine, pc));
  }

  // Flow slots walk descending from flow_pc, each instruction trailed
  // (below) by its extension words.
  let flow_stalled = machine.frame().flow_stall > 0;
  let mut cursor = machine.frame().flow_pc;
  let mut broken = false;
  for _ in 0..config.flow_units {
    if flow_stalled || broken {
      works.push(UnitWork::Idle);
      continue;
    }
    cursor = cursor.wrapping_sub(1);
    let work = issue_flow(machine, &mut cursor);
    // A fetch fault leaves the walk with no next address.
    broken = matches!(work, UnitWork::Fault { .. });
    works.push(work);
  }

  works
}

fn issue_alu(machine: &Machine, pc: usize) -> UnitWork {
  let word = machine.get_memory(pc as u64);
  if word.has(BeltValue::INVALID) {
    return UnitWork::Fault { fault: UnitFault::InvalidProgramCounter { pc } };
  }
  match TickInstruction::decode(word.payload(), Dialect::Mill) {
    Some(instruction) => UnitWork::Alu { instruction, pc },
    None => UnitWork::Fault { fault: UnitFault::InvalidOperation { pc } },
  }
}

/// Fetches the flow instruction at `*cursor` and its extension words,
/// leaving the cursor on the lowest consumed address.
fn issue_flow(machine: &Machine, cursor: &mut usize) -> UnitWork {
  let pc = *cursor;
  let word = machine.get_memory(pc as u64);
  if word.has(BeltValue::INVALID) {
    return UnitWork::Fault { fault: UnitFault::InvalidProgramCounter { pc } };
  }
  let instruction = match TockInstruction::decode(word.payload(), Dialect::Mill) {
    Some(instruction) => instruction,
    None => return UnitWork::Fault { fault: UnitFault::InvalidOperation { pc } },
  };

  let ext_count = match instruction {
    | TockInstruction::Canon { num, .. }
    | TockInstruction::Ret { num, .. } => args_words_for(num as usize),
    | TockInstruction::CallI { num, .. }
    | TockInstruction::Call { num, .. }
    | TockInstruction::Int { num, .. } => args_words_for(num as usize),
    _ => 0,
  };

  let mut ext: Vec<Word> = Vec::with_capacity(ext_count);
  for _ in 0..ext_count {
    *cursor = cursor.wrapping_sub(1);
    let word = machine.get_memory(*cursor as u64);
    if word.has(BeltValue::INVALID) {
      return UnitWork::Fault {
        fault: UnitFault::InvalidProgramCounter { pc: *cursor }
      };
    }
    ext.push(word.payload());
  }

  UnitWork::Flow { instruction, pc, ext }
}

/// Phase 2 for the serial driver: run every unit inline.
pub fn execute_all(machine: &Machine, works: &[UnitWork]) -> Vec<RetireStation> {
  works.iter().map(|work| execute_unit(machine, work)).collect()
}

/**
  Phases 3–6: advance the pcs, store the stations into the frame, merge
  retirements, arbitrate branches, and report whether execution continues.
*/
pub fn complete_cycle(
  machine  : &mut Machine,
  stations : Vec<RetireStation>,
  host     : &mut dyn HostService,
  config   : &MillConfig
) -> bool {
  advance(machine, &stations, config);

  // Hand the stations to their owning frame before retirement walks them.
  {
    let frame = machine.frame_mut();
    for (k, station) in stations.into_iter().enumerate() {
      match k < config.alu_units {
        true  => frame.alu_stations[k] = station,
        false => frame.flow_stations[k - config.alu_units] = station,
      }
    }
  }

  retire(machine, host, config);

  if machine.halted() {
    debug!(
      "cycle terminated: invalidOp {} stop {}",
      machine.invalid_op, machine.stop
    );
    return false;
  }
  true
}

/// Phase 3. Stall counters gate the pcs, then the cycle's declared elide
/// counts accumulate into the opposite pipeline for next cycle.
fn advance(machine: &mut Machine, stations: &[RetireStation], config: &MillConfig) {
  let flow_span: usize = config.flow_units
    + stations[config.alu_units..]
        .iter()
        .map(|station| station.ext_words as usize)
        .sum::<usize>();

  let frame = machine.frame_mut();

  match frame.alu_stall > 0 {
    true  => frame.alu_stall -= 1,
    false => frame.pc = frame.pc.wrapping_add(config.alu_units),
  }
  match frame.flow_stall > 0 {
    true  => frame.flow_stall -= 1,
    false => frame.flow_pc = frame.flow_pc.wrapping_sub(flow_span),
  }

  for (k, station) in stations.iter().enumerate() {
    match k < config.alu_units {
      true  => frame.flow_stall += station.nops as u32,
      false => frame.alu_stall += station.nops as u32,
    }
  }
}

/// Phases 4 and 5: the retirement merge.
fn retire(machine: &mut Machine, host: &mut dyn HostService, config: &MillConfig) {
  // A winning branch target, tagged with the frame depth that declared it;
  // it only lands if that frame is still current at cycle end.
  let mut branch: Option<(usize, usize)> = None;

  // ALU slots first, in slot order.
  for k in 0..config.alu_units {
    let station = machine.frame().alu_stations[k].clone();
    if let Some(fault) = station.fault {
      latch(machine, fault, "ALU", k);
      return;
    }
    let frame = machine.frame_mut();
    for value in &station.fast {
      frame.retire(*value, false);
    }
    for value in &station.slow {
      frame.retire(*value, true);
    }
  }

  // Flow slots, walking frames through calls and returns. A return resumes
  // the *caller's* pending stations: the flow words below a call belong to
  // the post-return continuation.
  'frames: loop {
    loop {
      let index = machine.frame().resume_slot;
      if index >= machine.frame().flow_stations.len() {
        break 'frames;
      }
      let station = machine.frame().flow_stations[index].clone();
      machine.frame_mut().resume_slot = index + 1;

      if let Some(fault) = station.fault {
        latch(machine, fault, "flow", index);
        return;
      }

      for store in &station.stores {
        if machine.store_access(store.address, store.value, store.width).is_err() {
          // Bounds were checked at execute; memory does not resize.
          latch(machine, UnitFault::StoreToInvalid { pc: 0 }, "flow", index);
          return;
        }
      }

      let frame = machine.frame_mut();
      for value in &station.fast {
        frame.retire(*value, false);
      }
      for value in &station.slow {
        frame.retire(*value, true);
      }

      match station.intent {
        FlowIntent::None => {
          if let Some(target) = station.branch {
            if branch.is_none() {
              branch = Some((machine.frames.len() - 1, target));
            }
          }
        }

        FlowIntent::Canon { slow } => {
          let frame = machine.frame_mut();
          match slow {
            false => frame.fast.rebase(&station.gathered),
            true  => frame.slow.rebase(&station.gathered),
          }
        }

        FlowIntent::Interrupt { slow } => {
          match host.request(&station.gathered) {
            HostOutcome::Values(values) => {
              let frame = machine.frame_mut();
              for value in values {
                frame.retire(value, slow);
              }
            }
            HostOutcome::Stop => {
              machine.stop = true;
            }
            HostOutcome::Fault => {
              machine.invalid_op = true;
              return;
            }
          }
        }

        FlowIntent::Call { entry, .. } => {
          let mut callee = Frame::new();
          for value in &station.gathered {
            callee.retire(*value, false);
          }
          callee.entry_point = entry;
          callee.pc = entry;
          callee.flow_pc = entry;
          machine.frames.push(callee);
          // The callee's stream owns the rest of the cycle.
          break 'frames;
        }

        FlowIntent::Ret => {
          if 1 == machine.frames.len() {
            // Returning from the bottommost frame exits.
            machine.stop = true;
            break 'frames;
          }
          let caller = machine.frames.len() - 2;
          for value in &station.gathered {
            // Mill call encodings carry no destination-belt bit; returns
            // land fast.
            machine.frames[caller].retire(*value, false);
          }
          machine.frames.pop();
          continue 'frames;
        }
      }
    }
  }

  // Branch arbitration: the winner overwrites both pcs and the entry point,
  // provided its frame survived the cycle.
  if let Some((depth, target)) = branch {
    if depth == machine.frames.len() - 1 {
      let frame = machine.frame_mut();
      frame.entry_point = target;
      frame.pc = target;
      frame.flow_pc = target;
    }
  }
}

fn latch(machine: &mut Machine, fault: UnitFault, pipeline: &str, slot: usize) {
  error!(
    "Terminate initiated due to {} ({} slot {})",
    fault.describe(), pipeline, slot
  );
  machine.invalid_op = true;
}

/// The serial driver: the full cycle state machine on the calling thread.
pub struct MillCore<'a> {
  machine : &'a mut Machine,
  host    : &'a mut dyn HostService,
  config  : MillConfig,
}

impl<'a> MillCore<'a> {
  pub fn new(
    machine: &'a mut Machine,
    host: &'a mut dyn HostService,
    config: MillConfig
  ) -> MillCore<'a> {
    MillCore { machine, host, config }
  }

  pub fn run(&mut self) {
    while !self.machine.halted() {
      let works = issue(self.machine, &self.config);

      #[cfg(feature = "trace_execution")]
      for work in &works {
        match work {
          UnitWork::Alu { instruction, pc } => println!("{:6}A {}", pc, instruction),
          UnitWork::Flow { instruction, pc, .. } => println!("{:6}F {}", pc, instruction),
          _ => {}
        }
      }

      let stations = execute_all(self.machine, &works);
      if !complete_cycle(self.machine, stations, self.host, &self.config) {
        break;
      }
    }
  }
}
