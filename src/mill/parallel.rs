/*!

  The parallel driver: one worker thread per functional unit, marching in
  lockstep behind a cycle barrier.

  The barrier is crossed twice per cycle, once to release the units into
  execute and once to rendezvous before retirement, so the orchestrator's
  issue and retirement phases never overlap a unit's execute. The machine
  sits in an `RwLock`: units take read locks while they execute (they are
  data-isolated by construction: belt reads and memory loads only, results
  into their own station slot), and the orchestrator takes the write lock
  on either side. Cancellation is a cooperative flag observed at the
  release barrier.

  Retirement, frame surgery and host-service I/O all happen on the
  orchestrator thread, which is what keeps a blocking `read character`
  request from stranding a worker mid-cycle.

*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Mutex, RwLock};
use std::thread;

use log::debug;

use crate::host::HostService;
use crate::machine::Machine;
use crate::station::RetireStation;

use super::core::{complete_cycle, issue};
use super::unit::{execute_unit, UnitWork};
use super::MillConfig;

/// Owns the machine for the duration of a parallel run. Serial and parallel
/// drivers share every cycle function, so the two produce identical
/// machines for the same program and host.
pub struct ParallelCore {
  machine : RwLock<Machine>,
  config  : MillConfig,
}

impl ParallelCore {
  pub fn new(machine: Machine, config: MillConfig) -> ParallelCore {
    ParallelCore { machine: RwLock::new(machine), config }
  }

  pub fn into_machine(self) -> Machine {
    self.machine.into_inner().unwrap()
  }

  pub fn run(&self, host: &mut dyn HostService) {
    let unit_count = self.config.alu_units + self.config.flow_units;
    let barrier = Barrier::new(unit_count + 1);
    let terminate = AtomicBool::new(false);

    let work_slots: Vec<Mutex<UnitWork>> =
      (0..unit_count).map(|_| Mutex::new(UnitWork::Idle)).collect();
    let stations: Vec<Mutex<RetireStation>> =
      (0..unit_count).map(|_| Mutex::new(RetireStation::default())).collect();

    thread::scope(|scope| {
      for k in 0..unit_count {
        let barrier = &barrier;
        let terminate = &terminate;
        let machine = &self.machine;
        let work_slot = &work_slots[k];
        let station_slot = &stations[k];

        scope.spawn(move || {
          loop {
            // Release: the orchestrator has issued this cycle's work.
            barrier.wait();
            if terminate.load(Ordering::Acquire) {
              break;
            }

            let work = std::mem::replace(
              &mut *work_slot.lock().unwrap(), UnitWork::Idle);
            let station = {
              let guard = machine.read().unwrap();
              execute_unit(&guard, &work)
            };
            *station_slot.lock().unwrap() = station;

            // Rendezvous: every station is final for this cycle.
            barrier.wait();
          }
        });
      }

      // The orchestrator.
      let mut cycles: u64 = 0;
      loop {
        let halted = self.machine.read().unwrap().halted();
        if halted {
          terminate.store(true, Ordering::Release);
          barrier.wait();
          break;
        }

        {
          let mut machine = self.machine.write().unwrap();
          let works = issue(&mut machine, &self.config);
          for (k, work) in works.into_iter().enumerate() {
            *work_slots[k].lock().unwrap() = work;
          }
        }

        barrier.wait(); // release units into execute
        barrier.wait(); // rendezvous at cycle end

        let gathered: Vec<RetireStation> = stations
          .iter()
          .map(|slot| std::mem::take(&mut *slot.lock().unwrap()))
          .collect();

        cycles += 1;
        let continuing = {
          let mut machine = self.machine.write().unwrap();
          complete_cycle(&mut machine, gathered, host, &self.config)
        };
        if !continuing {
          terminate.store(true, Ordering::Release);
          barrier.wait();
          break;
        }
      }
      debug!("parallel core finished after {} cycles", cycles);
    });
  }
}
