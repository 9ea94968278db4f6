/*!

  The host service table behind the INT instruction.

  The machine asks its host for exactly four things: write a character, read
  a character, stop, and a gestalt probe. The first gathered operand is the
  service code; the rest are arguments. Services run on whichever thread
  performs retirement, so a blocking read never stalls a functional unit
  mid-cycle.

*/

use std::io::{Read, Write};

use log::error;

use crate::belt::BeltValue;

/// Service codes accepted by INT.
pub const SERVICE_PUT_CHAR : u32 = 1;
pub const SERVICE_GET_CHAR : u32 = 2;
pub const SERVICE_STOP     : u32 = 3;
pub const SERVICE_GESTALT  : u32 = 4;

/// What a service request did. `Values` retire onto the requesting belt in
/// order.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum HostOutcome {
  Values(Vec<BeltValue>),
  Stop,
  /// Unknown service code; the machine latches `invalid_op`.
  Fault,
}

/// The seam between the core and the world. Implementations may block.
pub trait HostService {
  fn request(&mut self, args: &[BeltValue]) -> HostOutcome;
}

/// Dispatch shared by every implementation: decode the code, delegate the
/// two character primitives.
fn dispatch<P, G>(args: &[BeltValue], mut put: P, mut get: G) -> HostOutcome
  where P: FnMut(u32),
        G: FnMut() -> u32
{
  let code = args.first().map(BeltValue::payload).unwrap_or(0);
  match code {
    SERVICE_PUT_CHAR => {
      put(args.get(1).map(BeltValue::payload).unwrap_or(0));
      HostOutcome::Values(Vec::new())
    }
    SERVICE_GET_CHAR => {
      let value = BeltValue(get() as i64).with_zero();
      HostOutcome::Values(vec![value])
    }
    SERVICE_STOP => HostOutcome::Stop,
    SERVICE_GESTALT => {
      // Currently: report nothing by reporting zero.
      HostOutcome::Values(vec![BeltValue(BeltValue::ZERO)])
    }
    _ => {
      error!("Terminate initiated due to invalid interrupt: {}", code);
      HostOutcome::Fault
    }
  }
}

/// The real console: characters go to stdout, come from stdin. A read at
/// end of input yields `0xFFFF_FFFF`, the 32-bit reading of EOF.
pub struct Console;

impl HostService for Console {
  fn request(&mut self, args: &[BeltValue]) -> HostOutcome {
    dispatch(
      args,
      |character| {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(&[character as u8]);
        let _ = stdout.flush();
      },
      || {
        let mut byte = [0u8; 1];
        match std::io::stdin().read(&mut byte) {
          Ok(1) => byte[0] as u32,
          _     => 0xFFFF_FFFF,
        }
      }
    )
  }
}

/// A scripted host for tests: records everything put, serves reads from a
/// queue.
#[derive(Default)]
pub struct Buffered {
  pub written : Vec<u8>,
  pub input   : Vec<u8>,
  cursor      : usize,
}

impl Buffered {
  pub fn new() -> Buffered {
    Buffered::default()
  }

  pub fn with_input(input: &[u8]) -> Buffered {
    Buffered { written: Vec::new(), input: input.to_vec(), cursor: 0 }
  }

  pub fn output(&self) -> String {
    String::from_utf8_lossy(&self.written).into_owned()
  }
}

impl HostService for Buffered {
  fn request(&mut self, args: &[BeltValue]) -> HostOutcome {
    let written = &mut self.written;
    let input = &self.input;
    let cursor = &mut self.cursor;
    dispatch(
      args,
      |character| written.push(character as u8),
      || {
        match input.get(*cursor) {
          Some(byte) => {
            *cursor += 1;
            *byte as u32
          }
          None => 0xFFFF_FFFF,
        }
      }
    )
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn put_and_get_round_trip() {
    let mut host = Buffered::with_input(b"x");
    let outcome = host.request(&[BeltValue::numeric(1), BeltValue::numeric(b'A' as u32)]);
    assert_eq!(outcome, HostOutcome::Values(Vec::new()));
    assert_eq!(host.output(), "A");

    let outcome = host.request(&[BeltValue::numeric(2)]);
    match outcome {
      HostOutcome::Values(values) => assert_eq!(values[0].payload(), b'x' as u32),
      other => panic!("unexpected outcome {:?}", other),
    }

    // Exhausted input reads as EOF.
    match host.request(&[BeltValue::numeric(2)]) {
      HostOutcome::Values(values) => assert_eq!(values[0].payload(), 0xFFFF_FFFF),
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[test]
  fn stop_gestalt_and_fault() {
    let mut host = Buffered::new();
    assert_eq!(host.request(&[BeltValue::numeric(3)]), HostOutcome::Stop);
    match host.request(&[BeltValue::numeric(4)]) {
      HostOutcome::Values(values) => {
        assert!(values[0].has(BeltValue::ZERO));
        assert_eq!(values[0].payload(), 0);
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(host.request(&[BeltValue::numeric(99)]), HostOutcome::Fault);
  }
}
