/*!

  An emulator for a belt-machine CPU in the Mill style: no registers, no
  stack. Results slide onto a fixed-capacity belt and operands are named by
  age. Every value carries metadata (INVALID, TRANSIENT, CARRY, OVERFLOW,
  ZERO) that propagates through arithmetic and steers conditional control
  flow.

  Two execution shapes share the instruction semantics:

  * [`interp`], the single-unit core: one word per cycle from an
    interleaved tick/tock stream.
  * [`mill`], the multi-unit core: ALU and flow pipelines with separate
    program counters, per-unit retire stations, and a deterministic
    cycle-end merge; runnable serially or on worker threads behind a cycle
    barrier.

  Program and snapshot images are handled by [`image`]; the dialect baked
  into an image's magic decides which core runs it.

*/

#[macro_use]
extern crate prettytable;
#[macro_use]
extern crate lazy_static;

pub mod alu;
pub mod belt;
pub mod bootstrap;
pub mod bytecode;
pub mod exnum;
pub mod host;
pub mod image;
pub mod interp;
pub mod machine;
pub mod mill;
pub mod station;
