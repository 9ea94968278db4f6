/*!

  Representation of machine instructions abstractly and as binary words.

  Two instruction streams share a 32-bit word. Tick words are arithmetic and
  logic; tock words are control and memory. The same operations exist in two
  binary dialects:

  * `Linear`, the single-unit dialect. One stream of words, with bit 31 of
    each word meaning "the next word continues in this stream" (clear
    alternates tick and tock). Immediate tick operands are 19 bits and there
    are no elide fields. ARGS extension words follow their owner at
    increasing addresses.
  * `Mill`, the multi-unit dialect. The pipelines fetch from separate
    program counters, so no stream bit exists and the top bits carry an
    elide count: implicit NOPs injected into the *opposite* pipeline.
    Immediate tick operands narrow to 17 bits. ARGS extension words precede
    their owner at decreasing addresses.

  Decoding is infallible except for the reserved opcode ranges (tick 16–21,
  tock 14–15) and standalone ARGS execution, which the cores trap as invalid
  operations. The encoders exist for the embedded bootstrap and for tests;
  they are the inverse of decode for every inline form.

*/

mod tick;
mod tock;

use either::Either;

pub use tick::{TickInstruction, TickOp};
pub use tock::{args_word, call_extension, jump_extension, MemWidth, BranchOffset,
               TockInstruction, TockOp, ARGS_SLOT_COUNT};

// If you change this you must also change the image codec, which serializes
// memory as a sequence of these.
pub type Word = u32;

/// Which binary dialect a program image uses. Selected by the image magic.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Dialect {
  /// `LINB` images: one interleaved stream, no elide fields.
  Linear,
  /// `Mill` images: split pipelines, elide counts in the top bits.
  Mill,
}

/// Decodes a word as a member of the given stream. `None` is a reserved
/// opcode: the caller must trap it as an invalid operation.
pub fn decode_word(
  word: Word,
  tick: bool,
  dialect: Dialect
) -> Option<Either<TickInstruction, TockInstruction>> {
  match tick {
    true  => TickInstruction::decode(word, dialect).map(Either::Left),
    false => TockInstruction::decode(word, dialect).map(Either::Right),
  }
}

/// How many ARGS extension words carry `num` gathered operands.
pub fn args_words_for(num: usize) -> usize {
  num / ARGS_SLOT_COUNT + usize::from(0 != num % ARGS_SLOT_COUNT)
}
