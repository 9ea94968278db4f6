/*!

  The belt data-plane: tagged values, the fixed-capacity belt ring, and the
  condition codes that interpret a value's metadata bits.

  A `BeltValue` conflates a 32-bit numeric payload with the metadata that rides
  along with it. The name `belt` comes from the machine's central conceit: there
  are no registers. Results slide onto the front of a conveyor belt, and
  operands are addressed by how long ago they were produced. A value's position
  is therefore its age, and every retirement ages every other value by one.

*/

use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

/// The number of slots in a belt. Positions 30 and 31 are constants, so only
/// `BELT_SIZE - 2` retired values are ever addressable.
pub const BELT_SIZE: usize = 32;

/**
  A tagged 64-bit quantity: a 32-bit unsigned payload in the low bits plus
  metadata bits above (and one, `NEGATIVE`, inside). Everything the machine
  computes is one of these.

  The metadata layout is load-bearing for the propagation rules: comparing two
  raw values with the same dominant flag compares their payloads, which hold
  the producing program counter.
*/
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct BeltValue(pub i64);

impl BeltValue {
  /// Carry out of bit 31, kept in bit 32 so addition produces it for free.
  pub const CARRY     : i64 =   0x1_0000_0000;
  /// The payload's sign bit. Not independent metadata; a reflection.
  pub const NEGATIVE  : i64 =        0x8000_0000;
  /// The value was skipped by a failed precondition. Payload = producing pc.
  pub const TRANSIENT : i64 =   0x2_0000_0000;
  /// The value is illegal to use. Payload = producing pc.
  pub const INVALID   : i64 =   0x4_0000_0000;
  /// Signed overflow occurred while producing the value.
  pub const OVERFLOW  : i64 =   0x8_0000_0000;
  /// The low 32 payload bits are all zero.
  pub const ZERO      : i64 =  0x10_0000_0000;
  /// Retire-station sentinel for a vacant slot. Never appears on a live belt.
  pub const EMPTY     : i64 =  0x20_0000_0000;

  pub const PAYLOAD_MASK: i64 = 0xFFFF_FFFF;

  /// A fresh numeric value with the `ZERO` flag asserted as appropriate.
  pub fn numeric(payload: u32) -> BeltValue {
    BeltValue(payload as i64).with_zero()
  }

  /// An `INVALID` marker carrying the producing program counter.
  pub fn invalid_at(pc: usize) -> BeltValue {
    BeltValue(Self::INVALID | pc as i64)
  }

  /// A `TRANSIENT` marker carrying the producing program counter.
  pub fn transient_at(pc: usize) -> BeltValue {
    BeltValue(Self::TRANSIENT | pc as i64)
  }

  pub fn raw(&self) -> i64 {
    self.0
  }

  /// The low 32 bits, which every arithmetic path operates on.
  pub fn payload(&self) -> u32 {
    (self.0 & Self::PAYLOAD_MASK) as u32
  }

  pub fn has(&self, flag: i64) -> bool {
    0 != (self.0 & flag)
  }

  /// True if the value carries either propagating flag and so cannot take
  /// part in arithmetic.
  pub fn is_extra_numerical(&self) -> bool {
    self.has(Self::TRANSIENT | Self::INVALID)
  }

  /**
    Asserts `ZERO` iff the low-32 payload is zero. Every writer of a fresh
    numeric value routes through this, which is what makes the flag reliable
    for the `ZERO`/`NOT_ZERO` conditions.
  */
  pub fn with_zero(self) -> BeltValue {
    match 0 == (self.0 & Self::PAYLOAD_MASK) {
      true  => BeltValue(self.0 | Self::ZERO),
      false => BeltValue(self.0)
    }
  }
}

impl Display for BeltValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut tags = String::new();
    for (flag, name) in [
      (Self::CARRY,     "C"),
      (Self::TRANSIENT, "T"),
      (Self::INVALID,   "I"),
      (Self::OVERFLOW,  "V"),
      (Self::ZERO,      "Z"),
      (Self::EMPTY,     "E"),
    ] {
      if self.has(flag) {
        tags.push_str(name);
      }
    }
    match tags.is_empty() {
      true  => write!(f, "{:#010X}", self.payload()),
      false => write!(f, "{:#010X}[{}]", self.payload(), tags)
    }
  }
}


/**
  The sixteen condition codes. A condition interprets the metadata bits of a
  source value; the payload itself is never consulted (`NEGATIVE` lives in the
  payload's top bit, but it is read as a flag).

  The numbering follows the primary reference and the program generator. Since
  the field is four bits wide, every encodable value names a condition; the
  bug-trap for an unknown code lives in the conversion, which cannot fire from
  decoded instructions.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum Cond {
  Always       =  0,
  /// Neither `INVALID` nor `TRANSIENT`.
  Definite     =  1,
  Carry        =  2,
  NoCarry      =  3,
  Overflow     =  4,
  NoOverflow   =  5,
  Negative     =  6,
  NotNegative  =  7,
  Zero         =  8,
  NotZero      =  9,
  /// Zero or negative.
  NotPositive  = 10,
  /// Not zero and not negative.
  Positive     = 11,
  Invalid      = 12,
  NotInvalid   = 13,
  Transient    = 14,
  NotTransient = 15,
}

impl Cond {
  /// Decodes the low four bits of a condition field.
  pub fn from_field(field: u32) -> Cond {
    // Infallible: the field is masked to four bits and all sixteen values
    // name a condition.
    Cond::try_from((field & 0xF) as u8).unwrap()
  }

  /// Evaluates the condition against the flags of `src`.
  pub fn holds(&self, src: BeltValue) -> bool {
    use Cond::*;

    // Paired codes test the same mask; even codes require it set, odd codes
    // require it clear.
    let mask = match self {
      Always       => return true,
      Definite     => return !src.has(BeltValue::INVALID | BeltValue::TRANSIENT),
      Carry        | NoCarry      => BeltValue::CARRY,
      Overflow     | NoOverflow   => BeltValue::OVERFLOW,
      Negative     | NotNegative  => BeltValue::NEGATIVE,
      Zero         | NotZero      => BeltValue::ZERO,
      NotPositive  | Positive     => BeltValue::ZERO | BeltValue::NEGATIVE,
      Invalid      | NotInvalid   => BeltValue::INVALID,
      Transient    | NotTransient => BeltValue::TRANSIENT,
    };

    match 0 == (u8::from(*self) & 1) {
      true  => src.has(mask),
      false => !src.has(mask)
    }
  }
}


/**
  One belt: an ordered ring of `BELT_SIZE` values with a front cursor and a
  fill count. Pushing front-loads and displaces the oldest value once full.

  Positions 30 and 31 are constants, not storage; `read` intercepts them
  before consulting the ring, so they cannot be shadowed by retirement and
  evicted slots can never leak back into view. Which constants they are
  depends on whether this is the fast or the slow belt.
*/
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Belt {
  slots : [BeltValue; BELT_SIZE],
  front : usize,
  size  : usize,
  kind  : BeltKind,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BeltKind {
  Fast,
  Slow,
}

impl Belt {
  pub fn new(kind: BeltKind) -> Belt {
    Belt {
      slots: [BeltValue(BeltValue::INVALID); BELT_SIZE],
      front: 0,
      size : 0,
      kind,
    }
  }

  pub fn len(&self) -> usize {
    self.size
  }

  pub fn front_index(&self) -> usize {
    self.front
  }

  /**
    Reads belt position `position`, the `position`-th most recently retired
    value. Positions 30 and 31 read the belt's constants; positions at or
    beyond the fill count read `INVALID`.
  */
  pub fn read(&self, position: usize) -> BeltValue {
    match (position, self.kind) {
      (30, BeltKind::Fast) => return BeltValue(BeltValue::ZERO),
      (31, BeltKind::Fast) => return BeltValue(1),
      (30, BeltKind::Slow) => return BeltValue(BeltValue::INVALID),
      (31, BeltKind::Slow) => return BeltValue(BeltValue::TRANSIENT),
      _                    => {}
    }

    if position >= self.size {
      return BeltValue(BeltValue::INVALID);
    }
    self.slots[(self.front + position) % BELT_SIZE]
  }

  /// Pushes a retired value onto the front, displacing the tail when full.
  pub fn push(&mut self, value: BeltValue) {
    self.front = match self.front {
      0 => BELT_SIZE - 1,
      f => f - 1
    };
    self.slots[self.front] = value;
    if self.size < BELT_SIZE {
      self.size += 1;
    }
  }

  /// Rebases the belt for CANON: forget everything, then push the given
  /// values in order so they become the canonical prefix.
  pub fn rebase(&mut self, values: &[BeltValue]) {
    self.front = 0;
    self.size = 0;
    for value in values {
      self.push(*value);
    }
  }

  /// Raw slot access for the snapshot codec. Slot order is physical, not
  /// positional.
  pub fn slot(&self, index: usize) -> BeltValue {
    self.slots[index]
  }

  /// Counterpart to `slot` for snapshot reload.
  pub fn restore(&mut self, slots: [BeltValue; BELT_SIZE], front: usize, size: usize) {
    self.slots = slots;
    self.front = front % BELT_SIZE;
    self.size  = size.min(BELT_SIZE);
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_flag_tracks_payload() {
    assert!(BeltValue::numeric(0).has(BeltValue::ZERO));
    assert!(!BeltValue::numeric(7).has(BeltValue::ZERO));
    // Metadata above the payload does not defeat the zero test.
    assert!(BeltValue(BeltValue::CARRY).with_zero().has(BeltValue::ZERO));
  }

  #[test]
  fn fresh_belt_reads_invalid() {
    let belt = Belt::new(BeltKind::Fast);
    for position in 0..30 {
      assert_eq!(belt.read(position), BeltValue(BeltValue::INVALID));
    }
  }

  #[test]
  fn constants_on_the_fast_belt() {
    let mut belt = Belt::new(BeltKind::Fast);
    assert_eq!(belt.read(30), BeltValue(BeltValue::ZERO));
    assert_eq!(belt.read(31), BeltValue(1));
    // Still constants after the ring wraps all the way around.
    for i in 0..2 * BELT_SIZE {
      belt.push(BeltValue::numeric(i as u32 + 100));
    }
    assert_eq!(belt.read(30), BeltValue(BeltValue::ZERO));
    assert_eq!(belt.read(31), BeltValue(1));
  }

  #[test]
  fn constants_on_the_slow_belt() {
    let belt = Belt::new(BeltKind::Slow);
    assert_eq!(belt.read(30), BeltValue(BeltValue::INVALID));
    assert_eq!(belt.read(31), BeltValue(BeltValue::TRANSIENT));
  }

  #[test]
  fn push_fronts_and_ages() {
    let mut belt = Belt::new(BeltKind::Fast);
    belt.push(BeltValue::numeric(3));
    belt.push(BeltValue::numeric(5));
    assert_eq!(belt.read(0).payload(), 5);
    assert_eq!(belt.read(1).payload(), 3);
    assert_eq!(belt.read(2), BeltValue(BeltValue::INVALID));
  }

  #[test]
  fn displacement_once_full() {
    let mut belt = Belt::new(BeltKind::Fast);
    for i in 0..BELT_SIZE as u32 + 4 {
      belt.push(BeltValue::numeric(i));
    }
    assert_eq!(belt.len(), BELT_SIZE);
    assert_eq!(belt.read(0).payload(), BELT_SIZE as u32 + 3);
    // Position 29 is the oldest addressable slot.
    assert_eq!(belt.read(29).payload(), BELT_SIZE as u32 + 3 - 29);
  }

  #[test]
  fn rebase_installs_canonical_prefix() {
    let mut belt = Belt::new(BeltKind::Fast);
    for i in 0..10 {
      belt.push(BeltValue::numeric(i));
    }
    belt.rebase(&[BeltValue::numeric(41), BeltValue::numeric(42)]);
    assert_eq!(belt.len(), 2);
    assert_eq!(belt.read(0).payload(), 42);
    assert_eq!(belt.read(1).payload(), 41);
    assert_eq!(belt.read(2), BeltValue(BeltValue::INVALID));
  }

  #[test]
  fn conditions_read_flags_not_payload() {
    let carried = BeltValue(0x1234 | BeltValue::CARRY);
    assert!(Cond::Carry.holds(carried));
    assert!(!Cond::NoCarry.holds(carried));
    assert!(Cond::NotZero.holds(carried));

    let zero = BeltValue::numeric(0);
    assert!(Cond::Zero.holds(zero));
    assert!(Cond::NotPositive.holds(zero));
    assert!(!Cond::Positive.holds(zero));

    let negative = BeltValue::numeric(0x8000_0001);
    assert!(Cond::Negative.holds(negative));
    assert!(Cond::NotPositive.holds(negative));

    let plain = BeltValue::numeric(12);
    assert!(Cond::Positive.holds(plain));
    assert!(Cond::Definite.holds(plain));
    assert!(!Cond::Definite.holds(BeltValue::transient_at(9)));
    assert!(Cond::Always.holds(BeltValue::invalid_at(9)));
  }
}
