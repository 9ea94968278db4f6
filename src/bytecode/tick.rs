/*!

  The tick (arithmetic/logic) instruction stream: opcodes, decoded forms, and
  the word-level encoding for each dialect.

  A tick word spends its low six bits on the opcode. Bit 5 of that field
  selects the destination belt (clear = fast, set = slow), leaving a five-bit
  operation number:

    0        NOP
    1 – 5    wide three-operand forms: ADDC SUBB MULL DIVL PICK
    6 – 15   conditional two-operand register forms: ADD … XOR
    16 – 21  reserved, trapped as invalid operations
    22 – 31  immediate forms of 6 – 15

  The register forms carry cond:4 src:6 lhs:6 rhs:6 above the opcode. The
  immediate forms carry lhs:6 and a sign-extended immediate whose width is
  the dialect's: 19 bits in `Linear` (the top bits belong to the stream
  toggle), 17 bits in `Mill` (the top bits belong to the elide count).

*/

use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::belt::Cond;
use super::{Dialect, Word};

/**
  Tick opcodes, numbered as they appear in the low six bits of a word (with
  the slow-belt bit stripped). The reserved range 16–21 has no variants, so
  conversion from a fetched word fails exactly where execution must trap.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum TickOp {
  Nop   =  0,
  AddC  =  1,
  SubB  =  2,
  Mull  =  3,
  DivL  =  4,
  Pick  =  5,
  Add   =  6,
  Sub   =  7,
  Mul   =  8,
  Div   =  9,
  UDiv  = 10,
  Shr   = 11,
  AShr  = 12,
  And   = 13,
  Or    = 14,
  Xor   = 15,
  AddI  = 22,
  SubI  = 23,
  MulI  = 24,
  DivI  = 25,
  UDivI = 26,
  ShrI  = 27,
  AShrI = 28,
  AndI  = 29,
  OrI   = 30,
  XorI  = 31,
}

impl TickOp {
  /// The register-form operation an immediate form abbreviates. Identity for
  /// everything else.
  pub fn register_form(&self) -> TickOp {
    let code = u8::from(*self);
    match code >= 22 {
      true  => TickOp::try_from(code - 16).unwrap(),
      false => *self
    }
  }

  /// DIV and UDIV retire quotient and remainder; MULL and DIVL retire low
  /// and high. Everything else retires at most one value.
  pub fn retires_two(&self) -> bool {
    matches!(
      self.register_form(),
      TickOp::Div | TickOp::UDiv | TickOp::Mull | TickOp::DivL
    )
  }
}

/// A decoded tick word. The four shapes mirror the four field layouts; the
/// opcode discriminates further within a shape.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TickInstruction {
  /// `[op:6][unused][elide:3]`. No retirement.
  Nop {
    elide: u8
  },
  /// `[op:6][cond:4][a:6][b:6][c:6][elide:3]`: ADDC SUBB MULL DIVL PICK.
  /// Only PICK reads the condition field; ADDC/SUBB take their carry from
  /// the flags of belt position `c`.
  Wide {
    opcode : TickOp,
    cond   : Cond,
    a      : u8,
    b      : u8,
    c      : u8,
    slow   : bool,
    elide  : u8,
  },
  /// `[op:6][cond:4][src:6][lhs:6][rhs:6][elide:3]`: the conditional
  /// two-operand register forms.
  Compute {
    opcode : TickOp,
    cond   : Cond,
    src    : u8,
    lhs    : u8,
    rhs    : u8,
    slow   : bool,
    elide  : u8,
  },
  /// `[op:6][lhs:6][imm:17|19][elide:3]`: unconditional immediate forms.
  /// The immediate is stored sign-extended to a 32-bit payload pattern.
  Immediate {
    opcode : TickOp,
    lhs    : u8,
    imm    : u32,
    slow   : bool,
    elide  : u8,
  },
}

impl TickInstruction {
  pub fn decode(word: Word, dialect: Dialect) -> Option<TickInstruction> {
    let slow = 0 != (word & 0x20);
    // The five-bit operation number is the enum discriminant; the reserved
    // range 16–21 fails the conversion and the caller traps it.
    let opcode = TickOp::try_from((word & 0x1F) as u8).ok()?;

    let elide = |shift: u32| -> u8 {
      match dialect {
        Dialect::Mill   => ((word >> shift) & 0x7) as u8,
        Dialect::Linear => 0,
      }
    };

    let instruction = match u8::from(opcode) {
      0 => TickInstruction::Nop { elide: elide(28) },

      1..=5 => TickInstruction::Wide {
        opcode,
        cond : Cond::from_field(word >> 6),
        a    : ((word >> 10) & 0x3F) as u8,
        b    : ((word >> 16) & 0x3F) as u8,
        c    : ((word >> 22) & 0x3F) as u8,
        slow,
        elide: elide(28),
      },

      6..=15 => TickInstruction::Compute {
        opcode,
        cond : Cond::from_field(word >> 6),
        src  : ((word >> 10) & 0x3F) as u8,
        lhs  : ((word >> 16) & 0x3F) as u8,
        rhs  : ((word >> 22) & 0x3F) as u8,
        slow,
        elide: elide(28),
      },

      _ => {
        let imm = match dialect {
          Dialect::Linear => {
            let field = (word >> 12) & 0x7_FFFF;
            match 0 != (field & 0x4_0000) {
              true  => field | 0xFFF8_0000,
              false => field
            }
          }
          Dialect::Mill => {
            let field = (word >> 12) & 0x1_FFFF;
            match 0 != (field & 0x1_0000) {
              true  => field | 0xFFFE_0000,
              false => field
            }
          }
        };
        TickInstruction::Immediate {
          opcode,
          lhs  : ((word >> 6) & 0x3F) as u8,
          imm,
          slow,
          elide: elide(29),
        }
      }
    };

    Some(instruction)
  }

  /**
    Encodes the instruction into a word of the given dialect. Inverse of
    `decode` for every form; immediates are truncated to the dialect's field
    width, and elide counts are dropped by the `Linear` dialect, which has
    nowhere to put them.
  */
  pub fn encode(&self, dialect: Dialect) -> Word {
    let elide_bits = |elide: u8, shift: u32| -> Word {
      match dialect {
        Dialect::Mill   => ((elide & 0x7) as Word) << shift,
        Dialect::Linear => 0,
      }
    };

    match *self {
      TickInstruction::Nop { elide } => elide_bits(elide, 28),

      TickInstruction::Wide { opcode, cond, a, b, c, slow, elide } => {
        u8::from(opcode) as Word
          | if slow { 0x20 } else { 0 }
          | (u8::from(cond) as Word) << 6
          | (a as Word & 0x3F) << 10
          | (b as Word & 0x3F) << 16
          | (c as Word & 0x3F) << 22
          | elide_bits(elide, 28)
      }

      TickInstruction::Compute { opcode, cond, src, lhs, rhs, slow, elide } => {
        u8::from(opcode) as Word
          | if slow { 0x20 } else { 0 }
          | (u8::from(cond) as Word) << 6
          | (src as Word & 0x3F) << 10
          | (lhs as Word & 0x3F) << 16
          | (rhs as Word & 0x3F) << 22
          | elide_bits(elide, 28)
      }

      TickInstruction::Immediate { opcode, lhs, imm, slow, elide } => {
        let imm_field = match dialect {
          Dialect::Linear => (imm & 0x7_FFFF) << 12,
          Dialect::Mill   => (imm & 0x1_FFFF) << 12,
        };
        u8::from(opcode) as Word
          | if slow { 0x20 } else { 0 }
          | (lhs as Word & 0x3F) << 6
          | imm_field
          | elide_bits(elide, 29)
      }
    }
  }

  pub fn elide(&self) -> u8 {
    match *self {
      | TickInstruction::Nop { elide }
      | TickInstruction::Wide { elide, .. }
      | TickInstruction::Compute { elide, .. }
      | TickInstruction::Immediate { elide, .. } => elide
    }
  }
}

impl Display for TickInstruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TickInstruction::Nop { .. } => write!(f, "NOP"),

      TickInstruction::Wide { opcode, cond, a, b, c, slow, .. } => {
        write!(f, "{}{}({}, b{}, b{}, b{})",
               opcode, if *slow { ".s" } else { "" }, cond, a, b, c)
      }

      TickInstruction::Compute { opcode, cond, src, lhs, rhs, slow, .. } => {
        write!(f, "{}{}({}, b{}, b{}, b{})",
               opcode, if *slow { ".s" } else { "" }, cond, src, lhs, rhs)
      }

      TickInstruction::Immediate { opcode, lhs, imm, slow, .. } => {
        write!(f, "{}{}(b{}, {})",
               opcode, if *slow { ".s" } else { "" }, lhs, *imm as i32)
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserved_opcodes_fail_to_decode() {
    for op in 16..=21u32 {
      assert_eq!(TickInstruction::decode(op, Dialect::Linear), None);
      assert_eq!(TickInstruction::decode(op | 0x20, Dialect::Mill), None);
    }
  }

  #[test]
  fn register_add_round_trips() {
    let instruction = TickInstruction::Compute {
      opcode: TickOp::Add,
      cond  : Cond::Always,
      src   : 31,
      lhs   : 1,
      rhs   : 0,
      slow  : false,
      elide : 0,
    };
    for dialect in [Dialect::Linear, Dialect::Mill] {
      let word = instruction.encode(dialect);
      assert_eq!(TickInstruction::decode(word, dialect), Some(instruction));
    }
  }

  #[test]
  fn slow_bit_selects_the_slow_belt() {
    let word = TickInstruction::Compute {
      opcode: TickOp::Xor,
      cond  : Cond::NotZero,
      src   : 2,
      lhs   : 3,
      rhs   : 4,
      slow  : true,
      elide : 0,
    }.encode(Dialect::Linear);
    assert_eq!(word & 0x3F, 0x20 | u8::from(TickOp::Xor) as Word);
    match TickInstruction::decode(word, Dialect::Linear).unwrap() {
      TickInstruction::Compute { slow, .. } => assert!(slow),
      other => panic!("decoded {:?}", other),
    }
  }

  #[test]
  fn immediate_sign_extension_per_dialect() {
    let instruction = TickInstruction::Immediate {
      opcode: TickOp::AddI,
      lhs   : 30,
      imm   : -2i32 as u32,
      slow  : false,
      elide : 0,
    };
    for dialect in [Dialect::Linear, Dialect::Mill] {
      let word = instruction.encode(dialect);
      match TickInstruction::decode(word, dialect).unwrap() {
        TickInstruction::Immediate { imm, .. } => assert_eq!(imm as i32, -2),
        other => panic!("decoded {:?}", other),
      }
    }

    // The Mill field is two bits narrower than the Linear one.
    let wide = TickInstruction::Immediate {
      opcode: TickOp::OrI,
      lhs   : 0,
      imm   : 0x1_8000,
      slow  : false,
      elide : 0,
    };
    match TickInstruction::decode(wide.encode(Dialect::Linear), Dialect::Linear).unwrap() {
      TickInstruction::Immediate { imm, .. } => assert_eq!(imm, 0x1_8000),
      other => panic!("decoded {:?}", other),
    }
    match TickInstruction::decode(wide.encode(Dialect::Mill), Dialect::Mill).unwrap() {
      // Bit 16 is the Mill sign bit, so the same payload reads negative.
      TickInstruction::Immediate { imm, .. } => assert_eq!(imm, 0xFFFF_8000),
      other => panic!("decoded {:?}", other),
    }
  }

  #[test]
  fn elide_fields_only_exist_in_mill_words() {
    let instruction = TickInstruction::Nop { elide: 5 };
    assert_eq!(instruction.encode(Dialect::Linear), 0);
    let word = instruction.encode(Dialect::Mill);
    assert_eq!(TickInstruction::decode(word, Dialect::Mill),
               Some(TickInstruction::Nop { elide: 5 }));
    assert_eq!(TickInstruction::decode(word, Dialect::Linear),
               Some(TickInstruction::Nop { elide: 0 }));
  }

  #[test]
  fn immediate_forms_map_onto_register_kernels() {
    assert_eq!(TickOp::AddI.register_form(), TickOp::Add);
    assert_eq!(TickOp::XorI.register_form(), TickOp::Xor);
    assert_eq!(TickOp::Div.register_form(), TickOp::Div);
    assert!(TickOp::DivI.retires_two());
    assert!(TickOp::Mull.retires_two());
    assert!(!TickOp::AddC.retires_two());
  }
}
