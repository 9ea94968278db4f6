/*!

  The tock (control/memory) instruction stream.

  A tock word spends its low five bits on the opcode. Bit 4 does double duty:
  for loads and CANON it selects the destination belt, for JMPI in the
  `Linear` dialect it selects the long extension-word form, and for a NOP it
  marks the word as ARGS, a packed list of four belt indices that is never
  executed, only fetched as the operand list of CANON/RET/CALL/CALLI/INT.

  The branch-shaped operations (JMPI, CALLI, CALL, INT) drop their fields one
  bit lower than the rest because they have no destination-belt bit. Their
  layouts differ between the dialects; see `decode` for both.

*/

use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::belt::Cond;
use super::{Dialect, Word};

/// Belt indices carried per ARGS word.
pub const ARGS_SLOT_COUNT: usize = 4;

/**
  Tock opcodes, numbered as the low four bits of a word. Codes 14 and 15 are
  reserved; the conversion fails for them and execution traps.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum TockOp {
  Nop   =  0,
  Jmp   =  1,
  Ld    =  2,
  Ldh   =  3,
  Ldb   =  4,
  St    =  5,
  Sth   =  6,
  Stb   =  7,
  Canon =  8,
  Ret   =  9,
  JmpI  = 10,
  CallI = 11,
  Call  = 12,
  Int   = 13,
}

/// Memory access width for the load/store families. Sub-word accesses are
/// byte-addressed within the 32-bit word store.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MemWidth {
  Word,
  Half,
  Byte,
}

impl MemWidth {
  /// How far an address payload shifts right to become a word index.
  pub fn index_shift(&self) -> u32 {
    match self {
      MemWidth::Word => 0,
      MemWidth::Half => 1,
      MemWidth::Byte => 2,
    }
  }
}

/// Where a PC-relative branch displacement comes from.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BranchOffset {
  /// Sign-extended displacement carried in the instruction word.
  Inline(i64),
  /// Displacement in a following extension word, fetched at execution time.
  /// Only the `Linear` dialect produces this.
  Extension,
}

/// A decoded tock word.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TockInstruction {
  Nop {
    elide: u8
  },
  /// Four packed belt indices. Executing one standalone is an invalid
  /// operation; the gather paths consume them as data.
  Args {
    slots: [u8; ARGS_SLOT_COUNT]
  },
  /// Branch through a belt value. The target must be TRANSIENT (a pc
  /// provenance produced by earlier control flow) and not INVALID.
  Jmp {
    cond   : Cond,
    src    : u8,
    target : u8,
  },
  Load {
    width : MemWidth,
    cond  : Cond,
    src   : u8,
    addr  : u8,
    slow  : bool,
    elide : u8,
  },
  Store {
    width : MemWidth,
    cond  : Cond,
    src   : u8,
    addr  : u8,
    value : u8,
    elide : u8,
  },
  /// Rebase the destination belt to exactly the gathered operand list.
  Canon {
    cond  : Cond,
    src   : u8,
    num   : u8,
    slow  : bool,
    elide : u8,
  },
  Ret {
    cond  : Cond,
    src   : u8,
    num   : u8,
    elide : u8,
  },
  JmpI {
    cond   : Cond,
    src    : u8,
    offset : BranchOffset,
    elide  : u8,
  },
  /// `slow` on the call and interrupt forms selects the belt for values the
  /// op retires into the *current* frame: failure-path TRANSIENT markers
  /// and interrupt returns. Call arguments always seed the callee's fast
  /// belt, and a call's own destination bit routes its RET values.
  CallI {
    cond   : Cond,
    src    : u8,
    num    : u8,
    ret    : u8,
    offset : BranchOffset,
    slow   : bool,
    elide  : u8,
  },
  Call {
    cond   : Cond,
    src    : u8,
    target : u8,
    num    : u8,
    ret    : u8,
    slow   : bool,
    elide  : u8,
  },
  Int {
    cond  : Cond,
    src   : u8,
    num   : u8,
    ret   : u8,
    slow  : bool,
    elide : u8,
  },
}

impl TockInstruction {
  pub fn decode(word: Word, dialect: Dialect) -> Option<TockInstruction> {
    let opcode = TockOp::try_from((word & 0xF) as u8).ok()?;
    let slow = 0 != (word & 0x10);

    let elide = |shift: u32, width: u32| -> u8 {
      match dialect {
        Dialect::Mill   => ((word >> shift) & ((1 << width) - 1)) as u8,
        Dialect::Linear => 0,
      }
    };

    // Fields shared by the belt-bit-carrying forms.
    let cond = Cond::from_field(word >> 5);
    let src  = ((word >> 9) & 0x3F) as u8;
    let num  = ((word >> 15) & 0x3F) as u8;

    let instruction = match opcode {
      TockOp::Nop => {
        match slow {
          true  => TockInstruction::Args {
            slots: [
              ((word >>  5) & 0x3F) as u8,
              ((word >> 11) & 0x3F) as u8,
              ((word >> 17) & 0x3F) as u8,
              ((word >> 23) & 0x3F) as u8,
            ]
          },
          false => TockInstruction::Nop { elide: elide(29, 3) },
        }
      }

      TockOp::Jmp => TockInstruction::Jmp { cond, src, target: num },

      TockOp::Ld | TockOp::Ldh | TockOp::Ldb => TockInstruction::Load {
        width: match opcode {
          TockOp::Ld  => MemWidth::Word,
          TockOp::Ldh => MemWidth::Half,
          _           => MemWidth::Byte,
        },
        cond,
        src,
        addr : num,
        slow,
        elide: elide(27, 3),
      },

      TockOp::St | TockOp::Sth | TockOp::Stb => TockInstruction::Store {
        width: match opcode {
          TockOp::St  => MemWidth::Word,
          TockOp::Sth => MemWidth::Half,
          _           => MemWidth::Byte,
        },
        cond,
        src,
        addr : num,
        value: ((word >> 21) & 0x3F) as u8,
        elide: elide(27, 3),
      },

      TockOp::Canon => TockInstruction::Canon {
        cond, src, num, slow, elide: elide(27, 3)
      },

      TockOp::Ret => TockInstruction::Ret {
        cond, src, num, elide: elide(27, 3)
      },

      TockOp::JmpI => match dialect {
        Dialect::Mill => TockInstruction::JmpI {
          cond  : Cond::from_field(word >> 4),
          src   : ((word >> 8) & 0x3F) as u8,
          offset: BranchOffset::Inline(sign_extend_field(word >> 14, 15)),
          elide : elide(29, 3),
        },
        Dialect::Linear => TockInstruction::JmpI {
          cond,
          src,
          offset: match slow {
            // Bit 4 selects the long form: a 26-bit displacement in the
            // next word.
            true  => BranchOffset::Extension,
            false => BranchOffset::Inline(sign_extend_field(word >> 15, 16)),
          },
          elide: 0,
        },
      },

      TockOp::CallI => match dialect {
        Dialect::Mill => TockInstruction::CallI {
          cond  : Cond::Always,
          src   : 0,
          num   : ((word >> 4) & 0x1F) as u8,
          ret   : 0,
          offset: BranchOffset::Inline(sign_extend_field(word >> 9, 20)),
          slow  : false,
          elide : elide(29, 3),
        },
        Dialect::Linear => TockInstruction::CallI {
          cond,
          src,
          num   : ((word >> 21) & 0x1F) as u8,
          ret   : ((word >> 26) & 0x1F) as u8,
          offset: BranchOffset::Extension,
          slow,
          elide : 0,
        },
      },

      TockOp::Call => match dialect {
        Dialect::Mill => TockInstruction::Call {
          cond  : Cond::from_field(word >> 4),
          src   : ((word >> 8) & 0x3F) as u8,
          target: ((word >> 14) & 0x3F) as u8,
          num   : ((word >> 20) & 0x1F) as u8,
          ret   : ((word >> 25) & 0x1F) as u8,
          slow  : false,
          elide : elide(30, 2),
        },
        Dialect::Linear => TockInstruction::Call {
          cond,
          src,
          target: num,
          num   : ((word >> 21) & 0x1F) as u8,
          ret   : ((word >> 26) & 0x1F) as u8,
          slow,
          elide : 0,
        },
      },

      TockOp::Int => match dialect {
        Dialect::Mill => TockInstruction::Int {
          cond : Cond::from_field(word >> 4),
          src  : ((word >> 8) & 0x3F) as u8,
          num  : ((word >> 20) & 0x1F) as u8,
          ret  : ((word >> 25) & 0x1F) as u8,
          slow : false,
          elide: elide(30, 2),
        },
        Dialect::Linear => TockInstruction::Int {
          cond,
          src,
          num  : ((word >> 21) & 0x1F) as u8,
          ret  : ((word >> 26) & 0x1F) as u8,
          slow,
          elide: 0,
        },
      },
    };

    Some(instruction)
  }

  /// Encodes the instruction into a word of the given dialect. The
  /// `Extension` offset encodes only the instruction word; the extension
  /// itself comes from `jump_extension`/`call_extension`.
  pub fn encode(&self, dialect: Dialect) -> Word {
    let elide_bits = |elide: u8, shift: u32, width: u32| -> Word {
      match dialect {
        Dialect::Mill   => ((elide as Word) & ((1 << width) - 1)) << shift,
        Dialect::Linear => 0,
      }
    };

    match *self {
      TockInstruction::Nop { elide } => elide_bits(elide, 29, 3),

      TockInstruction::Args { slots } => {
        0x10
          | (slots[0] as Word & 0x3F) << 5
          | (slots[1] as Word & 0x3F) << 11
          | (slots[2] as Word & 0x3F) << 17
          | (slots[3] as Word & 0x3F) << 23
      }

      TockInstruction::Jmp { cond, src, target } => {
        u8::from(TockOp::Jmp) as Word
          | (u8::from(cond) as Word) << 5
          | (src as Word & 0x3F) << 9
          | (target as Word & 0x3F) << 15
      }

      TockInstruction::Load { width, cond, src, addr, slow, elide } => {
        let opcode = match width {
          MemWidth::Word => TockOp::Ld,
          MemWidth::Half => TockOp::Ldh,
          MemWidth::Byte => TockOp::Ldb,
        };
        u8::from(opcode) as Word
          | if slow { 0x10 } else { 0 }
          | (u8::from(cond) as Word) << 5
          | (src as Word & 0x3F) << 9
          | (addr as Word & 0x3F) << 15
          | elide_bits(elide, 27, 3)
      }

      TockInstruction::Store { width, cond, src, addr, value, elide } => {
        let opcode = match width {
          MemWidth::Word => TockOp::St,
          MemWidth::Half => TockOp::Sth,
          MemWidth::Byte => TockOp::Stb,
        };
        u8::from(opcode) as Word
          | (u8::from(cond) as Word) << 5
          | (src as Word & 0x3F) << 9
          | (addr as Word & 0x3F) << 15
          | (value as Word & 0x3F) << 21
          | elide_bits(elide, 27, 3)
      }

      TockInstruction::Canon { cond, src, num, slow, elide } => {
        u8::from(TockOp::Canon) as Word
          | if slow { 0x10 } else { 0 }
          | (u8::from(cond) as Word) << 5
          | (src as Word & 0x3F) << 9
          | (num as Word & 0x3F) << 15
          | elide_bits(elide, 27, 3)
      }

      TockInstruction::Ret { cond, src, num, elide } => {
        u8::from(TockOp::Ret) as Word
          | (u8::from(cond) as Word) << 5
          | (src as Word & 0x3F) << 9
          | (num as Word & 0x3F) << 15
          | elide_bits(elide, 27, 3)
      }

      TockInstruction::JmpI { cond, src, offset, elide } => {
        let base = u8::from(TockOp::JmpI) as Word;
        match (dialect, offset) {
          (Dialect::Mill, BranchOffset::Inline(displacement)) => {
            base
              | (u8::from(cond) as Word) << 4
              | (src as Word & 0x3F) << 8
              | ((displacement as Word) & 0x7FFF) << 14
              | elide_bits(elide, 29, 3)
          }
          (Dialect::Linear, BranchOffset::Inline(displacement)) => {
            base
              | (u8::from(cond) as Word) << 5
              | (src as Word & 0x3F) << 9
              | ((displacement as Word) & 0xFFFF) << 15
          }
          (_, BranchOffset::Extension) => {
            base
              | 0x10
              | (u8::from(cond) as Word) << 5
              | (src as Word & 0x3F) << 9
          }
        }
      }

      TockInstruction::CallI { cond, src, num, ret, offset, slow, elide } => {
        let base = u8::from(TockOp::CallI) as Word;
        match (dialect, offset) {
          (Dialect::Mill, BranchOffset::Inline(displacement)) => {
            base
              | (num as Word & 0x1F) << 4
              | ((displacement as Word) & 0xF_FFFF) << 9
              | elide_bits(elide, 29, 3)
          }
          _ => {
            base
              | if slow { 0x10 } else { 0 }
              | (u8::from(cond) as Word) << 5
              | (src as Word & 0x3F) << 9
              | (num as Word & 0x1F) << 21
              | (ret as Word & 0x1F) << 26
          }
        }
      }

      TockInstruction::Call { cond, src, target, num, ret, slow, elide } => {
        let base = u8::from(TockOp::Call) as Word;
        match dialect {
          Dialect::Mill => {
            base
              | (u8::from(cond) as Word) << 4
              | (src as Word & 0x3F) << 8
              | (target as Word & 0x3F) << 14
              | (num as Word & 0x1F) << 20
              | (ret as Word & 0x1F) << 25
              | elide_bits(elide, 30, 2)
          }
          Dialect::Linear => {
            base
              | if slow { 0x10 } else { 0 }
              | (u8::from(cond) as Word) << 5
              | (src as Word & 0x3F) << 9
              | (target as Word & 0x3F) << 15
              | (num as Word & 0x1F) << 21
              | (ret as Word & 0x1F) << 26
          }
        }
      }

      TockInstruction::Int { cond, src, num, ret, slow, elide } => {
        let base = u8::from(TockOp::Int) as Word;
        match dialect {
          Dialect::Mill => {
            base
              | (u8::from(cond) as Word) << 4
              | (src as Word & 0x3F) << 8
              | (num as Word & 0x1F) << 20
              | (ret as Word & 0x1F) << 25
              | elide_bits(elide, 30, 2)
          }
          Dialect::Linear => {
            base
              | if slow { 0x10 } else { 0 }
              | (u8::from(cond) as Word) << 5
              | (src as Word & 0x3F) << 9
              | (num as Word & 0x1F) << 21
              | (ret as Word & 0x1F) << 26
          }
        }
      }
    }
  }

  pub fn elide(&self) -> u8 {
    match *self {
      | TockInstruction::Nop { elide }
      | TockInstruction::Load { elide, .. }
      | TockInstruction::Store { elide, .. }
      | TockInstruction::Canon { elide, .. }
      | TockInstruction::Ret { elide, .. }
      | TockInstruction::JmpI { elide, .. }
      | TockInstruction::CallI { elide, .. }
      | TockInstruction::Call { elide, .. }
      | TockInstruction::Int { elide, .. } => elide,
      | TockInstruction::Args { .. } | TockInstruction::Jmp { .. } => 0,
    }
  }
}

impl Display for TockInstruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TockInstruction::Nop { .. } => write!(f, "FNOP"),
      TockInstruction::Args { slots } => {
        write!(f, "ARGS(b{}, b{}, b{}, b{})", slots[0], slots[1], slots[2], slots[3])
      }
      TockInstruction::Jmp { cond, src, target } => {
        write!(f, "Jmp({}, b{}, b{})", cond, src, target)
      }
      TockInstruction::Load { width, cond, src, addr, slow, .. } => {
        write!(f, "Ld{}{}({}, b{}, b{})",
               match width { MemWidth::Word => "", MemWidth::Half => "h", MemWidth::Byte => "b" },
               if *slow { ".s" } else { "" }, cond, src, addr)
      }
      TockInstruction::Store { width, cond, src, addr, value, .. } => {
        write!(f, "St{}({}, b{}, b{}, b{})",
               match width { MemWidth::Word => "", MemWidth::Half => "h", MemWidth::Byte => "b" },
               cond, src, addr, value)
      }
      TockInstruction::Canon { cond, src, num, slow, .. } => {
        write!(f, "Canon{}({}, b{}, {})", if *slow { ".s" } else { "" }, cond, src, num)
      }
      TockInstruction::Ret { cond, src, num, .. } => {
        write!(f, "Ret({}, b{}, {})", cond, src, num)
      }
      TockInstruction::JmpI { cond, src, offset, .. } => match offset {
        BranchOffset::Inline(d) => write!(f, "JmpI({}, b{}, {:+})", cond, src, d),
        BranchOffset::Extension => write!(f, "JmpI({}, b{}, ext)", cond, src),
      },
      TockInstruction::CallI { num, ret, offset, .. } => match offset {
        BranchOffset::Inline(d) => write!(f, "CallI({:+}, {}, {})", d, num, ret),
        BranchOffset::Extension => write!(f, "CallI(ext, {}, {})", num, ret),
      },
      TockInstruction::Call { cond, src, target, num, ret, .. } => {
        write!(f, "Call({}, b{}, b{}, {}, {})", cond, src, target, num, ret)
      }
      TockInstruction::Int { cond, src, num, ret, .. } => {
        write!(f, "Int({}, b{}, {}, {})", cond, src, num, ret)
      }
    }
  }
}


fn sign_extend_field(field: Word, width: u32) -> i64 {
  let field = field & ((1 << width) - 1);
  match 0 != (field & (1 << (width - 1))) {
    true  => (field as i64) - (1i64 << width),
    false => field as i64
  }
}

/// Packs up to four gathered belt indices into an ARGS word.
pub fn args_word(slots: &[u8]) -> Word {
  let mut padded = [0u8; ARGS_SLOT_COUNT];
  padded[..slots.len()].copy_from_slice(slots);
  TockInstruction::Args { slots: padded }.encode(Dialect::Linear)
}

/// The `Linear` extension word carrying a 26-bit CALLI displacement. The
/// ARGS tag bit distinguishes it from a jump extension.
pub fn call_extension(displacement: i64) -> Word {
  0x10 | (((displacement as Word) & 0x3FF_FFFF) << 5)
}

/// The `Linear` extension word carrying a 26-bit JMPI displacement.
pub fn jump_extension(displacement: i64) -> Word {
  ((displacement as Word) & 0x3FF_FFFF) << 5
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserved_opcodes_fail_to_decode() {
    for word in [14u32, 15, 14 | 0x10, 15 | 0x10] {
      assert_eq!(TockInstruction::decode(word, Dialect::Linear), None);
      assert_eq!(TockInstruction::decode(word, Dialect::Mill), None);
    }
  }

  #[test]
  fn args_is_the_tagged_nop() {
    let word = args_word(&[31, 2]);
    assert_eq!(word & 0x1F, 0x10);
    match TockInstruction::decode(word, Dialect::Linear).unwrap() {
      TockInstruction::Args { slots } => assert_eq!(slots, [31, 2, 0, 0]),
      other => panic!("decoded {:?}", other),
    }
    // A bare flow NOP stays a NOP.
    assert_eq!(TockInstruction::decode(0, Dialect::Mill),
               Some(TockInstruction::Nop { elide: 0 }));
  }

  #[test]
  fn load_and_store_round_trip() {
    let load = TockInstruction::Load {
      width: MemWidth::Half,
      cond : Cond::NotZero,
      src  : 3,
      addr : 7,
      slow : true,
      elide: 2,
    };
    let word = load.encode(Dialect::Mill);
    assert_eq!(TockInstruction::decode(word, Dialect::Mill), Some(load));

    let store = TockInstruction::Store {
      width: MemWidth::Byte,
      cond : Cond::Always,
      src  : 0,
      addr : 1,
      value: 2,
      elide: 0,
    };
    for dialect in [Dialect::Linear, Dialect::Mill] {
      let word = store.encode(dialect);
      assert_eq!(TockInstruction::decode(word, dialect), Some(store));
    }
  }

  #[test]
  fn mill_calli_packs_num_and_displacement() {
    // The authoritative inline form: num:5 at bit 4, displacement:20 at
    // bit 9.
    let calli = TockInstruction::CallI {
      cond  : Cond::Always,
      src   : 0,
      num   : 3,
      ret   : 0,
      offset: BranchOffset::Inline(-6),
      slow  : false,
      elide : 0,
    };
    let word = calli.encode(Dialect::Mill);
    assert_eq!(word & 0xF, u8::from(TockOp::CallI) as Word);
    assert_eq!((word >> 4) & 0x1F, 3);
    assert_eq!(TockInstruction::decode(word, Dialect::Mill), Some(calli));
  }

  #[test]
  fn linear_calli_defers_to_an_extension_word() {
    let calli = TockInstruction::CallI {
      cond  : Cond::Always,
      src   : 31,
      num   : 2,
      ret   : 1,
      offset: BranchOffset::Extension,
      slow  : false,
      elide : 0,
    };
    let word = calli.encode(Dialect::Linear);
    assert_eq!(TockInstruction::decode(word, Dialect::Linear), Some(calli));

    // The extension word wears the ARGS tag; a jump extension must not.
    assert_eq!(call_extension(-6) & 0x1F, 0x10);
    assert_eq!(jump_extension(-6) & 0x10, 0);
    assert_eq!((call_extension(-6) >> 5) & 0x3FF_FFFF, 0x3FF_FFFA);
  }

  #[test]
  fn jmpi_signs_extend_per_dialect() {
    let back = TockInstruction::JmpI {
      cond  : Cond::NotZero,
      src   : 0,
      offset: BranchOffset::Inline(-3),
      elide : 0,
    };
    for dialect in [Dialect::Linear, Dialect::Mill] {
      let word = back.encode(dialect);
      match TockInstruction::decode(word, dialect).unwrap() {
        TockInstruction::JmpI { offset: BranchOffset::Inline(d), .. } => assert_eq!(d, -3),
        other => panic!("decoded {:?}", other),
      }
    }
  }

  #[test]
  fn call_round_trips_in_both_dialects() {
    let call = TockInstruction::Call {
      cond  : Cond::Definite,
      src   : 5,
      target: 9,
      num   : 4,
      ret   : 2,
      slow  : false,
      elide : 0,
    };
    for dialect in [Dialect::Linear, Dialect::Mill] {
      let word = call.encode(dialect);
      assert_eq!(TockInstruction::decode(word, dialect), Some(call));
    }
  }

  #[test]
  fn int_matches_the_reference_encoders() {
    // ProgWrite's `_int(C_ALWAYS, 0, 2, 0)` and bfc's `13 | (2 << 21)`.
    let int = TockInstruction::Int {
      cond: Cond::Always, src: 0, num: 2, ret: 0, slow: false, elide: 0
    };
    assert_eq!(int.encode(Dialect::Mill), 13 | (2 << 20));
    assert_eq!(int.encode(Dialect::Linear), 13 | (2 << 21));
  }
}
