/*!

  The extra-numerical algebra: what happens to metadata before, during, and
  instead of arithmetic.

  Any operand carrying `TRANSIENT` or `INVALID` suppresses computation and
  propagates a single marker instead. `TRANSIENT` dominates `INVALID`; among
  operands with the same dominant flag, the larger raw value wins. Payloads of
  markers hold the producing flow pc, and a larger pc is the chronologically
  earlier origin, so the rule keeps the oldest provenance alive through chains
  of dependent operations.

*/

use crate::belt::BeltValue;

/// Single-operand screen, used by loads and branch targets.
pub fn propagate1(op: BeltValue) -> Option<BeltValue> {
  match op.is_extra_numerical() {
    true  => Some(op),
    false => None
  }
}

/// Two-operand screen for the binary ALU operations.
pub fn propagate2(op1: BeltValue, op2: BeltValue) -> Option<BeltValue> {
  let (a, b) = (op1.raw(), op2.raw());

  if 0 != (a & b & BeltValue::TRANSIENT) {
    return Some(BeltValue(a.max(b)));
  }
  if 0 != (a & BeltValue::TRANSIENT) {
    return Some(op1);
  }
  if 0 != (b & BeltValue::TRANSIENT) {
    return Some(op2);
  }
  if 0 != (a & b & BeltValue::INVALID) {
    return Some(BeltValue(a.max(b)));
  }
  if 0 != (a & BeltValue::INVALID) {
    return Some(op1);
  }
  if 0 != (b & BeltValue::INVALID) {
    return Some(op2);
  }
  None
}

/// Three-operand screen, used by the long divide.
pub fn propagate3(op1: BeltValue, op2: BeltValue, op3: BeltValue) -> Option<BeltValue> {
  for flag in [BeltValue::TRANSIENT, BeltValue::INVALID] {
    let mut best = flag;
    let mut found = false;
    for op in [op1, op2, op3] {
      if op.has(flag) {
        best = best.max(op.raw());
        found = true;
      }
    }
    if found {
      return Some(BeltValue(best));
    }
  }
  None
}

/**
  The carry-aware 32-bit adder every ADD/SUB path routes through. Operands
  are expected masked to their payloads; `carry_in` contributes its `CARRY`
  bit. The sum keeps bit 32, so the result's `CARRY` flag is free, and signed
  overflow is `((r ^ a) & (r ^ b)) >> 31`.
*/
pub fn add_with_carry(op1: i64, op2: i64, carry_in: i64) -> i64 {
  let cb: i64 = match 0 != (carry_in & BeltValue::CARRY) {
    true  => 1,
    false => 0
  };
  let mut result = (op1 + op2 + cb) & 0x1_FFFF_FFFF;
  if 0 != ((result ^ op1) & (result ^ op2) & 0x8000_0000) {
    result |= BeltValue::OVERFLOW;
  }
  result
}

/// Sign-extends a payload into the full 64-bit working width, deciding by
/// the `NEGATIVE` bit the way the signed divide does.
pub fn sign_extend(op: i64) -> i64 {
  match 0 != (op & BeltValue::NEGATIVE) {
    true  => op | !BeltValue::PAYLOAD_MASK,
    false => op & BeltValue::PAYLOAD_MASK
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clean_operands_propagate_nothing() {
    assert_eq!(propagate2(BeltValue::numeric(1), BeltValue::numeric(2)), None);
    // CARRY and OVERFLOW are not propagating flags.
    let flagged = BeltValue(5 | BeltValue::CARRY | BeltValue::OVERFLOW);
    assert_eq!(propagate2(flagged, BeltValue::numeric(0)), None);
  }

  #[test]
  fn transient_dominates_invalid() {
    let t = BeltValue::transient_at(100);
    let i = BeltValue::invalid_at(50);
    let r = propagate2(t, i).unwrap();
    assert!(r.has(BeltValue::TRANSIENT));
    assert!(!r.has(BeltValue::INVALID));
    assert_eq!(r.payload(), 100);
    // Order of operands is immaterial.
    assert_eq!(propagate2(i, t).unwrap(), r);
  }

  #[test]
  fn larger_payload_wins_among_equals() {
    let early = BeltValue::invalid_at(900);
    let late = BeltValue::invalid_at(20);
    assert_eq!(propagate2(early, late).unwrap().payload(), 900);

    let t1 = BeltValue::transient_at(3);
    let t2 = BeltValue::transient_at(44);
    assert_eq!(propagate2(t1, t2).unwrap().payload(), 44);
  }

  #[test]
  fn three_operand_screen() {
    let t = BeltValue::transient_at(7);
    let i = BeltValue::invalid_at(90);
    let n = BeltValue::numeric(5);
    assert_eq!(propagate3(n, i, t).unwrap(), t);
    assert_eq!(propagate3(n, i, n).unwrap(), i);
    assert_eq!(propagate3(n, n, n), None);
  }

  #[test]
  fn adder_carry_and_overflow() {
    // 0xFFFFFFFF + 1 carries out and lands on zero.
    let r = add_with_carry(0xFFFF_FFFF, 1, 0);
    assert_eq!(r & BeltValue::PAYLOAD_MASK, 0);
    assert_ne!(r & BeltValue::CARRY, 0);
    assert_eq!(r & BeltValue::OVERFLOW, 0);

    // INT_MAX + 1 overflows without carrying.
    let r = add_with_carry(0x7FFF_FFFF, 1, 0);
    assert_eq!(r & BeltValue::PAYLOAD_MASK, 0x8000_0000);
    assert_eq!(r & BeltValue::CARRY, 0);
    assert_ne!(r & BeltValue::OVERFLOW, 0);

    // Carry-in contributes exactly one.
    let r = add_with_carry(2, 3, BeltValue::CARRY);
    assert_eq!(r & BeltValue::PAYLOAD_MASK, 6);
  }

  #[test]
  fn sign_extension_follows_negative_bit() {
    assert_eq!(sign_extend(0xFFFF_FFFF), -1);
    assert_eq!(sign_extend(5), 5);
    assert_eq!(sign_extend(0x8000_0000), -0x8000_0000);
  }
}
