/*!

  The on-disk image codec.

  Every image opens with the same 16-byte header: a four-byte magic naming
  the dialect (`Mill` or `LINB`), a two-byte endianness marker, one decimal
  digit for the producing host's pointer width, a space, a four-byte kind
  (`Prog` or `Core`), and four bytes of padding. Numeric fields after the
  header are native-endian, which is why the endianness and width checks
  are hard rejections rather than conversions.

  A `Prog` image is a memory size, an entry point, and a list of blocks to
  scatter into memory. A `Core` image is a full machine dump: memory, the
  frame stack, and (for `Mill` frames) the pipeline stall state and retire
  stations, so a paused multi-unit machine resumes mid-call-chain. Vacant
  value slots in serialized belts and stations are padded with the `EMPTY`
  sentinel, the only place that flag is ever written down.

*/

use std::io::{Cursor, Write};
use std::path::Path;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use nom::branch::alt;
use nom::bytes::complete::{tag, take};
use nom::IResult;
use thiserror::Error;

use crate::belt::{BeltValue, BELT_SIZE};
use crate::bytecode::{Dialect, MemWidth};
#[cfg(test)]
use crate::bytecode::Word;
use crate::machine::{Frame, Machine};
use crate::station::{FlowIntent, PendingStore, RetireStation, UnitFault};

pub const HEADER_LEN: usize = 16;
/// The snapshot written on normal exit.
pub const SNAPSHOT_FILE: &str = "MillULX.core";

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageKind {
  Prog,
  Core,
}

#[derive(Error, Debug)]
pub enum ImageError {
  #[error("cannot open image: {0}")]
  Io(#[from] std::io::Error),
  #[error("not an image")]
  BadMagic,
  #[error("only images of the same endianness as the host machine are supported")]
  ForeignEndianness,
  #[error("image uses a different size of a 'size' than is supported")]
  SizeMismatch,
  #[error("image format not recognized")]
  UnknownKind,
  #[error("image is truncated")]
  Truncated,
  #[error("program block lies outside memory")]
  BlockOutOfRange,
}

fn host_endianness() -> &'static [u8; 2] {
  match cfg!(target_endian = "little") {
    true  => b"LE",
    false => b"BE",
  }
}

fn host_width_digit() -> u8 {
  b'0' + std::mem::size_of::<usize>() as u8
}

/// Parses the 16-byte header, rejecting anything the host cannot execute.
pub fn parse_header(input: &[u8]) -> Result<(Dialect, ImageKind), ImageError> {
  fn magic(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag("Mill"), tag("LINB")))(input)
  }
  fn kind(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag("Core"), tag("Prog")))(input)
  }

  let (rest, magic) = magic(input).map_err(|_| ImageError::BadMagic)?;
  let dialect = match magic {
    b"Mill" => Dialect::Mill,
    _       => Dialect::Linear,
  };

  let (rest, endian) =
    take::<_, _, nom::error::Error<&[u8]>>(2usize)(rest)
      .map_err(|_| ImageError::Truncated)?;
  if endian != host_endianness() {
    return Err(ImageError::ForeignEndianness);
  }

  let (rest, width) =
    take::<_, _, nom::error::Error<&[u8]>>(2usize)(rest)
      .map_err(|_| ImageError::Truncated)?;
  if width[0] != host_width_digit() {
    return Err(ImageError::SizeMismatch);
  }

  let (_rest, kind) = kind(rest).map_err(|_| ImageError::UnknownKind)?;
  let kind = match kind {
    b"Prog" => ImageKind::Prog,
    _       => ImageKind::Core,
  };

  Ok((dialect, kind))
}

fn build_header(dialect: Dialect, kind: ImageKind) -> [u8; HEADER_LEN] {
  let mut header = [b' '; HEADER_LEN];
  header[0..4].copy_from_slice(match dialect {
    Dialect::Mill   => b"Mill",
    Dialect::Linear => b"LINB",
  });
  header[4..6].copy_from_slice(host_endianness());
  header[6] = host_width_digit();
  header[8..12].copy_from_slice(match kind {
    ImageKind::Prog => b"Prog",
    ImageKind::Core => b"Core",
  });
  header
}

/// Loads an image from raw bytes: a fresh machine for a `Prog`, a restored
/// one for a `Core`. The dialect tells the caller which core to run.
pub fn load_bytes(bytes: &[u8]) -> Result<(Machine, Dialect), ImageError> {
  if bytes.len() < HEADER_LEN {
    return Err(ImageError::BadMagic);
  }
  let (dialect, kind) = parse_header(&bytes[..HEADER_LEN])?;
  let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
  let machine = match kind {
    ImageKind::Prog => read_prog(&mut cursor, dialect)?,
    ImageKind::Core => read_core(&mut cursor, dialect)?,
  };
  Ok((machine, dialect))
}

pub fn load_file(path: &Path) -> Result<(Machine, Dialect), ImageError> {
  let bytes = std::fs::read(path)?;
  load_bytes(&bytes)
}

/// Serializes the machine as a `Core` image.
pub fn core_snapshot(machine: &Machine, dialect: Dialect) -> Vec<u8> {
  let mut bytes = Vec::new();
  bytes.extend_from_slice(&build_header(dialect, ImageKind::Core));
  // Writing to a Vec cannot fail.
  write_core(&mut bytes, machine, dialect).unwrap();
  bytes
}

pub fn write_snapshot_file(
  path: &Path,
  machine: &Machine,
  dialect: Dialect
) -> std::io::Result<()> {
  std::fs::write(path, core_snapshot(machine, dialect))
}


// region Prog payload

fn read_prog(cursor: &mut Cursor<&[u8]>, dialect: Dialect) -> Result<Machine, ImageError> {
  let memsize = read_size(cursor)?;
  let entry = read_size(cursor)?;
  let block_count = read_size(cursor)?;

  let mut machine = Machine::new(memsize);
  machine.frames[0].entry_point = entry;
  machine.frames[0].pc = entry;
  if Dialect::Mill == dialect {
    machine.frames[0].flow_pc = entry;
  }

  for _ in 0..block_count {
    let block_entry = read_size(cursor)?;
    let block_size = read_size(cursor)?;
    let end = block_entry
      .checked_add(block_size)
      .ok_or(ImageError::BlockOutOfRange)?;
    if end > memsize {
      return Err(ImageError::BlockOutOfRange);
    }
    for offset in 0..block_size {
      machine.memory[block_entry + offset] =
        cursor.read_u32::<NativeEndian>().map_err(|_| ImageError::Truncated)?;
    }
  }

  Ok(machine)
}

// endregion

// region Core payload

fn write_core(
  out: &mut dyn Write,
  machine: &Machine,
  dialect: Dialect
) -> std::io::Result<()> {
  out.write_u64::<NativeEndian>(machine.memsize() as u64)?;
  for word in &machine.memory {
    out.write_u32::<NativeEndian>(*word)?;
  }
  out.write_u64::<NativeEndian>(machine.frames.len() as u64)?;
  for frame in &machine.frames {
    write_frame(out, frame, dialect)?;
  }
  Ok(())
}

fn read_core(cursor: &mut Cursor<&[u8]>, dialect: Dialect) -> Result<Machine, ImageError> {
  let memsize = read_size(cursor)?;
  let mut machine = Machine::new(memsize);
  for index in 0..memsize {
    machine.memory[index] =
      cursor.read_u32::<NativeEndian>().map_err(|_| ImageError::Truncated)?;
  }
  let frame_count = read_size(cursor)?;
  machine.frames.clear();
  for _ in 0..frame_count {
    machine.frames.push(read_frame(cursor, dialect)?);
  }
  if machine.frames.is_empty() {
    // A machine without a frame cannot run; treat it as a damaged image.
    return Err(ImageError::Truncated);
  }
  Ok(machine)
}

fn write_frame(out: &mut dyn Write, frame: &Frame, dialect: Dialect) -> std::io::Result<()> {
  for index in 0..BELT_SIZE {
    out.write_i64::<NativeEndian>(frame.fast.slot(index).raw())?;
  }
  for index in 0..BELT_SIZE {
    out.write_i64::<NativeEndian>(frame.slow.slot(index).raw())?;
  }
  out.write_u64::<NativeEndian>(frame.fast.front_index() as u64)?;
  out.write_u64::<NativeEndian>(frame.fast.len() as u64)?;
  out.write_u64::<NativeEndian>(frame.slow.front_index() as u64)?;
  out.write_u64::<NativeEndian>(frame.slow.len() as u64)?;
  out.write_u64::<NativeEndian>(frame.pc as u64)?;
  out.write_u64::<NativeEndian>(frame.flow_pc as u64)?;
  out.write_u64::<NativeEndian>(frame.entry_point as u64)?;
  out.write_u32::<NativeEndian>(frame.call_op)?;
  out.write_u32::<NativeEndian>(0)?; // alignment pad

  if Dialect::Mill == dialect {
    out.write_u64::<NativeEndian>(frame.resume_slot as u64)?;
    out.write_u32::<NativeEndian>(frame.alu_stall)?;
    out.write_u32::<NativeEndian>(frame.flow_stall)?;
    out.write_u64::<NativeEndian>(frame.alu_stations.len() as u64)?;
    for station in &frame.alu_stations {
      write_station(out, station)?;
    }
    out.write_u64::<NativeEndian>(frame.flow_stations.len() as u64)?;
    for station in &frame.flow_stations {
      write_station(out, station)?;
    }
  }
  Ok(())
}

fn read_frame(cursor: &mut Cursor<&[u8]>, dialect: Dialect) -> Result<Frame, ImageError> {
  let mut frame = Frame::new();

  let mut fast = [BeltValue(0); BELT_SIZE];
  for slot in fast.iter_mut() {
    *slot = BeltValue(read_i64(cursor)?);
  }
  let mut slow = [BeltValue(0); BELT_SIZE];
  for slot in slow.iter_mut() {
    *slot = BeltValue(read_i64(cursor)?);
  }
  let ffront = read_size(cursor)?;
  let fsize = read_size(cursor)?;
  let sfront = read_size(cursor)?;
  let ssize = read_size(cursor)?;
  frame.fast.restore(fast, ffront, fsize);
  frame.slow.restore(slow, sfront, ssize);

  frame.pc = read_size(cursor)?;
  frame.flow_pc = read_size(cursor)?;
  frame.entry_point = read_size(cursor)?;
  frame.call_op = read_u32(cursor)?;
  let _pad = read_u32(cursor)?;

  if Dialect::Mill == dialect {
    frame.resume_slot = read_size(cursor)?;
    frame.alu_stall = read_u32(cursor)?;
    frame.flow_stall = read_u32(cursor)?;
    let alu_count = read_size(cursor)?;
    for _ in 0..alu_count {
      frame.alu_stations.push(read_station(cursor)?);
    }
    let flow_count = read_size(cursor)?;
    for _ in 0..flow_count {
      frame.flow_stations.push(read_station(cursor)?);
    }
  }
  Ok(frame)
}

/// Value lists inside a station are written as fixed `BELT_SIZE` blocks,
/// vacant slots carrying the `EMPTY` sentinel.
fn write_value_block(out: &mut dyn Write, values: &[BeltValue]) -> std::io::Result<()> {
  for index in 0..BELT_SIZE {
    let value = values
      .get(index)
      .map(BeltValue::raw)
      .unwrap_or(BeltValue::EMPTY);
    out.write_i64::<NativeEndian>(value)?;
  }
  Ok(())
}

fn read_value_block(cursor: &mut Cursor<&[u8]>) -> Result<Vec<BeltValue>, ImageError> {
  let mut values = Vec::new();
  let mut done = false;
  for _ in 0..BELT_SIZE {
    let raw = read_i64(cursor)?;
    // The block must still be consumed in full once the sentinel appears.
    if 0 != (raw & BeltValue::EMPTY) {
      done = true;
    } else if !done {
      values.push(BeltValue(raw));
    }
  }
  Ok(values)
}

fn write_station(out: &mut dyn Write, station: &RetireStation) -> std::io::Result<()> {
  write_value_block(out, &station.fast)?;
  write_value_block(out, &station.slow)?;
  write_value_block(out, &station.gathered)?;
  out.write_u32::<NativeEndian>(station.nops as u32)?;
  out.write_u32::<NativeEndian>(station.ext_words)?;

  match station.branch {
    Some(target) => {
      out.write_u32::<NativeEndian>(1)?;
      out.write_u64::<NativeEndian>(target as u64)?;
    }
    None => {
      out.write_u32::<NativeEndian>(0)?;
      out.write_u64::<NativeEndian>(0)?;
    }
  }

  let (intent, entry, ret, slow) = match station.intent {
    FlowIntent::None                => (0u32, 0u64, 0u32, 0u32),
    FlowIntent::Call { entry, ret } => (1, entry as u64, ret as u32, 0),
    FlowIntent::Ret                 => (2, 0, 0, 0),
    FlowIntent::Interrupt { slow }  => (3, 0, 0, slow as u32),
    FlowIntent::Canon { slow }      => (4, 0, 0, slow as u32),
  };
  out.write_u32::<NativeEndian>(intent)?;
  out.write_u64::<NativeEndian>(entry)?;
  out.write_u32::<NativeEndian>(ret)?;
  out.write_u32::<NativeEndian>(slow)?;

  out.write_u64::<NativeEndian>(station.stores.len() as u64)?;
  for store in &station.stores {
    out.write_u32::<NativeEndian>(store.address)?;
    out.write_u32::<NativeEndian>(store.value)?;
    out.write_u32::<NativeEndian>(match store.width {
      MemWidth::Word => 0,
      MemWidth::Half => 1,
      MemWidth::Byte => 2,
    })?;
  }

  let (fault, fault_at) = match station.fault {
    None                                           => (0u32, 0u64),
    Some(UnitFault::InvalidOperation { pc })       => (1, pc as u64),
    Some(UnitFault::InvalidProgramCounter { pc })  => (2, pc as u64),
    Some(UnitFault::BranchToInvalid { pc })        => (3, pc as u64),
    Some(UnitFault::StoreOfInvalid { pc })         => (4, pc as u64),
    Some(UnitFault::StoreToInvalid { pc })         => (5, pc as u64),
    Some(UnitFault::InvalidInterrupt { code })     => (6, code as u64),
  };
  out.write_u32::<NativeEndian>(fault)?;
  out.write_u64::<NativeEndian>(fault_at)?;
  Ok(())
}

fn read_station(cursor: &mut Cursor<&[u8]>) -> Result<RetireStation, ImageError> {
  let mut station = RetireStation::default();
  station.fast = read_value_block(cursor)?;
  station.slow = read_value_block(cursor)?;
  station.gathered = read_value_block(cursor)?;
  station.nops = read_u32(cursor)? as u8;
  station.ext_words = read_u32(cursor)?;

  let branched = read_u32(cursor)?;
  let target = read_size(cursor)?;
  station.branch = match branched {
    0 => None,
    _ => Some(target),
  };

  let intent = read_u32(cursor)?;
  let entry = read_size(cursor)?;
  let ret = read_u32(cursor)? as u8;
  let slow = 0 != read_u32(cursor)?;
  station.intent = match intent {
    0 => FlowIntent::None,
    1 => FlowIntent::Call { entry, ret },
    2 => FlowIntent::Ret,
    3 => FlowIntent::Interrupt { slow },
    4 => FlowIntent::Canon { slow },
    _ => return Err(ImageError::Truncated),
  };

  let store_count = read_size(cursor)?;
  for _ in 0..store_count {
    let address = read_u32(cursor)?;
    let value = read_u32(cursor)?;
    let width = match read_u32(cursor)? {
      0 => MemWidth::Word,
      1 => MemWidth::Half,
      2 => MemWidth::Byte,
      _ => return Err(ImageError::Truncated),
    };
    station.stores.push(PendingStore { address, value, width });
  }

  let fault = read_u32(cursor)?;
  let fault_at = read_size(cursor)?;
  station.fault = match fault {
    0 => None,
    1 => Some(UnitFault::InvalidOperation { pc: fault_at }),
    2 => Some(UnitFault::InvalidProgramCounter { pc: fault_at }),
    3 => Some(UnitFault::BranchToInvalid { pc: fault_at }),
    4 => Some(UnitFault::StoreOfInvalid { pc: fault_at }),
    5 => Some(UnitFault::StoreToInvalid { pc: fault_at }),
    6 => Some(UnitFault::InvalidInterrupt { code: fault_at as u32 }),
    _ => return Err(ImageError::Truncated),
  };

  Ok(station)
}

// endregion

// region Primitive reads

fn read_size(cursor: &mut Cursor<&[u8]>) -> Result<usize, ImageError> {
  cursor
    .read_u64::<NativeEndian>()
    .map(|value| value as usize)
    .map_err(|_| ImageError::Truncated)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ImageError> {
  cursor.read_u32::<NativeEndian>().map_err(|_| ImageError::Truncated)
}

fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64, ImageError> {
  cursor.read_i64::<NativeEndian>().map_err(|_| ImageError::Truncated)
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;

  fn prog_image(dialect: Dialect, memsize: u64, entry: u64, words: &[Word]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&build_header(dialect, ImageKind::Prog));
    bytes.write_u64::<NativeEndian>(memsize).unwrap();
    bytes.write_u64::<NativeEndian>(entry).unwrap();
    bytes.write_u64::<NativeEndian>(1).unwrap(); // one block
    bytes.write_u64::<NativeEndian>(0).unwrap(); // block entry
    bytes.write_u64::<NativeEndian>(words.len() as u64).unwrap();
    for word in words {
      bytes.write_u32::<NativeEndian>(*word).unwrap();
    }
    bytes
  }

  #[test]
  fn header_round_trips() {
    for dialect in [Dialect::Linear, Dialect::Mill] {
      for kind in [ImageKind::Prog, ImageKind::Core] {
        let header = build_header(dialect, kind);
        assert_eq!(parse_header(&header).unwrap(), (dialect, kind));
      }
    }
  }

  #[test]
  fn header_rejections() {
    assert!(matches!(parse_header(b"Nope????????????"), Err(ImageError::BadMagic)));

    let mut foreign = build_header(Dialect::Linear, ImageKind::Prog);
    foreign[4..6].copy_from_slice(match cfg!(target_endian = "little") {
      true  => b"BE",
      false => b"LE",
    });
    assert!(matches!(parse_header(&foreign), Err(ImageError::ForeignEndianness)));

    let mut narrow = build_header(Dialect::Linear, ImageKind::Prog);
    narrow[6] = b'4';
    assert!(matches!(parse_header(&narrow), Err(ImageError::SizeMismatch)));

    let mut unkind = build_header(Dialect::Linear, ImageKind::Prog);
    unkind[8..12].copy_from_slice(b"Blob");
    assert!(matches!(parse_header(&unkind), Err(ImageError::UnknownKind)));
  }

  #[test]
  fn prog_image_loads_blocks() {
    let words = [7, 8, 9];
    let bytes = prog_image(Dialect::Linear, 16, 1, &words);
    let (machine, dialect) = load_bytes(&bytes).unwrap();
    assert_eq!(dialect, Dialect::Linear);
    assert_eq!(machine.memsize(), 16);
    assert_eq!(&machine.memory[0..3], &words);
    assert_eq!(machine.memory[3], 0);
    assert_eq!(machine.frames[0].pc, 1);
    assert_eq!(machine.frames[0].entry_point, 1);
  }

  #[test]
  fn prog_block_bounds_are_checked() {
    let bytes = prog_image(Dialect::Mill, 2, 0, &[1, 2, 3]);
    assert!(matches!(load_bytes(&bytes), Err(ImageError::BlockOutOfRange)));
  }

  #[test]
  fn core_snapshot_round_trips() {
    let mut machine = Machine::new(8);
    machine.memory[3] = 0xDEAD_BEEF;
    machine.frames[0].pc = 5;
    machine.frames[0].entry_point = 2;
    machine.frames[0].call_op = 0x1234;
    machine.frame_mut().retire(BeltValue::numeric(42), false);
    machine.frame_mut().retire(BeltValue::transient_at(7), true);

    // A second frame mid-call.
    let mut callee = Frame::new();
    callee.pc = 6;
    callee.retire(BeltValue::numeric(1), false);
    machine.frames.push(callee);

    let bytes = core_snapshot(&machine, Dialect::Linear);
    let (restored, dialect) = load_bytes(&bytes).unwrap();
    assert_eq!(dialect, Dialect::Linear);
    assert_eq!(restored, machine);
  }

  #[test]
  fn mill_snapshot_keeps_stations() {
    let mut machine = Machine::new(4);
    machine.frames[0].flow_pc = 3;
    machine.frames[0].alu_stall = 2;
    machine.frames[0].resume_slot = 1;

    let mut station = RetireStation::default();
    station.fast.push(BeltValue::numeric(9));
    station.gathered.push(BeltValue::numeric(1));
    station.intent = FlowIntent::Call { entry: 12, ret: 2 };
    station.stores.push(PendingStore { address: 5, value: 6, width: MemWidth::Half });
    station.ext_words = 1;
    station.branch = Some(12);
    station.fault = Some(UnitFault::StoreOfInvalid { pc: 3 });
    machine.frames[0].flow_stations.push(station);
    machine.frames[0].alu_stations.push(RetireStation::default());

    let bytes = core_snapshot(&machine, Dialect::Mill);
    let (restored, _) = load_bytes(&bytes).unwrap();
    assert_eq!(restored, machine);
  }

  #[test]
  fn linear_snapshot_drops_station_state() {
    // The Linear core never populates stations, and its snapshot layout
    // does not carry them.
    let mut machine = Machine::new(2);
    machine.frames[0].alu_stations.push(RetireStation::default());
    let bytes = core_snapshot(&machine, Dialect::Linear);
    let (restored, _) = load_bytes(&bytes).unwrap();
    assert_eq!(restored.frames[0].alu_stations.len(), 0);
  }
}
