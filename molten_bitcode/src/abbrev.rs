//! Abbreviation machinery.
//!
//! Records can be emitted through abbreviations: per-block templates that
//! fix each field's encoding (literal, fixed-width, VBR, 6-bit char, array,
//! blob). Abbreviations are defined inline in a block or registered for a
//! block id in the BLOCKINFO block.

use crate::bitstream::BitCursor;
use molten_core::EngineError;
use std::sync::Arc;

// =============================================================================
// Abbreviation Model
// =============================================================================

/// One field encoding inside an abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbbrevOp {
    /// The field is not in the stream; it always has this value.
    Literal(u64),
    /// Fixed-width field of `0..=64` bits.
    Fixed(u32),
    /// VBR field with the given chunk width.
    Vbr(u32),
    /// The next operand repeats `n` times, with `n` read as VBR6.
    Array,
    /// 6-bit character (`[a-zA-Z0-9._]`).
    Char6,
    /// Byte blob with 32-bit alignment on both sides.
    Blob,
}

/// A complete abbreviation: the ordered field encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbrev {
    /// Field operands, in stream order.
    pub ops: Vec<AbbrevOp>,
}

/// A decoded record: its code, scalar fields, and optional trailing blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// The record code (first abstract operand).
    pub code: u64,
    /// Scalar fields after the code.
    pub fields: Vec<u64>,
    /// Blob payload, if the abbreviation carried one.
    pub blob: Option<Vec<u8>>,
}

impl Record {
    /// Field at `i`, or a malformed-record error.
    pub fn field(&self, i: usize, cursor: &BitCursor<'_>) -> Result<u64, EngineError> {
        self.fields
            .get(i)
            .copied()
            .ok_or_else(|| cursor.malformed(format!("record {} too short", self.code)))
    }

    /// Interpret the fields starting at `from` as a string.
    pub fn string_from(&self, from: usize) -> String {
        self.fields[from.min(self.fields.len())..]
            .iter()
            .map(|&c| c as u8 as char)
            .collect()
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Read a `DEFINE_ABBREV` body (the builtin abbrev id has already been
/// consumed).
pub fn read_abbrev_def(cursor: &mut BitCursor<'_>) -> Result<Arc<Abbrev>, EngineError> {
    let numops = cursor.read_vbr(5)?;
    if numops == 0 || numops > 64 {
        return Err(cursor.malformed(format!("abbreviation with {numops} operands")));
    }
    let mut ops = Vec::with_capacity(numops as usize);
    for _ in 0..numops {
        let is_literal = cursor.read(1)? != 0;
        if is_literal {
            ops.push(AbbrevOp::Literal(cursor.read_vbr(8)?));
            continue;
        }
        let encoding = cursor.read(3)?;
        ops.push(match encoding {
            1 => {
                let w = cursor.read_vbr(5)?;
                AbbrevOp::Fixed(check_width(cursor, w)?)
            }
            2 => {
                let w = cursor.read_vbr(5)?;
                AbbrevOp::Vbr(check_vbr_width(cursor, w)?)
            }
            3 => AbbrevOp::Array,
            4 => AbbrevOp::Char6,
            5 => AbbrevOp::Blob,
            other => {
                return Err(cursor.malformed(format!("unknown abbrev operand encoding {other}")))
            }
        });
    }
    Ok(Arc::new(Abbrev { ops }))
}

fn check_width(cursor: &BitCursor<'_>, width: u64) -> Result<u32, EngineError> {
    if width > 64 {
        return Err(cursor.malformed(format!("fixed abbrev width {width} out of range")));
    }
    Ok(width as u32)
}

fn check_vbr_width(cursor: &BitCursor<'_>, width: u64) -> Result<u32, EngineError> {
    if !(2..=32).contains(&width) {
        return Err(cursor.malformed(format!("VBR abbrev width {width} out of range")));
    }
    Ok(width as u32)
}

/// Read one record through `abbrev`.
pub fn read_abbreviated_record(
    cursor: &mut BitCursor<'_>,
    abbrev: &Abbrev,
) -> Result<Record, EngineError> {
    let mut values: Vec<u64> = Vec::with_capacity(abbrev.ops.len());
    let mut blob = None;

    let mut i = 0;
    while i < abbrev.ops.len() {
        match abbrev.ops[i] {
            AbbrevOp::Literal(v) => values.push(v),
            AbbrevOp::Fixed(w) => values.push(cursor.read(w)?),
            AbbrevOp::Vbr(w) => values.push(cursor.read_vbr(w)?),
            AbbrevOp::Char6 => {
                let code = cursor.read(6)?;
                values.push(decode_char6(cursor, code)?)
            }
            AbbrevOp::Array => {
                let count = cursor.read_vbr(6)?;
                i += 1;
                let elem = *abbrev
                    .ops
                    .get(i)
                    .ok_or_else(|| cursor.malformed("array abbrev missing element operand"))?;
                for _ in 0..count {
                    match elem {
                        AbbrevOp::Literal(v) => values.push(v),
                        AbbrevOp::Fixed(w) => values.push(cursor.read(w)?),
                        AbbrevOp::Vbr(w) => values.push(cursor.read_vbr(w)?),
                        AbbrevOp::Char6 => {
                let code = cursor.read(6)?;
                values.push(decode_char6(cursor, code)?)
            }
                        AbbrevOp::Array | AbbrevOp::Blob => {
                            return Err(cursor.malformed("invalid array element encoding"));
                        }
                    }
                }
            }
            AbbrevOp::Blob => {
                let len = cursor.read_vbr(6)? as usize;
                cursor.align32()?;
                let bytes = cursor.read_bytes(len)?.to_vec();
                cursor.align32()?;
                blob = Some(bytes);
            }
        }
        i += 1;
    }

    if values.is_empty() {
        return Err(cursor.malformed("abbreviated record with no code"));
    }
    let code = values.remove(0);
    Ok(Record {
        code,
        fields: values,
        blob,
    })
}

/// Read an `UNABBREV_RECORD` body: `code` then `numops` VBR6 fields.
pub fn read_unabbrev_record(cursor: &mut BitCursor<'_>) -> Result<Record, EngineError> {
    let code = cursor.read_vbr(6)?;
    let numops = cursor.read_vbr(6)?;
    if numops > (1 << 24) {
        return Err(cursor.malformed(format!("unabbreviated record with {numops} operands")));
    }
    let mut fields = Vec::with_capacity(numops as usize);
    for _ in 0..numops {
        fields.push(cursor.read_vbr(6)?);
    }
    Ok(Record {
        code,
        fields,
        blob: None,
    })
}

/// Decode a 6-bit character code to its byte value.
fn decode_char6(cursor: &BitCursor<'_>, code: u64) -> Result<u64, EngineError> {
    Ok(u64::from(match code {
        0..=25 => b'a' + code as u8,
        26..=51 => b'A' + (code - 26) as u8,
        52..=61 => b'0' + (code - 52) as u8,
        62 => b'.',
        63 => b'_',
        _ => return Err(cursor.malformed(format!("char6 code {code} out of range"))),
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::testutil::BitWriter;

    #[test]
    fn test_unabbrev_record_roundtrip() {
        let mut w = BitWriter::new();
        // code=7, numops=3, fields 10, 20, 300.
        w.write_vbr(7, 6);
        w.write_vbr(3, 6);
        w.write_vbr(10, 6);
        w.write_vbr(20, 6);
        w.write_vbr(300, 6);
        let bytes = w.into_bytes();
        let mut c = BitCursor::new(&bytes);
        let rec = read_unabbrev_record(&mut c).unwrap();
        assert_eq!(rec.code, 7);
        assert_eq!(rec.fields, vec![10, 20, 300]);
    }

    #[test]
    fn test_abbrev_def_roundtrip() {
        let mut w = BitWriter::new();
        // 3 ops: literal 4, fixed(8), array of char6.
        w.write_vbr(4, 5); // numops
        w.write(1, 1); // literal
        w.write_vbr(4, 8);
        w.write(0, 1); // encoded
        w.write(1, 3); // fixed
        w.write_vbr(8, 5);
        w.write(0, 1);
        w.write(3, 3); // array
        w.write(0, 1);
        w.write(4, 3); // char6
        let bytes = w.into_bytes();
        let mut c = BitCursor::new(&bytes);
        let abbrev = read_abbrev_def(&mut c).unwrap();
        assert_eq!(
            abbrev.ops,
            vec![
                AbbrevOp::Literal(4),
                AbbrevOp::Fixed(8),
                AbbrevOp::Array,
                AbbrevOp::Char6,
            ]
        );
    }

    #[test]
    fn test_abbreviated_record_with_array() {
        let abbrev = Abbrev {
            ops: vec![AbbrevOp::Literal(9), AbbrevOp::Array, AbbrevOp::Char6],
        };
        let mut w = BitWriter::new();
        w.write_vbr(2, 6); // array count
        w.write(0, 6); // 'a'
        w.write(27, 6); // 'B'
        let bytes = w.into_bytes();
        let mut c = BitCursor::new(&bytes);
        let rec = read_abbreviated_record(&mut c, &abbrev).unwrap();
        assert_eq!(rec.code, 9);
        assert_eq!(rec.fields, vec![u64::from(b'a'), u64::from(b'B')]);
    }

    #[test]
    fn test_char6_alphabet() {
        let cases = [(0, b'a'), (25, b'z'), (26, b'A'), (52, b'0'), (63, b'_')];
        let buf = [0u8];
        let cursor = BitCursor::new(&buf);
        for (code, ch) in cases {
            assert_eq!(decode_char6(&cursor, code).unwrap(), u64::from(ch));
        }
        assert!(decode_char6(&cursor, 64).is_err());
    }

    #[test]
    fn test_record_string_helper() {
        let rec = Record {
            code: 2,
            fields: b"x86_64".iter().map(|&b| u64::from(b)).collect(),
            blob: None,
        };
        assert_eq!(rec.string_from(0), "x86_64");
    }
}
