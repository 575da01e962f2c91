//! Unsigned LEB128 varints used for archive frame lengths.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `buf`.
pub fn encode(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Write the varint encoding of `value`, returning the number of bytes written.
pub fn write<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode(value, &mut buf);
    writer.write_all(&buf)?;
    Ok(buf.len())
}

/// Read one varint.
///
/// Returns `Ok(None)` on a clean end of stream before the first byte, and the
/// decoded value with its encoded length otherwise. A stream ending mid-varint
/// or a value overflowing u64 is a format error.
pub fn read<R: Read>(reader: &mut R) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    let mut byte = [0u8; 1];

    for i in 0..MAX_VARINT_LEN {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                if i == 0 {
                    return Ok(None);
                }
                return Err(Error::invalid_archive("unexpected end of data inside varint"));
            }
            Err(e) => return Err(e.into()),
        }

        let low = (byte[0] & 0x7f) as u64;
        if i == MAX_VARINT_LEN - 1 && low > 1 {
            return Err(Error::invalid_archive("varint overflows u64"));
        }
        value |= low << (7 * i);

        if byte[0] & 0x80 == 0 {
            if i > 0 && byte[0] == 0 {
                return Err(Error::invalid_archive("varint is not minimally encoded"));
            }
            return Ok(Some((value, i + 1)));
        }
    }

    Err(Error::invalid_archive("varint longer than 10 bytes"))
}
