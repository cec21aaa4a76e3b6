//! Decoder for Git delta instruction streams, rebuilding target objects from
//! a base buffer plus the instruction stream carried by OffsetDelta and
//! HashDelta pack entries (base size + result size + op codes).

use std::io::{ErrorKind, Read};

use crate::errors::GitError;

const COPY_INSTRUCTION_FLAG: u8 = 1 << 7; // msb set => copy from base, otherwise inline data
const COPY_OFFSET_BYTES: u8 = 4;
const COPY_SIZE_BYTES: u8 = 3;
const COPY_ZERO_SIZE: usize = 0x10000;

const VAR_INT_ENCODING_BITS: u8 = 7;
const VAR_INT_CONTINUE_FLAG: u8 = 1 << VAR_INT_ENCODING_BITS;

/// Read exactly `N` bytes from the stream into a fixed array.
#[inline]
pub fn read_bytes<R: Read, const N: usize>(stream: &mut R) -> std::io::Result<[u8; N]> {
    let mut bytes = [0; N];
    stream.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Read one varint byte, returning (7-bit value, has_more flag).
pub fn read_var_int_byte<R: Read>(stream: &mut R) -> std::io::Result<(u8, bool)> {
    let [byte] = read_bytes(stream)?;
    let value = byte & !VAR_INT_CONTINUE_FLAG;
    let more_bytes = byte & VAR_INT_CONTINUE_FLAG != 0;
    Ok((value, more_bytes))
}

/// Read a Git-style varint (little-endian 7-bit chunks with msb as continue flag).
pub fn read_size_encoding<R: Read>(stream: &mut R) -> std::io::Result<usize> {
    let mut value = 0;
    let mut length = 0;
    loop {
        let (byte_value, more_bytes) = read_var_int_byte(stream)?;
        value |= (byte_value as usize) << length;
        if !more_bytes {
            return Ok(value);
        }
        length += VAR_INT_ENCODING_BITS;
    }
}

/// Read a partial integer according to presence bits (used by copy
/// instructions): for each bit set in `present_bytes`, consume one byte and
/// accumulate into the value, shifting per byte index.
pub fn read_partial_int<R: Read>(
    stream: &mut R,
    bytes: u8,
    present_bytes: &mut u8,
) -> std::io::Result<usize> {
    let mut value: usize = 0;
    for byte_index in 0..bytes {
        if *present_bytes & 1 != 0 {
            let [byte] = read_bytes(stream)?;
            value |= (byte as usize) << (byte_index * 8);
        }
        *present_bytes >>= 1;
    }
    Ok(value)
}

/// Apply a delta stream to `base_info`, returning the reconstructed target
/// bytes. The stream format matches Git's delta encoding:
/// - leading base size, then result size (varint)
/// - sequence of ops: data instructions (msb=0, lower 7 bits = literal
///   length) or copy instructions (msb=1, following bytes encode offset/size).
pub fn delta_decode(stream: &mut impl Read, base_info: &[u8]) -> Result<Vec<u8>, GitError> {
    let base_size = read_size_encoding(stream)?;
    if base_info.len() != base_size {
        return Err(GitError::DeltaObjectError(format!(
            "base length {} does not match declared {base_size}",
            base_info.len()
        )));
    }

    let result_size = read_size_encoding(stream)?;
    let mut buffer = Vec::with_capacity(result_size);
    loop {
        // Stream end means the target object is complete.
        let instruction = match read_bytes(stream) {
            Ok([instruction]) => instruction,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(GitError::DeltaObjectError(format!(
                    "truncated delta instruction: {err}"
                )));
            }
        };

        if instruction & COPY_INSTRUCTION_FLAG == 0 {
            // Data instruction; the instruction byte is the literal length.
            // Appending 0 bytes doesn't make sense, so git disallows it.
            if instruction == 0 {
                return Err(GitError::DeltaObjectError(
                    "invalid zero-length data instruction".to_string(),
                ));
            }
            let mut data = vec![0; instruction as usize];
            stream.read_exact(&mut data)?;
            buffer.extend_from_slice(&data);
        } else {
            // Copy instruction.
            let mut nonzero_bytes = instruction;
            let offset = read_partial_int(stream, COPY_OFFSET_BYTES, &mut nonzero_bytes)?;
            let mut size = read_partial_int(stream, COPY_SIZE_BYTES, &mut nonzero_bytes)?;
            if size == 0 {
                // Copying 0 bytes doesn't make sense, so git assumes a different size.
                size = COPY_ZERO_SIZE;
            }
            let base_data = base_info.get(offset..(offset + size)).ok_or_else(|| {
                GitError::DeltaObjectError("copy instruction outside base object".to_string())
            })?;
            buffer.extend_from_slice(base_data);
        }
    }

    if buffer.len() != result_size {
        return Err(GitError::DeltaObjectError(format!(
            "reconstructed {} bytes, declared {result_size}",
            buffer.len()
        )));
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{delta_decode, read_partial_int, read_size_encoding, read_var_int_byte};
    use crate::errors::GitError;

    /// Varint byte: lower 7 bits value, msb indicates continuation.
    #[test]
    fn var_int_byte() {
        let mut cursor = Cursor::new(vec![0b1000_0001, 0b0000_0010]);
        let (v1, more1) = read_var_int_byte(&mut cursor).unwrap();
        let (v2, more2) = read_var_int_byte(&mut cursor).unwrap();
        assert_eq!(v1, 0b0000_0001);
        assert!(more1);
        assert_eq!(v2, 0b0000_0010);
        assert!(!more2);
    }

    /// Full varint assembly: two-byte encoding of 300.
    #[test]
    fn size_encoding() {
        let mut cursor = Cursor::new(vec![0b1010_1100, 0b0000_0010]);
        assert_eq!(read_size_encoding(&mut cursor).unwrap(), 300);
    }

    /// Partial int assembly based on presence bits (little-endian copy offsets).
    #[test]
    fn partial_int() {
        let mut present = 0b0000_1111;
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4]);
        let v = read_partial_int(&mut cursor, 4, &mut present).unwrap();
        assert_eq!(v, 0x0403_0201);
    }

    /// A hand-built delta of copy + literal reconstructs the target.
    #[test]
    fn decode_copy_and_literal() {
        let base = b"hello world";
        // base size 11, result size 10, copy(offset 0, size 6), literal "rust"
        let delta = vec![
            11, 10, // sizes (single-byte varints)
            0b1001_0001, 0, 6, // copy: offset byte 0 present (=0), size byte 0 present (=6)
            4, b'r', b'u', b's', b't', // literal of 4 bytes
        ];
        let mut cursor = Cursor::new(delta);
        let decoded = delta_decode(&mut cursor, base).expect("decode");
        assert_eq!(decoded, b"hello rust");
    }

    /// Mismatched base length should return a decoder error.
    #[test]
    fn base_size_mismatch_returns_error() {
        let delta = vec![11, 10, 4, b'r', b'u', b's', b't'];
        let mut cursor = Cursor::new(delta);
        let err = delta_decode(&mut cursor, b"xx").unwrap_err();
        assert!(matches!(err, GitError::DeltaObjectError(_)));
    }

    /// A declared result size that the instructions do not produce is an error.
    #[test]
    fn result_size_mismatch_returns_error() {
        let delta = vec![2, 9, 2, b'a', b'b'];
        let mut cursor = Cursor::new(delta);
        let err = delta_decode(&mut cursor, b"xy").unwrap_err();
        assert!(matches!(err, GitError::DeltaObjectError(_)));
    }
}
