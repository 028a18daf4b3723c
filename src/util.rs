use super::*;

pub fn pack_u32_le(n: u32) -> [u8; 4] {
    n.to_le_bytes()
}

pub fn pack_u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

pub fn pack_i32_be(n: i32) -> [u8; 4] {
    n.to_be_bytes()
}

pub fn pack_i64_le(n: i64) -> [u8; 8] {
    n.to_le_bytes()
}

pub fn pack_u64_le(n: u64) -> [u8; 8] {
    n.to_le_bytes()
}

/// Bitcoin CompactSize encoding.
pub fn var_int(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut buf = vec![0xfd];
        buf.extend_from_slice(&(n as u16).to_le_bytes());
        buf
    } else if n <= 0xffff_ffff {
        let mut buf = vec![0xfe];
        buf.extend_from_slice(&(n as u32).to_le_bytes());
        buf
    } else {
        let mut buf = vec![0xff];
        buf.extend_from_slice(&n.to_le_bytes());
        buf
    }
}

/// Reads a CompactSize, returning the value and the number of bytes consumed.
pub fn read_var_int(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    match first {
        0xfd => {
            let bytes = buf.get(1..3)?;
            Some((u64::from(LittleEndian::read_u16(bytes)), 3))
        }
        0xfe => {
            let bytes = buf.get(1..5)?;
            Some((u64::from(LittleEndian::read_u32(bytes)), 5))
        }
        0xff => {
            let bytes = buf.get(1..9)?;
            Some((LittleEndian::read_u64(bytes), 9))
        }
        n => Some((u64::from(n), 1)),
    }
}

pub fn var_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut buf = var_int(bytes.len() as u64);
    buf.extend_from_slice(bytes);
    buf
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

pub fn reverse_buffer(buf: &[u8]) -> Vec<u8> {
    buf.iter().rev().copied().collect()
}

/// The Stratum prevhash quirk: swap every 32-bit word to the opposite
/// endianness, then reverse the whole buffer.
pub fn reverse_byte_order(buf: [u8; 32]) -> [u8; 32] {
    let mut swapped = [0u8; 32];
    for (src, dst) in buf.chunks_exact(4).zip(swapped.chunks_exact_mut(4)) {
        let word = BigEndian::read_u32(src);
        LittleEndian::write_u32(dst, word);
    }
    swapped.reverse();
    swapped
}

/// Decodes a txid-style hex string into the internal byte order used for
/// hashing (display hex is the full reversal of the internal bytes).
pub fn uint256_from_hash(hex_str: &str) -> Result<[u8; 32], InternalError> {
    let mut bytes =
        <[u8; 32]>::from_hex(hex_str).map_err(|source| InternalError::HexParse { source })?;
    bytes.reverse();
    Ok(bytes)
}

/// Expands the 4-byte compact target: `mantissa * 256^(exponent - 3)`.
pub fn target_from_compact_bits(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = U256::from(bits & 0x00ff_ffff);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    }
}

pub fn target_from_bits_hex(bits: &str) -> Result<U256, InternalError> {
    let bytes = <[u8; 4]>::from_hex(bits).map_err(|source| InternalError::HexParse { source })?;
    Ok(target_from_compact_bits(BigEndian::read_u32(&bytes)))
}

pub fn u256_to_f64(n: U256) -> f64 {
    n.0.iter()
        .enumerate()
        .map(|(i, limb)| *limb as f64 * 2f64.powi(64 * i as i32))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_fixed_width() {
        assert_eq!(pack_u32_le(1), [1, 0, 0, 0]);
        assert_eq!(pack_u32_be(1), [0, 0, 0, 1]);
        assert_eq!(pack_i32_be(-1), [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(pack_i64_le(258), [2, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(pack_u64_le(1), [1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[track_caller]
    fn case_var_int(n: u64, expected_hex: &str) {
        assert_eq!(hex::encode(var_int(n)), expected_hex);

        let encoded = var_int(n);
        let (value, consumed) = read_var_int(&encoded).unwrap();
        assert_eq!(value, n, "read back");
        assert_eq!(consumed, encoded.len(), "consumed length");
    }

    #[test]
    fn var_int_boundaries() {
        case_var_int(0, "00");
        case_var_int(0xfc, "fc");
        case_var_int(0xfd, "fdfd00");
        case_var_int(0xffff, "fdffff");
        case_var_int(0x10000, "fe00000100");
        case_var_int(0xffff_ffff, "feffffffff");
        case_var_int(0x1_0000_0000, "ff0000000001000000");
    }

    #[test]
    fn read_var_int_rejects_truncation() {
        assert!(read_var_int(&[]).is_none());
        assert!(read_var_int(&[0xfd, 0x01]).is_none());
        assert!(read_var_int(&[0xfe, 0x01, 0x02, 0x03]).is_none());
        assert!(read_var_int(&[0xff, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn var_string_prefixes_length() {
        assert_eq!(hex::encode(var_string("")), "00");
        assert_eq!(hex::encode(var_string("/lode/")), "062f6c6f64652f");
    }

    #[test]
    fn sha256d_empty_input() {
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn reverse_buffer_reverses() {
        assert_eq!(reverse_buffer(&[1, 2, 3]), vec![3, 2, 1]);
    }

    #[test]
    fn reverse_byte_order_swaps_word_order() {
        // The prevhash from the protocol's reference mining.notify capture.
        let rpc = <[u8; 32]>::from_hex(
            "00000000440b921e1b77c6c0487ae5616de67f788f44ae2a5af6e2194d16b6f8",
        )
        .unwrap();

        let wire = reverse_byte_order(rpc);

        assert_eq!(
            hex::encode(wire),
            "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000"
        );

        // The transform is its own inverse.
        assert_eq!(reverse_byte_order(wire), rpc);
    }

    #[test]
    fn uint256_from_hash_reverses_fully() {
        let bytes = uint256_from_hash(
            "00000000440b921e1b77c6c0487ae5616de67f788f44ae2a5af6e2194d16b6f8",
        )
        .unwrap();

        assert_eq!(bytes[0], 0xf8);
        assert_eq!(bytes[31], 0x00);
        assert!(uint256_from_hash("zz").is_err());
        assert!(uint256_from_hash("aabb").is_err());
    }

    #[test]
    fn compact_bits_difficulty_1() {
        assert_eq!(target_from_compact_bits(0x1d00ffff), *DIFF1_TARGET);
        assert_eq!(target_from_bits_hex("1d00ffff").unwrap(), *DIFF1_TARGET);
    }

    #[test]
    fn compact_bits_small_exponent() {
        // exponent 1 shifts the mantissa right by two bytes
        assert_eq!(target_from_compact_bits(0x01_00ffff), U256::from(0xff));
        assert_eq!(target_from_compact_bits(0x03_00ffff), U256::from(0xffff));
    }

    #[test]
    fn u256_to_f64_limbs() {
        assert_eq!(u256_to_f64(U256::zero()), 0.0);
        assert_eq!(u256_to_f64(U256::from(12345)), 12345.0);
        assert_eq!(u256_to_f64(U256::from(1u128 << 64)), 2f64.powi(64));
    }
}
