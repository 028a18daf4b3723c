use super::*;

/// prevhash in the protocol is insane: the hex the template source reports is
/// sent with its 32-bit words in reverse order.
#[derive(Debug, PartialEq, Eq, Clone, Copy, DeserializeFromStr, SerializeDisplay)]
pub struct PrevHash([u8; 32]);

impl PrevHash {
    /// Parses the hash as the template source reports it (display hex).
    pub fn from_rpc_hex(s: &str) -> Result<Self, InternalError> {
        let bytes =
            <[u8; 32]>::from_hex(s).map_err(|source| InternalError::HexParse { source })?;
        Ok(Self(bytes))
    }

    /// The hash bytes in the order the template source reported them.
    pub fn rpc_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The wire form broadcast in mining.notify.
    pub fn reversed(&self) -> [u8; 32] {
        util::reverse_byte_order(self.0)
    }
}

impl FromStr for PrevHash {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wire =
            <[u8; 32]>::from_hex(s).map_err(|source| InternalError::HexParse { source })?;
        Ok(Self(util::reverse_byte_order(wire)))
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.reversed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_swaps_words() {
        let prev_hash = PrevHash::from_rpc_hex(
            "00000000440b921e1b77c6c0487ae5616de67f788f44ae2a5af6e2194d16b6f8",
        )
        .unwrap();

        assert_eq!(
            prev_hash.to_string(),
            "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000"
        );
    }

    #[test]
    fn parse_wire_roundtrip() {
        let wire = "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000";
        let prev_hash = wire.parse::<PrevHash>().unwrap();

        assert_eq!(prev_hash.to_string(), wire);
        assert_eq!(
            hex::encode(prev_hash.rpc_bytes()),
            "00000000440b921e1b77c6c0487ae5616de67f788f44ae2a5af6e2194d16b6f8"
        );
    }

    #[test]
    fn serde_uses_wire_form() {
        let prev_hash = PrevHash::from_rpc_hex(&"00".repeat(32)).unwrap();
        let json = serde_json::to_string(&prev_hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "00".repeat(32)));
        assert_eq!(serde_json::from_str::<PrevHash>(&json).unwrap(), prev_hash);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(PrevHash::from_rpc_hex("short").is_err());
        assert!("zz".repeat(32).parse::<PrevHash>().is_err());
    }
}
