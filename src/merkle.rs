use super::*;

/// A node of the coinbase authentication path. Stratum sends these as the
/// plain hex of the internal hash bytes, with none of the reversals applied
/// to txids elsewhere in the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct MerkleNode(sha256d::Hash);

impl MerkleNode {
    pub fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(sha256d::Hash::from_byte_array(bytes))
    }

    pub fn as_byte_array(&self) -> &[u8; 32] {
        self.0.as_byte_array()
    }

    pub fn to_raw_hash(self) -> sha256d::Hash {
        self.0
    }
}

impl From<sha256d::Hash> for MerkleNode {
    fn from(hash: sha256d::Hash) -> Self {
        Self(hash)
    }
}

impl FromStr for MerkleNode {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            <[u8; 32]>::from_hex(s).map_err(|source| InternalError::HexParse { source })?;
        Ok(Self(sha256d::Hash::from_byte_array(bytes)))
    }
}

impl fmt::Display for MerkleNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_byte_array()))
    }
}

fn join(left: sha256d::Hash, right: sha256d::Hash) -> sha256d::Hash {
    let mut concat = Vec::with_capacity(64);
    concat.extend_from_slice(left.as_byte_array());
    concat.extend_from_slice(right.as_byte_array());
    sha256d::Hash::hash(&concat)
}

/// Computes the authentication path for the coinbase slot: the ordered
/// sibling hashes a miner folds the coinbase hash through to reach the root.
///
/// Index 0 of every level is reserved for the not-yet-known coinbase, so the
/// sibling at index 1 is recorded and the levels are paired upward with the
/// last element duplicated when a level is odd.
pub fn steps(non_coinbase_hashes: Vec<sha256d::Hash>) -> Vec<MerkleNode> {
    if non_coinbase_hashes.is_empty() {
        return Vec::new();
    }

    let mut level = vec![sha256d::Hash::all_zeros()];
    level.extend(non_coinbase_hashes);

    let mut steps = Vec::new();

    while level.len() > 1 {
        steps.push(MerkleNode(level[1]));

        let mut next_level = Vec::with_capacity(level.len() / 2 + 1);
        let mut i = 0;
        while i < level.len() {
            let left = level[i];
            let right = if i + 1 < level.len() {
                level[i + 1]
            } else {
                left
            };
            next_level.push(join(left, right));
            i += 2;
        }

        level = next_level;
    }

    steps
}

/// Folds a coinbase hash through the authentication path, yielding the
/// merkle root the block header commits to.
pub fn fold(coinbase_hash: sha256d::Hash, steps: &[MerkleNode]) -> sha256d::Hash {
    steps
        .iter()
        .fold(coinbase_hash, |root, step| join(root, step.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> sha256d::Hash {
        sha256d::Hash::from_byte_array([n; 32])
    }

    #[test]
    fn no_transactions_no_steps() {
        assert!(steps(Vec::new()).is_empty());
    }

    #[test]
    fn single_transaction_is_its_own_step() {
        assert_eq!(steps(vec![hash(1)]), vec![MerkleNode(hash(1))]);
    }

    #[test]
    fn three_transactions() {
        let branches = steps(vec![hash(1), hash(2), hash(3)]);

        assert_eq!(
            branches,
            vec![MerkleNode(hash(1)), MerkleNode(join(hash(2), hash(3)))],
        );
    }

    #[test]
    fn two_transactions_duplicate_odd_level() {
        // level: [null, t1, t2] -> [H(null||t1), H(t2||t2)]
        let branches = steps(vec![hash(1), hash(2)]);

        assert_eq!(
            branches,
            vec![MerkleNode(hash(1)), MerkleNode(join(hash(2), hash(2)))],
        );
    }

    #[test]
    fn step_count_is_tree_depth() {
        for (transactions, expected) in [(0usize, 0usize), (1, 1), (2, 2), (3, 2), (4, 3), (7, 3)] {
            let hashes = (0..transactions).map(|i| hash(i as u8)).collect::<Vec<_>>();
            assert_eq!(
                steps(hashes).len(),
                expected,
                "wrong depth for {transactions} transactions"
            );
        }
    }

    #[test]
    fn fold_reproduces_pairwise_root() {
        // Leaves [cb, t1, t2, t3]: root = H(H(cb||t1) || H(t2||t3))
        let coinbase = hash(9);
        let branches = steps(vec![hash(1), hash(2), hash(3)]);

        let expected = join(join(coinbase, hash(1)), join(hash(2), hash(3)));

        assert_eq!(fold(coinbase, &branches), expected);
    }

    #[test]
    fn fold_with_no_steps_is_identity() {
        assert_eq!(fold(hash(4), &[]), hash(4));
    }

    #[test]
    fn node_hex_roundtrip() {
        let node = MerkleNode(hash(0xab));
        let encoded = node.to_string();
        assert_eq!(encoded, "ab".repeat(32));
        assert_eq!(encoded.parse::<MerkleNode>().unwrap(), node);

        assert!("zz".repeat(32).parse::<MerkleNode>().is_err());
        assert!("ab".parse::<MerkleNode>().is_err());
    }
}
