use super::*;

/// One mining job: everything needed to broadcast work for a template and to
/// reconstitute a full block from a winning submission.
#[derive(Debug)]
pub struct BlockTemplate {
    pub job_id: JobId,
    pub height: u64,
    pub target: U256,
    pub difficulty: Difficulty,
    prev_hash: PrevHash,
    version: Version,
    nbits: Nbits,
    curtime: Ntime,
    transaction_count: usize,
    transaction_data: Vec<u8>,
    merkle_branch: Vec<MerkleNode>,
    coinbase_prefix: Vec<u8>,
    coinbase_suffix: Vec<u8>,
    reward: RewardKind,
    vote_data: Vec<u8>,
    submits: Mutex<HashSet<String>>,
    job_params: OnceLock<Notify>,
}

impl BlockTemplate {
    pub fn new(
        job_id: JobId,
        rpc_data: &RpcData,
        coinbase_config: &CoinbaseConfig,
        reward: RewardKind,
        extranonce_size: usize,
    ) -> Result<Self> {
        let target = match &rpc_data.target {
            Some(target) => U256::from_big_endian(
                &<[u8; 32]>::from_hex(target).context("invalid template target hex")?,
            ),
            None => util::target_from_bits_hex(&rpc_data.bits)?,
        };
        ensure!(!target.is_zero(), "template target is zero");

        let mut transaction_data = Vec::new();
        let mut transaction_hashes = Vec::with_capacity(rpc_data.transactions.len());

        for transaction in &rpc_data.transactions {
            transaction_data
                .extend_from_slice(&hex::decode(&transaction.data).context("invalid raw transaction hex")?);
            transaction_hashes.push(sha256d::Hash::from_byte_array(util::uint256_from_hash(
                transaction.hash_hex()?,
            )?));
        }

        let flags = match rpc_data.coinbaseaux.get("flags") {
            Some(flags) => hex::decode(flags).context("invalid coinbaseaux flags hex")?,
            None => Vec::new(),
        };

        let witness_commitment = rpc_data
            .default_witness_commitment
            .as_ref()
            .map(|commitment| hex::decode(commitment).context("invalid witness commitment hex"))
            .transpose()?;

        let recipients = coinbase_config
            .recipients
            .iter()
            .map(|recipient| {
                Ok(coinbase::Recipient {
                    script: hex::decode(&recipient.script)
                        .context("invalid recipient script hex")?,
                    percent: recipient.percent,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (coinbase_prefix, coinbase_suffix) = coinbase::CoinbaseBuilder {
            height: rpc_data.height,
            value: rpc_data.coinbase_value,
            flags,
            pool_script: coinbase_config.pool_script()?,
            signature: coinbase_config.signature.clone(),
            recipients,
            witness_commitment,
            extranonce_size,
            tx_version: coinbase_config.tx_version,
        }
        .build()?;

        let vote_data = if rpc_data.masternode_payments {
            let mut votes = util::var_int(rpc_data.votes.len() as u64);
            for vote in &rpc_data.votes {
                votes.extend_from_slice(&hex::decode(vote).context("invalid vote hex")?);
            }
            votes
        } else {
            Vec::new()
        };

        Ok(Self {
            job_id,
            height: rpc_data.height,
            target,
            difficulty: Difficulty::from_target(target),
            prev_hash: PrevHash::from_rpc_hex(&rpc_data.previous_block_hash)?,
            version: Version::from(rpc_data.version),
            nbits: rpc_data.bits.parse()?,
            curtime: Ntime::from(rpc_data.current_time),
            transaction_count: rpc_data.transactions.len(),
            transaction_data,
            merkle_branch: merkle::steps(transaction_hashes),
            coinbase_prefix,
            coinbase_suffix,
            reward,
            vote_data,
            submits: Mutex::new(HashSet::new()),
            job_params: OnceLock::new(),
        })
    }

    pub fn serialize_coinbase(&self, extranonce1: &Extranonce, extranonce2: &Extranonce) -> Vec<u8> {
        let mut coinbase = Vec::with_capacity(
            self.coinbase_prefix.len()
                + extranonce1.len()
                + extranonce2.len()
                + self.coinbase_suffix.len(),
        );
        coinbase.extend_from_slice(&self.coinbase_prefix);
        coinbase.extend_from_slice(extranonce1.as_bytes());
        coinbase.extend_from_slice(extranonce2.as_bytes());
        coinbase.extend_from_slice(&self.coinbase_suffix);
        coinbase
    }

    /// Folds the coinbase hash through the merkle branch.
    pub fn merkle_root(&self, coinbase: &[u8]) -> sha256d::Hash {
        merkle::fold(sha256d::Hash::hash(coinbase), &self.merkle_branch)
    }

    /// Assembles the 80-byte header. The fields are laid down in reverse
    /// order and the buffer flipped whole, which is how the Stratum-supplied
    /// hex strings end up in their on-wire byte order.
    pub fn serialize_header(
        &self,
        merkle_root: &sha256d::Hash,
        ntime: Ntime,
        nonce: Nonce,
    ) -> [u8; 80] {
        let mut reversed_root = merkle_root.to_byte_array();
        reversed_root.reverse();

        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&util::pack_u32_be(nonce.into()));
        header[4..8].copy_from_slice(&util::pack_u32_be(self.nbits.to_consensus()));
        header[8..12].copy_from_slice(&util::pack_u32_be(ntime.into()));
        header[12..44].copy_from_slice(&reversed_root);
        header[44..76].copy_from_slice(self.prev_hash.rpc_bytes());
        header[76..80].copy_from_slice(&util::pack_i32_be(self.version.to_consensus()));
        header.reverse();
        header
    }

    pub fn serialize_block(&self, header: &[u8; 80], coinbase: &[u8]) -> Vec<u8> {
        let mut block = Vec::with_capacity(
            header.len() + 9 + coinbase.len() + self.transaction_data.len() + self.vote_data.len(),
        );
        block.extend_from_slice(header);
        block.extend_from_slice(&util::var_int(self.transaction_count as u64 + 1));
        block.extend_from_slice(coinbase);
        block.extend_from_slice(&self.transaction_data);
        block.extend_from_slice(&self.vote_data);
        if self.reward == RewardKind::Pos {
            block.push(0);
        }
        block
    }

    /// Records a submission fingerprint. Returns false when the exact tuple
    /// was seen before on this job.
    pub fn register_submit(
        &self,
        extranonce1: &Extranonce,
        extranonce2: &Extranonce,
        ntime: Ntime,
        nonce: Nonce,
    ) -> bool {
        let fingerprint = format!("{extranonce1}{extranonce2}{ntime}{nonce}");
        self.submits
            .lock()
            .expect("submit set poisoned")
            .insert(fingerprint)
    }

    pub fn job_params(&self) -> &Notify {
        self.job_params.get_or_init(|| Notify {
            job_id: self.job_id,
            prevhash: self.prev_hash,
            coinb1: hex::encode(&self.coinbase_prefix),
            coinb2: hex::encode(&self.coinbase_suffix),
            merkle_branches: self.merkle_branch.clone(),
            version: self.version,
            nbits: self.nbits,
            ntime: self.curtime,
            clean_jobs: true,
        })
    }

    pub fn merkle_branch(&self) -> &[MerkleNode] {
        &self.merkle_branch
    }

    pub fn curtime(&self) -> Ntime {
        self.curtime
    }
}
