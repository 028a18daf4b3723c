use super::*;

/// The template the external source hands in, in the shape getblocktemplate
/// reports it. Hashes and raw transactions stay hex-encoded here; decoding is
/// the template engine's job.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct RpcData {
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    pub bits: String,
    #[serde(rename = "curtime")]
    pub current_time: u32,
    pub version: i32,
    #[serde(default)]
    pub height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: u64,
    #[serde(default)]
    pub coinbaseaux: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
    #[serde(default)]
    pub masternode_payments: bool,
    #[serde(default)]
    pub votes: Vec<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct RpcTransaction {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl RpcTransaction {
    /// The identifying hash: `txid` where the source distinguishes it from
    /// the witness hash, else `hash`.
    pub fn hash_hex(&self) -> Result<&str> {
        self.txid
            .as_deref()
            .or(self.hash.as_deref())
            .context("transaction carries neither txid nor hash")
    }
}
