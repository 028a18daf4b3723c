use super::*;

/// Everything the pool core is configured with. The loader that produces it
/// (file, CLI, environment) lives with the host.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ports: BTreeMap<u16, PortConfig>,
    #[serde(default)]
    pub banning: BanningConfig,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default)]
    pub tcp_proxy_protocol: bool,
    #[serde(default = "default_job_rebroadcast_timeout")]
    pub job_rebroadcast_timeout: u64,
    #[serde(default)]
    pub peer: Option<PeerConfig>,
    pub coin: CoinConfig,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    pub coinbase: CoinbaseConfig,
}

impl Config {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn job_rebroadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.job_rebroadcast_timeout)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortConfig {
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds a ban lasts.
    #[serde(default = "default_ban_time")]
    pub time: u64,
    /// Seconds between sweeps of the ban table.
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,
    /// Shares counted before the invalid ratio is evaluated.
    #[serde(default = "default_check_threshold")]
    pub check_threshold: u64,
    /// Percentage of invalid shares at or above which the session is banned.
    #[serde(default = "default_invalid_percent")]
    pub invalid_percent: f64,
}

impl BanningConfig {
    pub fn time(&self) -> Duration {
        Duration::from_secs(self.time)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval)
    }
}

impl Default for BanningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time: default_ban_time(),
            purge_interval: default_purge_interval(),
            check_threshold: default_check_threshold(),
            invalid_percent: default_invalid_percent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub disable_transactions: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinConfig {
    /// Network magic as 8 hex characters, e.g. "f9beb4d9" for mainnet.
    pub peer_magic: String,
    #[serde(default)]
    pub reward: RewardKind,
}

impl CoinConfig {
    pub fn magic(&self) -> Result<[u8; 4]> {
        <[u8; 4]>::from_hex(&self.peer_magic)
            .with_context(|| format!("invalid peer magic '{}'", self.peer_magic))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum RewardKind {
    #[default]
    #[serde(rename = "POW")]
    Pow,
    #[serde(rename = "POS")]
    Pos,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseConfig {
    /// Script pubkey the block reward pays to, hex encoded.
    pub pool_script: String,
    #[serde(default = "default_signature")]
    pub signature: String,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
    #[serde(default = "default_tx_version")]
    pub tx_version: i32,
}

impl CoinbaseConfig {
    pub fn pool_script(&self) -> Result<Vec<u8>> {
        hex::decode(&self.pool_script).context("invalid pool script hex")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientConfig {
    /// Script pubkey of the fee output, hex encoded.
    pub script: String,
    /// Percentage of the block reward this output takes.
    pub percent: f64,
}

fn default_connection_timeout() -> u64 {
    600
}

fn default_job_rebroadcast_timeout() -> u64 {
    55
}

fn default_protocol_version() -> u32 {
    70001
}

fn default_ban_time() -> u64 {
    600
}

fn default_purge_interval() -> u64 {
    300
}

fn default_check_threshold() -> u64 {
    500
}

fn default_invalid_percent() -> f64 {
    50.0
}

fn default_signature() -> String {
    "/lode/".into()
}

fn default_tx_version() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn minimal() -> Config {
        serde_json::from_value(json!({
            "ports": {"3333": {"difficulty": 8}},
            "coin": {"peer_magic": "f9beb4d9"},
            "coinbase": {"pool_script": "76a914000000000000000000000000000000000000000088ac"},
        }))
        .unwrap()
    }

    #[test]
    fn defaults_are_sane() {
        let config = minimal();

        assert_eq!(config.connection_timeout(), Duration::from_secs(600));
        assert_eq!(config.job_rebroadcast_timeout(), Duration::from_secs(55));
        assert_eq!(config.protocol_version, 70001);
        assert!(!config.tcp_proxy_protocol);
        assert!(!config.banning.enabled);
        assert_eq!(config.banning.time(), Duration::from_secs(600));
        assert_eq!(config.banning.purge_interval(), Duration::from_secs(300));
        assert_eq!(config.banning.check_threshold, 500);
        assert_eq!(config.banning.invalid_percent, 50.0);
        assert_eq!(config.coin.reward, RewardKind::Pow);
        assert_eq!(config.coinbase.signature, "/lode/");
        assert_eq!(config.coinbase.tx_version, 1);
        assert!(config.peer.is_none());
    }

    #[test]
    fn port_difficulty() {
        let config = minimal();
        assert_eq!(config.ports[&3333].difficulty, Difficulty::new(8.0));
    }

    #[test]
    fn magic_decodes() {
        let config = minimal();
        assert_eq!(config.coin.magic().unwrap(), [0xf9, 0xbe, 0xb4, 0xd9]);
    }

    #[test]
    fn magic_rejects_bad_hex() {
        let mut config = minimal();
        config.coin.peer_magic = "xyz".into();
        assert!(config.coin.magic().is_err());
    }

    #[test]
    fn reward_kind_parses_uppercase() {
        let config: Config = serde_json::from_value(json!({
            "ports": {"3333": {"difficulty": 1}},
            "coin": {"peer_magic": "f9beb4d9", "reward": "POS"},
            "coinbase": {"pool_script": "51"},
        }))
        .unwrap();

        assert_eq!(config.coin.reward, RewardKind::Pos);
    }

    #[test]
    fn pool_script_decodes() {
        assert_eq!(minimal().coinbase.pool_script().unwrap().len(), 25);
    }
}
