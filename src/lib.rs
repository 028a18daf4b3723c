use {
    anyhow::{Context, Error, ensure},
    async_trait::async_trait,
    banlist::{BanList, BanStatus},
    bitcoin::{
        BlockHash,
        hashes::{Hash, sha256d},
    },
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    config::{BanningConfig, CoinbaseConfig, Config, RewardKind},
    events::{PeerEvent, PoolEvent, SessionEvent, SessionNotice, Share},
    futures::{SinkExt, StreamExt},
    hex::FromHex,
    merkle::MerkleNode,
    primitive_types::U256,
    rand::RngCore,
    rpc_data::RpcData,
    serde::{
        Deserialize, Serialize,
        de::{self, Deserializer},
        ser::{SerializeSeq, Serializer},
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    session::{Host, Session, SessionCommand},
    snafu::Snafu,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        fmt::{self, Formatter},
        io,
        net::{IpAddr, SocketAddr},
        str::FromStr,
        sync::{
            Arc, LazyLock, Mutex, OnceLock,
            atomic::{self, AtomicU32},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, Difficulty, Extranonce, Id, InternalError, JobId, Message, Nbits, Nonce, Notify,
        Ntime, PrevHash, SetDifficulty, StratumError, StratumErrorResponse, Submit, Subscribe,
        SubscribeResult, Version,
    },
    template::BlockTemplate,
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinSet,
        time::{interval, sleep},
    },
    tokio_util::{
        bytes::{Buf, BytesMut},
        codec::{Decoder, Encoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
};

pub mod banlist;
pub mod coinbase;
pub mod config;
pub mod events;
pub mod jobs;
pub mod merkle;
pub mod peer;
pub mod rpc_data;
pub mod server;
pub mod session;
pub mod stratum;
pub mod template;
pub mod util;

pub const EXTRANONCE1_SIZE: usize = 4;
pub const EXTRANONCE2_SIZE: usize = 4;
/// A session buffering more than this without a newline is flooding.
pub const MAX_REQUEST_SIZE: usize = 10 * 1024;
pub const SUBSCRIPTION_ID_PREFIX: &str = "deadbeefcafebabe";
pub const USER_AGENT: &str = "/lode:0.1.0/";

/// Reference target for difficulty 1 on sha256d chains.
pub static DIFF1_TARGET: LazyLock<U256> = LazyLock::new(|| {
    U256::from_big_endian(
        &<[u8; 32]>::from_hex("00000000ffff0000000000000000000000000000000000000000000000000000")
            .expect("valid hex"),
    )
});

pub type Result<T = (), E = Error> = std::result::Result<T, E>;
