use super::*;

mod authorize;
mod difficulty;
mod error;
mod extranonce;
mod job_id;
mod message;
mod nbits;
mod nonce;
mod notify;
mod ntime;
mod prev_hash;
mod set_difficulty;
mod submit;
mod subscribe;
mod version;

pub use {
    authorize::Authorize,
    difficulty::Difficulty,
    error::{InternalError, StratumError, StratumErrorResponse},
    extranonce::Extranonce,
    job_id::JobId,
    message::{Id, Message},
    nbits::Nbits,
    nonce::Nonce,
    notify::Notify,
    ntime::Ntime,
    prev_hash::PrevHash,
    set_difficulty::SetDifficulty,
    submit::Submit,
    subscribe::{Subscribe, SubscribeResult},
    version::Version,
};
