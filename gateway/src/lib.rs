#![allow(
    clippy::let_unit_value,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::semicolon_if_nothing_returned
)]
#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    future_incompatible,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![doc = include_str!("../README.md")]

mod codec;
mod compression;
pub mod config;
pub mod dispatch;
mod etf;
mod heartbeat;
mod json;
mod ledger;
mod latency;
mod model;
pub mod pool;
mod routing;
pub mod shard;
#[cfg(feature = "voice")]
mod voice;

pub use self::{
    codec::{CodecError, CodecErrorType, PayloadEncoding},
    compression::{CompressionError, CompressionErrorType, TransportCompression},
    config::{Config, ConfigBuilder},
    dispatch::{DispatchRouter, EventTypeFlags, OverflowPolicy, RoutedEnvelope, Subscription},
    latency::Latency,
    model::{classify_close_code, CloseCodeClass, Intents, Opcode, PayloadEnvelope},
    pool::{HandoffStrategy, PoolConfig, PoolStats, ShardPool},
    routing::shard_id_for_guild,
    shard::{
        ConnectError, ConnectErrorType, FatalCloseError, GatewaySession, Phase, ProcessError,
        ProcessErrorType, SessionInfo, ShardConfig, ShardConfigBuilder, ShardSendError,
        ShardSendErrorType,
    },
};
#[cfg(feature = "voice")]
pub use self::voice::{CipherMode, RtpFrame, VoiceCipher, VoiceCipherError, VoiceCipherErrorType};

#[doc(no_inline)]
pub use stormgate_gateway_queue as queue;

/// Discord API version used by this crate.
pub const API_VERSION: u8 = 10;

#[cfg(not(any(feature = "native", feature = "rustls-native-roots", feature = "rustls-webpki-roots")))]
compile_error!(
    "Either the `native`, `rustls-native-roots` or `rustls-webpki-roots` feature must be enabled."
);
