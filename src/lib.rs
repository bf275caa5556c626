#![doc(html_root_url = "https://docs.rs/thriftwire/latest")]
//! Public API for the `thriftwire` library.
//!
//! This crate provides the connection-manager core of a Thrift proxy: a
//! per-connection state machine that decodes a downstream request stream,
//! drives each request through a configurable decoder filter chain,
//! decodes the matching upstream responses, and writes re-framed replies
//! back to the client with their original sequence ids.
//!
//! The manager itself is synchronous and event-driven; [`server`]
//! supplies a tokio adapter for hosts that want one.

pub mod config;
pub mod conn_manager;
pub mod decoder;
pub mod downstream;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod protocol;
pub mod reply;
pub mod router;
pub mod server;
pub mod stats;
pub mod transport;

pub use config::{Config, ProxyConfig, ProxyConfigBuilder};
pub use conn_manager::ConnectionManager;
pub use decoder::{DecodeStatus, Decoder, DecoderCallbacks, DecoderEvent, FilterStatus};
pub use downstream::{CloseMode, ConnectionEvent, DownstreamConnection};
pub use error::{AppException, AppExceptionType, DecodeError, ProtocolError, TransportError};
pub use filter::{DecoderFilter, DecoderFilterCallbacks, FilterChainFactory};
pub use metadata::{FieldType, MessageMetadata, MessageType};
pub use protocol::{BinaryProtocol, Protocol, ProtocolType, UpgradeHandler};
pub use reply::DirectResponse;
pub use router::{Route, Router};
pub use stats::{Counter, ProxyStats};
pub use transport::{FramedTransport, Transport, TransportType, UnframedTransport};
