//! Event hub session for hookd.
//!
//! The hub speaks JSON-RPC 2.0 over TCP, one length-prefixed frame per
//! message.
//!
//! - [`protocol`]: message types and hub method names
//! - [`transport`]: the frame codec
//! - [`config`]: connection settings read from the environment
//! - [`session`]: [`HubSession`], the [`Connection`](hookd_core::Connection)
//!   the server drives

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{DEFAULT_REQUEST_TIMEOUT, HubConfig};
pub use error::{HubError, Result};
pub use protocol::{Message, Notification, Request, RequestId, Response, RpcError};
pub use session::HubSession;
pub use transport::{CodecError, JsonRpcCodec};
