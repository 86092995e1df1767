//! The relay engine: channel selection, quota reservation, upstream dispatch,
//! streaming, retry/fallback, and settlement.
//!
//! This crate owns the request lifecycle between "validated client request"
//! and "bytes on the wire back to the client". Provider wire formats live in
//! `modelgate-adapter`; HTTP routing lives in `modelgate-router`.

pub mod adapter;
pub mod auth;
pub mod channel;
pub mod error;
pub mod estimate;
pub mod events;
pub mod guard;
pub mod headers;
pub mod ledger;
pub mod price;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod relay_info;
pub mod retry;
pub mod select;
pub mod tunnel;
pub mod upstream;

pub use adapter::{
    Adapter, AdapterDispatch, TaskInfo, UpstreamBody, UpstreamPayload, UpstreamRequest,
    UpstreamResponse,
};
pub use auth::{AuthContext, AuthError, AuthSnapshot, TokenAuth};
pub use channel::{Channel, ChannelSettings};
pub use error::{ErrorKind, ErrorOptions, RelayError};
pub use events::ErrorLogSink;
pub use ledger::{QuotaLedger, Reservation};
pub use price::PriceData;
pub use registry::ChannelRegistry;
pub use relay::{RelayBody, RelayEngine, RelayRequest, RelayResponse};
pub use relay_info::{RelayFormat, RelayInfo};
pub use upstream::{UpstreamClient, UpstreamClientConfig, UpstreamFailure, WreqUpstreamClient};
