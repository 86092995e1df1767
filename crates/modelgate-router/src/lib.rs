//! HTTP surface: one route per client dialect, token auth in front, the
//! relay engine behind.

mod proxy;

pub use proxy::{RouterState, relay_router};
