//! frpc tunnel client.
//!
//! Wraps the `frpc` executable behind the [`TunnelConnector`] and
//! [`TunnelSession`] seams, and talks to its local admin web server for
//! live proxy status and configuration reloads.

mod admin;
mod error;
mod process;
mod session;
mod types;

pub use admin::AdminClient;
pub use error::FrpcError;
pub use process::{render_config, FrpcConnector, FrpcSession};
pub use session::{TunnelConnector, TunnelSession};
pub use types::*;
