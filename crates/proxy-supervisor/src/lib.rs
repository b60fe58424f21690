//! Proxy Supervisor - lifecycle management for frpc tunnel proxies.
//!
//! Keeps a durable set of named TCP forwards, keeps one frpc session to a
//! tunnel server carrying the enabled ones, and folds live status from
//! frpc's admin plane back into the stored definitions. A local JSON API
//! drives it all.

pub mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod supervisor;

pub use config::Config;
pub use error::SupervisorError;
pub use registry::{ProxyDefinition, ProxyDraft, ProxyRegistry, Store};
pub use supervisor::{ConnectOutcome, Phase, ServerTarget, Supervisor, SupervisorSettings};
