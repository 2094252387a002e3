//! ComfyUI client library for the face-swap service.
//!
//! Provides typed message parsing, WebSocket subscriptions, HTTP API
//! wrappers, reconnection policy, and the three job stages built on them:
//! [`submit::JobSubmitter`], [`monitor::ProgressMonitor`] and
//! [`fetch::ResultFetcher`].

pub mod api;
pub mod client;
pub mod fetch;
pub mod messages;
pub mod monitor;
pub mod reconnect;
pub mod submit;
