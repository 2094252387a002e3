//! Domain types and pure logic for the face-swap orchestration service.
//!
//! Nothing in this crate talks to the network. It holds the job status
//! model and the in-memory [`ledger::StatusLedger`], the normalized
//! [`events::JobEvent`] contract shared by the monitor and the transport
//! adapters, workflow template patching, and lookup of produced artifacts
//! in ComfyUI history documents.

pub mod error;
pub mod events;
pub mod ledger;
pub mod naming;
pub mod outputs;
pub mod status;
pub mod types;
pub mod workflow;
