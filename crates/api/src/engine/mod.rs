//! Job execution engine.
//!
//! Runs each accepted job on its own task (monitor, then result fetch),
//! keeps the status ledger current, and tracks running jobs for
//! cancellation and shutdown.

pub mod registry;
pub mod runner;
pub mod stream;

pub use registry::JobRegistry;
pub use runner::JobEngine;
pub use stream::JobEventStream;
