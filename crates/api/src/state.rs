use std::sync::Arc;

use faceswap_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use faceswap_comfyui::client::StreamConnector;
use faceswap_core::ledger::StatusLedger;

use crate::config::ServerConfig;
use crate::engine::JobEngine;
use crate::inputs::RemoteInputs;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// In-memory job status, shared with the engine.
    pub ledger: Arc<StatusLedger>,
    /// ComfyUI HTTP client (health probe).
    pub api: Arc<ComfyUIApi>,
    pub engine: JobEngine,
    pub inputs: RemoteInputs,
}

impl AppState {
    /// Wire the ComfyUI clients, ledger and engine from configuration.
    ///
    /// `connector` opens the ComfyUI event streams.
    pub fn new(
        config: ServerConfig,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Self, ComfyUIApiError> {
        let api = Arc::new(ComfyUIApi::new(&config.endpoint())?);
        let ledger = Arc::new(StatusLedger::new());
        let engine = JobEngine::from_config(&config, Arc::clone(&api), connector, Arc::clone(&ledger));
        let inputs = RemoteInputs::new(config.remote_input_timeout());

        Ok(Self {
            config: Arc::new(config),
            ledger,
            api,
            engine,
            inputs,
        })
    }
}
