//! Raw WebSocket transport for face-swap jobs.

pub mod handler;

pub use handler::face_swap_ws;
