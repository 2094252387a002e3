pub mod download;
pub mod face_swap;
pub mod jobs;
pub mod status;
