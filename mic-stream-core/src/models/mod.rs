pub mod audio_models;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod session_summary;
pub mod state;
