//! Comms subsystem: external I/O channels.
//!
//! Each channel implements [`crate::subsystems::runtime::Component`] and is
//! spawned by [`crate::app::App::components`] beside the memory sweeper.

#[cfg(feature = "channel-axum")]
pub mod axum_channel;
