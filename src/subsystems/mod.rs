//! Subsystem modules for the Lateral chat core.

pub mod agents;
pub mod comms;
pub mod memory;
pub mod routing;
pub mod runtime;
pub mod search;
