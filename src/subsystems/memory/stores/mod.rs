//! Memory and transcript store implementations.

pub mod json_file;
pub mod tmp;
pub mod transcript;
