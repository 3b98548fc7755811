// Library root. The binary entry point is src/main.rs; integration tests use
// the public modules below.

pub mod app;
pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod subsystems;
