//! Tracing initialization
//!
//! `RUST_LOG` overrides the default filter; `LOG_FORMAT` picks text or JSON lines.

mod init_basic;

pub use init_basic::{default_filter, init_telemetry, shutdown_telemetry};
