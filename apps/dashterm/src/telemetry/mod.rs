//! Process-wide diagnostics setup.

pub mod logging;
