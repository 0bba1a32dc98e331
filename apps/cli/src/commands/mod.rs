//! CLI command implementations.

pub mod check;
pub mod console;
pub mod session;
