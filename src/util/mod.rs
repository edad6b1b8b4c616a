//! Shared helpers

pub mod compress;
pub mod rate_limit;
pub mod time;
