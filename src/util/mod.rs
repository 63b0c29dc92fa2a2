//! Utility modules: backoff, timeout.

pub mod backoff;
pub mod timeout;
