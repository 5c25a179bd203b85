//! Metric names for azlogin.
//!
//! Recording goes through the `metrics` crate facade, so every call is a no-op
//! until the embedding application installs a recorder.
//!
//! ```rust,ignore
//! use azlogin_metrics::{auth, counter};
//!
//! counter!(auth::LOGIN_ATTEMPTS_TOTAL).increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::counter;
