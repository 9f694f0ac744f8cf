//! External transports. The in-process channel transport lives with the
//! pipeline sources; the broker client is feature-gated.

#[cfg(feature = "mqtt")]
pub mod mqtt;
