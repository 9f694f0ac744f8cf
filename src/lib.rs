//! Pumpguard: predictive maintenance for centrifugal slurry pumps.
//!
//! Consumes a continuous telemetry stream (vibration, motor current,
//! discharge pressure, bearing temperature), extracts features over a
//! sliding window, runs a forest classifier with asymmetric risk smoothing,
//! and refines the verdict through an ordered rule engine into
//! HEALTHY / WARNING / CRITICAL statuses with structured trip causes.
//!
//! ## Architecture
//!
//! - **Validator**: range checks; one bad sample rejects the whole window
//! - **DSP**: zero-phase Butterworth conditioning and the ISO 10816-3 band
//! - **Predictor**: scaler + forest artifacts, risk smoothing, base status
//! - **Rule engine**: fixed-order evaluators producing reasons & trip causes
//! - **Ingest loop**: broker subscription, window cadence, report publishing
//! - **Digital twin**: scenario simulator driving the same pipeline in-process

pub mod config;
pub mod dsp;
pub mod features;
pub mod logging;
pub mod notifier;
pub mod pipeline;
pub mod predictor;
pub mod rules;
pub mod storage;
pub mod transport;
pub mod twin;
pub mod types;
pub mod validator;

// Re-export the engine configuration
pub use config::EngineConfig;

// Re-export commonly used types
pub use types::{
    AlarmCause, AlertPayload, FeatureVector, PumpStatus, StatusReport, TelemetrySample,
    TripCause, FEATURE_NAMES, NUM_FEATURES,
};

// Re-export the pipeline building blocks
pub use pipeline::{BatchProcessor, EngineLoop, PipelineRunner};
pub use predictor::{ModelArtifacts, PredictOptions, Predictor, Verdict};
pub use validator::ValidationError;
