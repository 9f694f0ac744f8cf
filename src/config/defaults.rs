//! Compiled-in default values for every tunable parameter.
//!
//! The `Default` impls in `engine_config.rs` reference these constants so the
//! engine behaves identically with and without a config file.

// ---------------------------------------------------------------------------
// Windows and cadence
// ---------------------------------------------------------------------------

/// Sliding telemetry window length (samples).
pub const FEATURE_WINDOW_SIZE: usize = 30;
/// Messages accumulated between pipeline runs.
pub const MQTT_BATCH_SIZE: usize = 5;
/// Feature vectors averaged before inference.
pub const SMOOTHING_WINDOW_SIZE: usize = 3;
/// Smoothed risks averaged into the reported probability.
pub const RISK_HISTORY_SIZE: usize = 3;
/// Pipeline runs treated as startup (stricter CRITICAL threshold).
pub const STARTUP_ITERATIONS: usize = 3;

// ---------------------------------------------------------------------------
// Risk thresholds and smoothing
// ---------------------------------------------------------------------------

pub const PROB_CRITICAL: f64 = 0.85;
pub const PROB_CRITICAL_STARTUP: f64 = 0.90;
pub const PROB_WARNING: f64 = 0.60;
pub const PROB_HYSTERESIS_EXIT_WARNING: f64 = 0.25;
pub const PROB_MIN_FOR_VIBRATION_WARNING: f64 = 0.15;

pub const SMOOTH_ALPHA_RISING: f64 = 0.70;
pub const SMOOTH_ALPHA_FALLING: f64 = 0.65;
pub const SMOOTH_ALPHA_VERY_HIGH: f64 = 0.92;
pub const SMOOTH_HIGH_RISK_THRESHOLD: f64 = 0.70;

/// Smoothed probabilities at or above the knee are remapped onto
/// [`DISPLAY_MAP_FLOOR`, 1.0] so true saturation reads as 95–100% risk.
pub const DISPLAY_MAP_KNEE: f64 = 0.65;
pub const DISPLAY_MAP_FLOOR: f64 = 0.85;

// ---------------------------------------------------------------------------
// ISO 10816-3 vibration zones (mm/s RMS) and hysteresis
// ---------------------------------------------------------------------------

pub const VIBRATION_WARNING_ENTRY_MMPS: f64 = 5.5;
pub const VIBRATION_CRITICAL_MMPS: f64 = 7.1;
pub const VIBRATION_INTERLOCK_MMPS: f64 = 9.0;
pub const VIBRATION_HYSTERESIS_EXIT_WARNING_MMPS: f64 = 4.5;
pub const VIBRATION_HYSTERESIS_EXIT_CRITICAL_MMPS: f64 = 6.0;
pub const CRITICAL_EXIT_MIN_LOW_VIB_STEPS: u32 = 5;

// ---------------------------------------------------------------------------
// Failure-mode signatures
// ---------------------------------------------------------------------------

pub const DEBRIS_IMPACT_CREST_MIN: f64 = 6.0;

pub const CAVITATION_CURRENT_MIN_AMP: f64 = 54.0;
pub const CAVITATION_PRESSURE_MAX_BAR: f64 = 4.0;
pub const CAVITATION_VIBRATION_MIN_MMPS: f64 = 9.0;
pub const CAVITATION_HYSTERESIS_EXIT_PRESSURE_BAR: f64 = 4.5;

pub const CHOKED_CURRENT_MAX_AMP: f64 = 38.0;
pub const CHOKED_PRESSURE_MIN_BAR: f64 = 7.0;
pub const CHOKED_TEMP_MIN_C: f64 = 70.0;

pub const DEGRADATION_CURRENT_MAX_AMP: f64 = 40.0;
pub const DEGRADATION_PRESSURE_MAX_BAR: f64 = 5.2;
pub const DEGRADATION_HYSTERESIS_CURRENT_AMP: f64 = 2.0;
pub const DEGRADATION_HYSTERESIS_PRESSURE_BAR: f64 = 0.3;

pub const TEMP_WARNING_C: f64 = 60.0;
pub const TEMP_CRITICAL_C: f64 = 75.0;

pub const OVERLOAD_CURRENT_MIN_AMP: f64 = 50.0;
pub const PRESSURE_HIGH_WARNING_BAR: f64 = 7.0;

pub const AIR_INGESTION_VIB_CREST_MIN: f64 = 5.5;
pub const AIR_INGESTION_VIB_RMS_MIN_MMPS: f64 = 4.5;

// ---------------------------------------------------------------------------
// Healthy-nominal recovery band
//
// The asymmetry against the WARNING thresholds (current must exceed 40 A
// strictly) is intentional and must be preserved.
// ---------------------------------------------------------------------------

pub const RECOVERY_VIB_MAX_MMPS: f64 = 4.5;
pub const RECOVERY_PRESSURE_MIN_BAR: f64 = 5.2;
pub const RECOVERY_PRESSURE_MAX_BAR: f64 = 7.0;
pub const RECOVERY_TEMP_MIN_C: f64 = 35.0;
pub const RECOVERY_TEMP_MAX_C: f64 = 60.0;
pub const RECOVERY_CURRENT_MIN_AMP: f64 = 40.0;
pub const RECOVERY_CURRENT_MAX_AMP: f64 = 50.0;

// ---------------------------------------------------------------------------
// Signal processing
// ---------------------------------------------------------------------------

pub const SAMPLE_RATE_HZ: f64 = 1000.0;
pub const BUTTER_ORDER: usize = 3;
/// Low-pass cutoff as a fraction of Nyquist.
pub const BUTTER_CUTOFF: f64 = 0.1;
pub const ISO_BAND_LOW_HZ: f64 = 10.0;
pub const ISO_BAND_HIGH_HZ: f64 = 1000.0;
/// Minimum signal length accepted by the ISO band filter.
pub const ISO_BAND_MIN_SAMPLES: usize = 8;

// ---------------------------------------------------------------------------
// Telemetry plausibility ranges
// ---------------------------------------------------------------------------

pub const TELEMETRY_VIB_RMS_MIN: f64 = 0.0;
pub const TELEMETRY_VIB_RMS_MAX: f64 = 25.0;
pub const TELEMETRY_PRESSURE_MIN: f64 = 0.0;
pub const TELEMETRY_PRESSURE_MAX: f64 = 15.0;
pub const TELEMETRY_TEMP_MIN: f64 = -20.0;
pub const TELEMETRY_TEMP_MAX: f64 = 120.0;
pub const TELEMETRY_CURRENT_MIN: f64 = 0.0;
pub const TELEMETRY_CURRENT_MAX: f64 = 80.0;
pub const TELEMETRY_CAVITATION_INDEX_MIN: f64 = 0.0;
pub const TELEMETRY_CAVITATION_INDEX_MAX: f64 = 50.0;

/// Cap applied to the computed cavitation index feature.
pub const CAVITATION_INDEX_CAP: f64 = 50.0;

// ---------------------------------------------------------------------------
// Retries, queues, timeouts
// ---------------------------------------------------------------------------

/// Inference retries inside the pipeline.
pub const INFERENCE_RETRY_ATTEMPTS: u32 = 3;
/// Base delay for exponential inference/CSV retry backoff.
pub const RETRY_BASE_DELAY_MS: u64 = 500;
/// Bounded durable-write queue capacity.
pub const CSV_QUEUE_CAPACITY: usize = 1000;
/// Durable-write attempts before a row is dropped.
pub const CSV_WRITE_RETRIES: u32 = 3;
/// Notification HTTP timeout.
pub const NOTIFY_TIMEOUT_SECS: u64 = 5;

/// Reconnect backoff bounds for the broker client.
pub const RECONNECT_MIN_SECS: u64 = 1;
pub const RECONNECT_MAX_SECS: u64 = 60;
/// Silence window before the single "no telemetry" notification.
pub const MQTT_DISCONNECT_ALERT_SEC: u64 = 90;

// ---------------------------------------------------------------------------
// Status log rotation
// ---------------------------------------------------------------------------

pub const LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_BACKUP_COUNT: usize = 3;
