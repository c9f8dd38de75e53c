//! System-wide default constants.
//!
//! Centralises the numbers the correction stages, provisioning and replay
//! fall back to when the config file does not override them.

// ============================================================================
// Correction
// ============================================================================

/// Accepted values kept per (device, metric) stream.
pub const WINDOW_CAPACITY: usize = 5;

/// A streak strictly greater than this declares the sensor broken/frozen.
pub const STREAK_LIMIT: u32 = 5;

/// Out-of-band value forwarded for broken or frozen sensors.
pub const SENTINEL_VALUE: f64 = -0.001;

/// Weight of the raw reading in the smoothing stage.
///
/// `smoothed = 0.7 * raw + 0.3 * mean(history)`
pub const SMOOTHING_WEIGHT: f64 = 0.7;

// ============================================================================
// Geography
// ============================================================================

/// Latitude of grid cell (0, 0).
pub const ORIGIN_LAT: f64 = 46.194814;

/// Longitude of grid cell (0, 0).
pub const ORIGIN_LON: f64 = 1.190861;

/// Kilometres per degree of latitude.
pub const KM_PER_DEG_LAT: f64 = 111.11;

// ============================================================================
// Delivery
// ============================================================================

/// Timeout for measurement and state pushes (seconds).
pub const DELIVERY_TIMEOUT_SECS: u64 = 1;

/// Timeout for device provisioning calls (seconds).
pub const PROVISIONING_TIMEOUT_SECS: u64 = 10;

/// Default IoT-agent measure endpoint.
pub const IOT_AGENT_URL: &str = "http://localhost:7896/iot/json";

/// Default IoT-agent admin (provisioning) endpoint.
pub const IOT_ADMIN_URL: &str = "http://localhost:4041/iot/devices";

/// Default Orion entities endpoint.
pub const ORION_URL: &str = "http://localhost:1026/v2/entities";

/// Endpoint the IoT agent advertises for provisioned devices.
pub const AGENT_ENDPOINT: &str = "http://iot-agent:7896/iot/json";

// ============================================================================
// Runner
// ============================================================================

/// Per-device worker channel depth (cycles).
pub const WORKER_CHANNEL_CAPACITY: usize = 64;

/// Delay between replayed batches (ms).
pub const REPLAY_CYCLE_DELAY_MS: u64 = 1_500;
