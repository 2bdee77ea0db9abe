use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sensor name looked up in the embedded database (default: imx335).
    pub sensor: String,
    /// IQ tuning file. The built-in tuning for `sensor` is used when unset.
    pub iq_file: Option<PathBuf>,
    /// Keep the simple AWB/AEC variants scheduled but inert.
    pub bypass_simple: bool,
    /// Scene brightness in 8-bit counts per millisecond of exposure at 0 dB.
    pub scene_lux: f32,
    /// Scene illuminant temperature in Kelvin.
    pub scene_cct: f32,
    /// Pause between two simulated frames.
    pub frame_interval_ms: u64,
}

impl Config {
    /// Load configuration from `ISP3A_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            sensor: std::env::var("ISP3A_SENSOR").unwrap_or_else(|_| "imx335".to_string()),
            iq_file: std::env::var("ISP3A_IQ_FILE").ok().map(PathBuf::from),
            bypass_simple: std::env::var("ISP3A_BYPASS_SIMPLE")
                .map(|v| v != "0")
                .unwrap_or(true),
            scene_lux: env_f32("ISP3A_SCENE_LUX", 4.0),
            scene_cct: env_f32("ISP3A_SCENE_CCT", 5000.0),
            frame_interval_ms: env_u64("ISP3A_FRAME_INTERVAL_MS", 0),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
