//! Sensor database.
//!
//! Maps sensor names to their exposure and gain ranges. Sensor files are
//! embedded at compile time from `contrib/sensors/*.toml`.

use crate::port::SensorInfo;
use serde::Deserialize;
use std::sync::OnceLock;

const SENSOR_IMX335: &str = include_str!("../../../contrib/sensors/imx335.toml");
const SENSOR_VD66GY: &str = include_str!("../../../contrib/sensors/vd66gy.toml");

static SENSOR_DB: OnceLock<Vec<SensorFile>> = OnceLock::new();

/// Top-level sensor file structure (one per `contrib/sensors/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct SensorFile {
    pub sensor: SensorEntry,
}

/// Fields of the `[sensor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorEntry {
    pub name: String,
    /// Microseconds.
    pub exposure_min: u32,
    pub exposure_max: u32,
    /// Milli-decibel.
    pub gain_min: u32,
    pub gain_max: u32,
    /// Frames between a sensor write and the first statistics showing it.
    pub vsync_latency: u32,
}

impl SensorEntry {
    pub fn info(&self) -> SensorInfo {
        SensorInfo {
            name: self.name.clone(),
            exposure_min: self.exposure_min,
            exposure_max: self.exposure_max,
            gain_min: self.gain_min,
            gain_max: self.gain_max,
            vsync_latency: self.vsync_latency,
        }
    }
}

fn sensor_db() -> &'static Vec<SensorFile> {
    SENSOR_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [SENSOR_IMX335, SENSOR_VD66GY] {
            match toml::from_str::<SensorFile>(src) {
                Ok(s) => db.push(s),
                Err(e) => tracing::error!(error = %e, "bad sensor TOML"),
            }
        }
        db
    })
}

/// Look up a sensor by name (case-insensitive).
pub fn lookup_sensor(name: &str) -> Option<&'static SensorEntry> {
    sensor_db()
        .iter()
        .map(|f| &f.sensor)
        .find(|s| s.name.eq_ignore_ascii_case(name))
}

/// List all known sensors.
pub fn list_sensors() -> impl Iterator<Item = &'static SensorEntry> {
    sensor_db().iter().map(|f| &f.sensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_sensors_parse() {
        assert_eq!(list_sensors().count(), 2);
        for s in list_sensors() {
            assert!(s.exposure_min < s.exposure_max, "{}", s.name);
            assert!(s.gain_min <= s.gain_max, "{}", s.name);
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let s = lookup_sensor("imx335").unwrap();
        assert_eq!(s.name, "IMX335");
        assert_eq!(s.info().gain_max, 72000);
        assert!(lookup_sensor("nope").is_none());
    }

    #[test]
    fn test_info_carries_vsync_latency() {
        assert_eq!(lookup_sensor("imx335").unwrap().info().vsync_latency, 3);
        assert_eq!(lookup_sensor("VD66GY").unwrap().info().vsync_latency, 2);
    }
}
