//! IQ tuning parameters.
//!
//! One section per algorithm. The algorithms read these on every process
//! call; the core only ever writes `aec.exposure_target` (through the
//! registry) and clears `awb.reconfigure` once it has been honoured.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Compile-time embedded tuning for the IMX335 reference module.
const IQ_IMX335: &str = include_str!("../../../contrib/iq/imx335.toml");

#[derive(Error, Debug)]
pub enum IqError {
    #[error("failed to read IQ file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid IQ TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IqParams {
    pub bad_pixel: BadPixelParams,
    pub black_level: BlackLevelParams,
    pub aec: AecParams,
    pub awb: AwbParams,
    #[serde(default)]
    pub simple_awb: SimpleAwbParams,
    #[serde(default)]
    pub simple_aec: SimpleAecParams,
    #[serde(default)]
    pub awb_cct: CctAwbParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadPixelParams {
    pub enable: bool,
    /// Averaged defect count the controller steers towards.
    pub threshold: u32,
    /// Correction strength applied when the loop starts.
    pub strength: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackLevelParams {
    pub enable: bool,
    /// Sensor analog gains (mdB) at which `level` was calibrated.
    pub reference_gain: Vec<u32>,
    /// R, G, B correction for each reference gain.
    pub level: Vec<[u8; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AecParams {
    pub enable: bool,
    /// Target average luminance (0-255).
    pub exposure_target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwbParams {
    pub enable: bool,
    /// Request a profile rebuild on the next process call.
    #[serde(default)]
    pub reconfigure: bool,
    /// Ascending by `reference_temp`; the list ends at the first slot whose
    /// reference temperature is zero.
    pub profiles: Vec<AwbProfileParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwbProfileParams {
    #[serde(default)]
    pub label: String,
    /// Kelvin.
    pub reference_temp: u32,
    /// ISP gains R, G, B.
    pub gains: [f32; 3],
    pub ccm: [[f32; 3]; 3],
    #[serde(default)]
    pub offset: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleAwbParams {
    pub enable: bool,
    pub gain_min: f32,
    pub gain_max: f32,
}

impl Default for SimpleAwbParams {
    fn default() -> Self {
        Self {
            enable: false,
            gain_min: 0.5,
            gain_max: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleAecParams {
    pub enable: bool,
    /// Luminance band around the target where nothing is changed.
    pub tolerance: u32,
}

impl Default for SimpleAecParams {
    fn default() -> Self {
        Self {
            enable: false,
            tolerance: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CctAwbParams {
    pub enable: bool,
    /// Quadratic correction `a*t^2 + b*t + c` applied to the McCamy estimate.
    pub correction: [f64; 3],
}

impl Default for CctAwbParams {
    fn default() -> Self {
        Self {
            enable: false,
            correction: [1.9e-5, 0.76, 763.0],
        }
    }
}

impl IqParams {
    pub fn from_toml_str(src: &str) -> Result<Self, IqError> {
        Ok(toml::from_str(src)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, IqError> {
        let src = std::fs::read_to_string(path).map_err(|source| IqError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Built-in tuning for a sensor, if one ships with the crate.
    pub fn builtin(sensor: &str) -> Option<Self> {
        let src = match sensor.to_ascii_lowercase().as_str() {
            "imx335" => IQ_IMX335,
            _ => return None,
        };
        match Self::from_toml_str(src) {
            Ok(iq) => Some(iq),
            Err(e) => {
                tracing::error!(sensor, error = %e, "bad built-in IQ TOML");
                None
            }
        }
    }
}

impl AwbParams {
    /// Configured profiles up to the first empty slot.
    pub fn active_profiles(&self) -> impl Iterator<Item = &AwbProfileParams> {
        self.profiles.iter().take_while(|p| p.reference_temp != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_imx335_parses() {
        let iq = IqParams::builtin("IMX335").unwrap();
        assert!(iq.aec.enable);
        assert_eq!(iq.black_level.reference_gain.len(), iq.black_level.level.len());
        assert_eq!(iq.awb.profiles.len(), 6);
        assert_eq!(iq.awb.active_profiles().count(), 5);
        assert!(!iq.awb.reconfigure);
    }

    #[test]
    fn test_unknown_sensor_has_no_builtin() {
        assert!(IqParams::builtin("ov5640").is_none());
    }

    #[test]
    fn test_optional_sections_default_disabled() {
        let src = r#"
            [bad_pixel]
            enable = false
            threshold = 10
            strength = 0

            [black_level]
            enable = false
            reference_gain = []
            level = []

            [aec]
            enable = true
            exposure_target = 100

            [awb]
            enable = false
            profiles = []
        "#;
        let iq = IqParams::from_toml_str(src).unwrap();
        assert!(!iq.simple_awb.enable);
        assert!(!iq.simple_aec.enable);
        assert!(!iq.awb_cct.enable);
        assert_eq!(iq.aec.exposure_target, 100);
    }

    #[test]
    fn test_active_profiles_stop_at_first_empty_slot() {
        let mut iq = IqParams::builtin("imx335").unwrap();
        iq.awb.profiles[2].reference_temp = 0;
        let temps: Vec<u32> = iq.awb.active_profiles().map(|p| p.reference_temp).collect();
        assert_eq!(temps, vec![2856, 4000]);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(matches!(
            IqParams::from_toml_str("[aec]\nenable = 3"),
            Err(IqError::Parse(_))
        ));
    }
}
