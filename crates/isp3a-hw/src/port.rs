//! The hardware port consumed by the 3A core.
//!
//! Drivers for the sensor and the ISP blocks live outside this workspace;
//! the core only ever talks to them through [`IspPort`].

use crate::stats::{PendingStatistics, StatRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    #[error("hardware helper not wired: {0}")]
    NotImplemented(&'static str),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("statistics request rejected: {0}")]
    StatRequestRejected(String),
}

/// Static sensor limits reported by the sensor driver.
///
/// Exposure is in microseconds, gain in milli-decibel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    pub exposure_min: u32,
    pub exposure_max: u32,
    pub gain_min: u32,
    pub gain_max: u32,
    /// Frames between a sensor write and the first statistics showing it.
    pub vsync_latency: u32,
}

/// Per-channel digital gain applied by the ISP (linear multipliers).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IspGain {
    pub enable: bool,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl IspGain {
    pub const UNITY: IspGain = IspGain {
        enable: false,
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
}

impl Default for IspGain {
    fn default() -> Self {
        Self::UNITY
    }
}

/// 3x3 color conversion matrix with per-channel offsets (8-bit units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorConversion {
    pub enable: bool,
    pub coeff: [[f32; 3]; 3],
    pub offset: [f32; 3],
}

impl ColorConversion {
    pub const IDENTITY: ColorConversion = ColorConversion {
        enable: false,
        coeff: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        offset: [0.0; 3],
    };
}

impl Default for ColorConversion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Black level subtracted per channel before demosaicing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackLevel {
    pub enable: bool,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// ISP output pipe, for queries that differ per pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipe {
    Main,
    Ancillary,
}

/// Hardware services used by the 3A algorithms.
///
/// The sensor helpers have default bodies returning
/// [`HwError::NotImplemented`]: a port that leaves them out can still run
/// the ISP-only algorithms, but the registry refuses to initialise.
pub trait IspPort {
    fn bad_pixel_count(&mut self) -> Result<u32, HwError>;
    fn set_bad_pixel_correction(&mut self, strength: u8, enable: bool) -> Result<(), HwError>;

    fn sensor_info(&mut self) -> Result<SensorInfo, HwError> {
        Err(HwError::NotImplemented("sensor_info"))
    }
    fn sensor_gain(&mut self) -> Result<u32, HwError> {
        Err(HwError::NotImplemented("sensor_gain"))
    }
    fn set_sensor_gain(&mut self, _gain: u32) -> Result<(), HwError> {
        Err(HwError::NotImplemented("set_sensor_gain"))
    }
    fn sensor_exposure(&mut self) -> Result<u32, HwError> {
        Err(HwError::NotImplemented("sensor_exposure"))
    }
    fn set_sensor_exposure(&mut self, _exposure: u32) -> Result<(), HwError> {
        Err(HwError::NotImplemented("set_sensor_exposure"))
    }

    fn isp_gain(&mut self) -> Result<IspGain, HwError>;
    fn set_isp_gain(&mut self, gain: IspGain) -> Result<(), HwError>;
    fn color_conversion(&mut self) -> Result<ColorConversion, HwError>;
    fn set_color_conversion(&mut self, ccm: ColorConversion) -> Result<(), HwError>;
    fn set_black_level(&mut self, level: BlackLevel) -> Result<(), HwError>;

    /// Ask for the next statistics snapshot. Never blocks: the returned
    /// handle is fulfilled once the requested vsync delay has elapsed.
    fn request_statistics(&mut self, request: StatRequest) -> Result<PendingStatistics, HwError>;

    fn is_gamma_enabled(&self, pipe: Pipe) -> bool;
}
