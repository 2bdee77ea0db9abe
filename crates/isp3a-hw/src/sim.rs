//! In-memory ISP + sensor implementing [`IspPort`].
//!
//! Registers are plain fields. Statistics are synthesised from the register
//! state at the vsync where a request matures, so the configured delay
//! behaves like real pipeline latency. Used by the CLI engine and tests.

use crate::port::{BlackLevel, ColorConversion, HwError, IspGain, IspPort, Pipe, SensorInfo};
use crate::sensors::SensorEntry;
use crate::stats::{PendingStatistics, StatLocation, StatQueue, StatRequest, Statistics};

/// Mired value of D65, where the simulated sensor is neutral.
const NEUTRAL_MIRED: f32 = 1.0e6 / 6500.0;
/// Log channel ratio change per mired away from neutral.
const CHROMA_PER_MIRED: f32 = 0.003;

/// What the simulated sensor is looking at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    /// Illuminant correlated color temperature in Kelvin.
    pub cct: f32,
    /// 8-bit signal produced per millisecond of exposure at 0 dB.
    pub brightness: f32,
    /// Defective pixels visible at full correction strength.
    pub defects: u32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            cct: 5000.0,
            brightness: 4.0,
            defects: 120,
        }
    }
}

/// Fault injection switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Faults {
    pub fail_reads: bool,
    pub fail_writes: bool,
    /// Fail only sensor exposure writes, leaving every other block writable.
    pub fail_exposure_writes: bool,
    /// When false the sensor helpers behave as if no driver was wired.
    pub sensor_helpers: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_reads: false,
            fail_writes: false,
            fail_exposure_writes: false,
            sensor_helpers: true,
        }
    }
}

/// Number of successful writes per register block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteLog {
    pub sensor_gain: u32,
    pub sensor_exposure: u32,
    pub isp_gain: u32,
    pub color_conversion: u32,
    pub black_level: u32,
    pub bad_pixel: u32,
}

pub struct SimulatedIsp {
    pub sensor: SensorInfo,
    pub scene: Scene,
    pub faults: Faults,
    pub gamma_enabled: bool,

    pub sensor_gain: u32,
    pub sensor_exposure: u32,
    pub isp_gain: IspGain,
    pub color_conversion: ColorConversion,
    pub black_level: BlackLevel,
    pub bad_pixel_strength: u8,
    pub bad_pixel_enabled: bool,
    /// Overrides the modelled bad pixel count when set.
    pub bad_pixel_count_override: Option<u32>,

    pub writes: WriteLog,
    frame: u64,
    queue: StatQueue,
}

impl SimulatedIsp {
    pub fn new(sensor: SensorInfo) -> Self {
        Self {
            sensor_gain: sensor.gain_min,
            sensor_exposure: sensor.exposure_min,
            sensor,
            scene: Scene::default(),
            faults: Faults::default(),
            gamma_enabled: true,
            isp_gain: IspGain::UNITY,
            color_conversion: ColorConversion::IDENTITY,
            black_level: BlackLevel::default(),
            bad_pixel_strength: 0,
            bad_pixel_enabled: false,
            bad_pixel_count_override: None,
            writes: WriteLog::default(),
            frame: 0,
            queue: StatQueue::new(),
        }
    }

    pub fn from_entry(entry: &SensorEntry) -> Self {
        Self::new(entry.info())
    }

    /// Signal one vsync: matured statistics requests are sampled and
    /// delivered. Returns the number of deliveries.
    pub fn advance_frame(&mut self) -> usize {
        self.frame += 1;
        let snapshot = SensorSnapshot::capture(self);
        let delivered = self.queue.on_vsync(|req| snapshot.sample(req.location));
        if delivered > 0 {
            tracing::trace!(frame = self.frame, delivered, "statistics delivered");
        }
        delivered
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn outstanding_requests(&self) -> usize {
        self.queue.len()
    }

    /// Drop every outstanding statistics request, as a pipeline reset would.
    pub fn flush_statistics(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        tracing::debug!(frame = self.frame, dropped, "statistics requests flushed");
    }

    /// Statistics the hardware would report right now.
    pub fn sample(&self, location: StatLocation) -> Statistics {
        SensorSnapshot::capture(self).sample(location)
    }

    fn check_read(&self, what: &str) -> Result<(), HwError> {
        if self.faults.fail_reads {
            Err(HwError::ReadFailed(what.to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self, what: &str) -> Result<(), HwError> {
        if self.faults.fail_writes {
            Err(HwError::WriteFailed(what.to_string()))
        } else {
            Ok(())
        }
    }

    fn check_sensor(&self, helper: &'static str) -> Result<(), HwError> {
        if self.faults.sensor_helpers {
            Ok(())
        } else {
            Err(HwError::NotImplemented(helper))
        }
    }
}

/// Register values relevant to statistics, frozen at one vsync.
struct SensorSnapshot {
    signal: f32,
    chroma: f32,
    isp_gain: IspGain,
    gamma: bool,
}

impl SensorSnapshot {
    fn capture(isp: &SimulatedIsp) -> Self {
        let exposure_ms = isp.sensor_exposure as f32 / 1000.0;
        let gain = 10f32.powf(isp.sensor_gain as f32 / 20_000.0);
        let mired = 1.0e6 / isp.scene.cct.max(1.0);
        Self {
            signal: isp.scene.brightness * exposure_ms * gain,
            chroma: CHROMA_PER_MIRED * (mired - NEUTRAL_MIRED),
            isp_gain: isp.isp_gain,
            gamma: isp.gamma_enabled,
        }
    }

    fn sample(&self, location: StatLocation) -> Statistics {
        let mut r = self.signal * self.chroma.exp();
        let mut g = self.signal;
        let mut b = self.signal * (-self.chroma).exp();

        if location == StatLocation::Down {
            if self.isp_gain.enable {
                r *= self.isp_gain.r;
                g *= self.isp_gain.g;
                b *= self.isp_gain.b;
            }
            if self.gamma {
                (r, g, b) = (encode_gamma(r), encode_gamma(g), encode_gamma(b));
            }
        }

        let (r, g, b) = (to_u8(r), to_u8(g), to_u8(b));
        let l = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Statistics { r, g, b, l: to_u8(l) }
    }
}

fn encode_gamma(v: f32) -> f32 {
    255.0 * (v.clamp(0.0, 255.0) / 255.0).powf(1.0 / 2.2)
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

impl IspPort for SimulatedIsp {
    fn bad_pixel_count(&mut self) -> Result<u32, HwError> {
        self.check_read("bad pixel count")?;
        if let Some(count) = self.bad_pixel_count_override {
            return Ok(count);
        }
        // Stronger correction flags more pixels; analog gain adds noise hits.
        let detected = self.scene.defects * (u32::from(self.bad_pixel_strength) + 1) / 8;
        Ok(detected + self.sensor_gain / 4000)
    }

    fn set_bad_pixel_correction(&mut self, strength: u8, enable: bool) -> Result<(), HwError> {
        self.check_write("bad pixel correction")?;
        self.bad_pixel_strength = strength;
        self.bad_pixel_enabled = enable;
        self.writes.bad_pixel += 1;
        Ok(())
    }

    fn sensor_info(&mut self) -> Result<SensorInfo, HwError> {
        self.check_sensor("sensor_info")?;
        self.check_read("sensor info")?;
        Ok(self.sensor.clone())
    }

    fn sensor_gain(&mut self) -> Result<u32, HwError> {
        self.check_sensor("sensor_gain")?;
        self.check_read("sensor gain")?;
        Ok(self.sensor_gain)
    }

    fn set_sensor_gain(&mut self, gain: u32) -> Result<(), HwError> {
        self.check_sensor("set_sensor_gain")?;
        self.check_write("sensor gain")?;
        self.sensor_gain = gain.clamp(self.sensor.gain_min, self.sensor.gain_max);
        self.writes.sensor_gain += 1;
        Ok(())
    }

    fn sensor_exposure(&mut self) -> Result<u32, HwError> {
        self.check_sensor("sensor_exposure")?;
        self.check_read("sensor exposure")?;
        Ok(self.sensor_exposure)
    }

    fn set_sensor_exposure(&mut self, exposure: u32) -> Result<(), HwError> {
        self.check_sensor("set_sensor_exposure")?;
        self.check_write("sensor exposure")?;
        if self.faults.fail_exposure_writes {
            return Err(HwError::WriteFailed("sensor exposure".into()));
        }
        self.sensor_exposure = exposure.clamp(self.sensor.exposure_min, self.sensor.exposure_max);
        self.writes.sensor_exposure += 1;
        Ok(())
    }

    fn isp_gain(&mut self) -> Result<IspGain, HwError> {
        self.check_read("isp gain")?;
        Ok(self.isp_gain)
    }

    fn set_isp_gain(&mut self, gain: IspGain) -> Result<(), HwError> {
        self.check_write("isp gain")?;
        self.isp_gain = gain;
        self.writes.isp_gain += 1;
        Ok(())
    }

    fn color_conversion(&mut self) -> Result<ColorConversion, HwError> {
        self.check_read("color conversion")?;
        Ok(self.color_conversion)
    }

    fn set_color_conversion(&mut self, ccm: ColorConversion) -> Result<(), HwError> {
        self.check_write("color conversion")?;
        self.color_conversion = ccm;
        self.writes.color_conversion += 1;
        Ok(())
    }

    fn set_black_level(&mut self, level: BlackLevel) -> Result<(), HwError> {
        self.check_write("black level")?;
        self.black_level = level;
        self.writes.black_level += 1;
        Ok(())
    }

    fn request_statistics(&mut self, request: StatRequest) -> Result<PendingStatistics, HwError> {
        Ok(self.queue.push(request))
    }

    fn is_gamma_enabled(&self, pipe: Pipe) -> bool {
        pipe == Pipe::Main && self.gamma_enabled
    }
}
