//! White balance estimator: calibration profiles, decision thresholds and
//! the color-temperature tracking loop.
//!
//! The estimate is kept in mired (1e6 / Kelvin), where equal steps look
//! roughly equally large to the eye. Each measurement is the residual cast
//! left after the currently applied profile; it is turned into a scene
//! temperature and the estimate moves part of the way towards it.

use crate::iq::{AwbParams, AwbProfileParams};
use isp3a_hw::{ColorConversion, HwError, IspGain, IspPort};
use thiserror::Error;

/// D50/D65 decision point. The arithmetic midpoint (5750 K) sits too
/// close to daylight, so the pair is split lower.
pub const D50_D65_THRESHOLD: u32 = 5300;
const D50: u32 = 5000;
const D65: u32 = 6500;

const MIRED_MIN: f32 = 1.0e6 / 15_000.0;
const MIRED_MAX: f32 = 1.0e6 / 1_500.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WbError {
    #[error("no white balance profile configured")]
    NoProfiles,
    #[error("profiles not strictly ascending: {previous} K followed by {next} K")]
    Unordered { previous: u32, next: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwbProfile {
    pub label: String,
    pub reference_temp: u32,
    pub gains: [f32; 3],
    pub ccm: [[f32; 3]; 3],
    pub offset: [f32; 3],
}

impl From<&AwbProfileParams> for AwbProfile {
    fn from(p: &AwbProfileParams) -> Self {
        Self {
            label: p.label.clone(),
            reference_temp: p.reference_temp,
            gains: p.gains,
            ccm: p.ccm,
            offset: p.offset,
        }
    }
}

impl AwbProfile {
    /// Push this profile's color conversion and ISP gains.
    pub fn apply(&self, port: &mut dyn IspPort) -> Result<(), HwError> {
        port.set_color_conversion(ColorConversion {
            enable: true,
            coeff: self.ccm,
            offset: self.offset,
        })?;
        port.set_isp_gain(IspGain {
            enable: true,
            r: self.gains[0],
            g: self.gains[1],
            b: self.gains[2],
        })
    }
}

/// Profiles from the tuning, stopping at the first empty slot.
pub fn build_profiles(params: &AwbParams) -> Result<Vec<AwbProfile>, WbError> {
    let profiles: Vec<AwbProfile> = params.active_profiles().map(AwbProfile::from).collect();
    if profiles.is_empty() {
        return Err(WbError::NoProfiles);
    }
    for pair in profiles.windows(2) {
        if pair[1].reference_temp <= pair[0].reference_temp {
            return Err(WbError::Unordered {
                previous: pair[0].reference_temp,
                next: pair[1].reference_temp,
            });
        }
    }
    Ok(profiles)
}

/// Boundaries between neighbouring profiles, one fewer than profiles.
pub fn decision_thresholds(profiles: &[AwbProfile]) -> Vec<u32> {
    profiles
        .windows(2)
        .map(|pair| match (pair[0].reference_temp, pair[1].reference_temp) {
            (D50, D65) => D50_D65_THRESHOLD,
            (lo, hi) => lo + (hi - lo) / 2,
        })
        .collect()
}

/// Profile whose decision band contains `temp`. A temperature sitting on a
/// threshold belongs to the warmer-side neighbour's upper band.
pub fn profile_index(temp: f32, thresholds: &[u32]) -> usize {
    thresholds.partition_point(|&t| t as f32 <= temp)
}

#[inline]
fn mired(kelvin: f32) -> f32 {
    1.0e6 / kelvin.max(1.0)
}

#[derive(Debug, Clone)]
pub struct AwbHyperParams {
    /// Fraction of the measured error applied when the cast is small.
    pub speed_min: f32,
    /// Fraction applied when the cast reaches `cast_full_speed`.
    pub speed_max: f32,
    pub cast_full_speed: f32,
    /// |ln(b/r)| treated as neutral.
    pub tolerance: f32,
    /// Consecutive neutral measurements before reporting convergence.
    pub convergence_frames: u32,
    /// Scene shift in mired per unit of ln(b/r).
    pub mired_per_cast: f32,
    /// Distance past a threshold needed to leave the current profile.
    pub hysteresis_mired: f32,
}

impl Default for AwbHyperParams {
    fn default() -> Self {
        Self {
            speed_min: 0.2,
            speed_max: 0.8,
            cast_full_speed: 0.5,
            tolerance: 0.02,
            convergence_frames: 3,
            mired_per_cast: 160.0,
            hysteresis_mired: 4.0,
        }
    }
}

pub struct WbEstimator {
    profiles: Vec<AwbProfile>,
    thresholds: Vec<u32>,
    params: AwbHyperParams,
    mired: f32,
    index: usize,
    neutral_frames: u32,
}

impl WbEstimator {
    /// Starts from the middle profile.
    pub fn new(profiles: Vec<AwbProfile>, params: AwbHyperParams) -> Result<Self, WbError> {
        if profiles.is_empty() {
            return Err(WbError::NoProfiles);
        }
        let thresholds = decision_thresholds(&profiles);
        let index = profiles.len() / 2;
        Ok(Self {
            mired: mired(profiles[index].reference_temp as f32),
            profiles,
            thresholds,
            params,
            index,
            neutral_frames: 0,
        })
    }

    pub fn profiles(&self) -> &[AwbProfile] {
        &self.profiles
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    /// Reference temperature of the selected profile.
    pub fn output(&self) -> u32 {
        self.profiles[self.index].reference_temp
    }

    pub fn estimate_kelvin(&self) -> f32 {
        1.0e6 / self.mired
    }

    pub fn is_converged(&self) -> bool {
        self.neutral_frames >= self.params.convergence_frames
    }

    pub fn profile_for(&self, temp: u32) -> Option<(usize, &AwbProfile)> {
        self.profiles
            .iter()
            .enumerate()
            .find(|(_, p)| p.reference_temp == temp)
    }

    /// Feed one linear RGB measurement taken under the profile currently
    /// reported by [`output`](Self::output). Returns the new output.
    pub fn converge(&mut self, rgb: [f32; 3]) -> u32 {
        let [r, _, b] = rgb;
        if r < 1.0 || b < 1.0 {
            // Too dark to carry any color information.
            return self.output();
        }

        let cast = (b / r).ln();
        if cast.abs() <= self.params.tolerance {
            self.neutral_frames = self.neutral_frames.saturating_add(1);
            return self.output();
        }
        self.neutral_frames = 0;

        // A blue residual means the scene is cooler than the applied profile.
        let applied = mired(self.output() as f32);
        let scene = applied - self.params.mired_per_cast * cast;

        let p = &self.params;
        let far = (cast.abs() / p.cast_full_speed).min(1.0);
        let speed = p.speed_min + (p.speed_max - p.speed_min) * far;
        self.mired = (self.mired + speed * (scene - self.mired)).clamp(MIRED_MIN, MIRED_MAX);

        self.index = self.select();
        self.output()
    }

    fn select(&self) -> usize {
        let candidate = profile_index(1.0e6 / self.mired, &self.thresholds);
        let boundary = match candidate.cmp(&self.index) {
            std::cmp::Ordering::Equal => return candidate,
            std::cmp::Ordering::Greater => self.thresholds[self.index],
            std::cmp::Ordering::Less => self.thresholds[self.index - 1],
        };
        if (self.mired - mired(boundary as f32)).abs() > self.params.hysteresis_mired {
            candidate
        } else {
            self.index
        }
    }
}
