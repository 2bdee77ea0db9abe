//! Exposure/gain estimator driven by lookup tables.
//!
//! Exposure and gain are never computed freely: the estimator moves an
//! index into each table and the outputs are the table entries at those
//! indices. Brightening spends exposure first and gain once exposure is
//! exhausted; darkening gives gain back first.

use isp3a_hw::SensorInfo;
use thiserror::Error;

pub const EXPOSURE_TABLE_SIZE: usize = 2048;
pub const GAIN_TABLE_SIZE: usize = 241;

/// Gain-index excursion allowed per step: 10% of the table, about 6 dB
/// on a 60 dB sensor.
pub const GAIN_INDEX_GUARD: usize = GAIN_TABLE_SIZE / 10;
const EXPOSURE_INDEX_GUARD: usize = EXPOSURE_TABLE_SIZE / 4;

const HISTORY_LEN: usize = 4;
const FACTOR_MIN: f32 = 0.125;
const FACTOR_MAX: f32 = 8.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("sensor range inverted: {what} min {min} > max {max}")]
    InvertedRange { what: &'static str, min: u32, max: u32 },
}

/// Exposure (µs) and gain (mdB) tables interpolated linearly between the
/// sensor limits.
pub struct ExposureTables {
    pub exposure: [u32; EXPOSURE_TABLE_SIZE],
    pub gain: [u32; GAIN_TABLE_SIZE],
}

impl ExposureTables {
    pub fn new(info: &SensorInfo) -> Result<Self, EstimatorError> {
        Ok(Self {
            exposure: lerp_table("exposure", info.exposure_min, info.exposure_max)?,
            gain: lerp_table("gain", info.gain_min, info.gain_max)?,
        })
    }

    /// mdB between consecutive gain entries.
    fn gain_step_mdb(&self) -> f32 {
        (self.gain[GAIN_TABLE_SIZE - 1] - self.gain[0]) as f32 / (GAIN_TABLE_SIZE - 1) as f32
    }
}

fn lerp_table<const N: usize>(what: &'static str, min: u32, max: u32) -> Result<[u32; N], EstimatorError> {
    if min > max {
        return Err(EstimatorError::InvertedRange { what, min, max });
    }
    let span = u64::from(max - min);
    let mut table = [0u32; N];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = min + (span * i as u64 / (N as u64 - 1)) as u32;
    }
    Ok(table)
}

fn index_at_or_above(table: &[u32], value: f32) -> usize {
    table
        .partition_point(|&v| (v as f32) < value)
        .min(table.len() - 1)
}

fn index_at_or_below(table: &[u32], value: f32) -> usize {
    table.partition_point(|&v| (v as f32) <= value).saturating_sub(1)
}

/// First index holding a value strictly above `table[i]`.
fn next_up(table: &[u32], i: usize) -> usize {
    table.partition_point(|&v| v <= table[i]).min(table.len() - 1)
}

/// Last index holding a value strictly below `table[i]`.
fn next_down(table: &[u32], i: usize) -> usize {
    table.partition_point(|&v| v < table[i]).saturating_sub(1)
}

fn nearest_index(table: &[u32], value: u32) -> usize {
    let i = table.partition_point(|&v| v < value);
    if i == 0 {
        return 0;
    }
    if i == table.len() {
        return table.len() - 1;
    }
    if value - table[i - 1] <= table[i] - value {
        table.partition_point(|&v| v < table[i - 1])
    } else {
        i
    }
}

#[derive(Debug, Clone)]
pub struct AecHyperParams {
    /// Desired average luminance.
    pub target: u32,
    /// Luminance band around the target treated as converged.
    pub tolerance: u32,
    pub speed_p_min: f32,
    pub speed_p_max: f32,
    pub max_index_diff_exposure: usize,
    pub max_index_diff_gain: usize,
}

impl Default for AecHyperParams {
    fn default() -> Self {
        Self {
            target: 56,
            tolerance: 1,
            speed_p_min: 0.25,
            speed_p_max: 0.9,
            max_index_diff_exposure: EXPOSURE_INDEX_GUARD,
            max_index_diff_gain: GAIN_INDEX_GUARD,
        }
    }
}

/// Circular record of recent luminance errors and the indices they were
/// measured at.
#[derive(Debug, Clone, Default)]
struct History {
    deltas: [i32; HISTORY_LEN],
    indices: [(usize, usize); HISTORY_LEN],
    head: usize,
    len: usize,
}

impl History {
    fn push(&mut self, delta: i32, indices: (usize, usize)) {
        self.deltas[self.head] = delta;
        self.indices[self.head] = indices;
        self.head = (self.head + 1) % HISTORY_LEN;
        self.len = (self.len + 1).min(HISTORY_LEN);
    }

    /// Slots from newest to oldest.
    fn recent(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |k| (self.head + HISTORY_LEN - 1 - k) % HISTORY_LEN)
    }

    /// The last three errors alternate in sign.
    fn oscillating(&self) -> bool {
        let d: Vec<i32> = self.recent().take(3).map(|s| self.deltas[s]).collect();
        d.len() == 3 && d[0].signum() * d[1].signum() < 0 && d[1].signum() * d[2].signum() < 0
    }

    /// The newest indices were already visited with an error of the
    /// opposite sign.
    fn revisiting(&self) -> bool {
        let mut slots = self.recent();
        let Some(newest) = slots.next() else {
            return false;
        };
        slots.any(|s| {
            self.indices[s] == self.indices[newest]
                && self.deltas[s].signum() * self.deltas[newest].signum() < 0
        })
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Convergence state saved by [`AecEstimator::checkpoint`].
#[derive(Debug, Clone)]
pub struct AecCheckpoint {
    target: u32,
    index_exposure: usize,
    index_gain: usize,
    speed_p: f32,
    history: History,
    converged: bool,
    flickering: bool,
}

pub struct AecEstimator {
    tables: ExposureTables,
    params: AecHyperParams,
    index_exposure: usize,
    index_gain: usize,
    speed_p: f32,
    history: History,
    gain_guard: (usize, usize),
    converged: bool,
    flickering: bool,
}

impl AecEstimator {
    pub fn new(info: &SensorInfo, params: AecHyperParams) -> Result<Self, EstimatorError> {
        let tables = ExposureTables::new(info)?;
        let mut estimator = Self {
            tables,
            speed_p: params.speed_p_max,
            params,
            index_exposure: 0,
            index_gain: 0,
            history: History::default(),
            gain_guard: (0, 0),
            converged: false,
            flickering: false,
        };
        estimator.refresh_gain_guard();
        Ok(estimator)
    }

    pub fn tables(&self) -> &ExposureTables {
        &self.tables
    }

    pub fn exposure(&self) -> u32 {
        self.tables.exposure[self.index_exposure]
    }

    pub fn gain(&self) -> u32 {
        self.tables.gain[self.index_gain]
    }

    pub fn indices(&self) -> (usize, usize) {
        (self.index_exposure, self.index_gain)
    }

    pub fn speed_p(&self) -> f32 {
        self.speed_p
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn is_flickering(&self) -> bool {
        self.flickering
    }

    pub fn set_target(&mut self, target: u32) {
        if target != self.params.target {
            self.params.target = target;
            self.history.clear();
            self.converged = false;
        }
    }

    /// Jump back to the table minimum.
    pub fn reset(&mut self) {
        self.index_exposure = 0;
        self.index_gain = 0;
        self.history.clear();
        self.speed_p = self.params.speed_p_max;
        self.converged = false;
        self.flickering = false;
        self.refresh_gain_guard();
    }

    /// Re-seat the indices on the values last committed to the sensor.
    /// Indices already pointing at those values are kept as they are.
    pub fn reassert(&mut self, exposure: u32, gain: u32) {
        if self.exposure() != exposure {
            self.index_exposure = nearest_index(&self.tables.exposure, exposure);
        }
        if self.gain() != gain {
            self.index_gain = nearest_index(&self.tables.gain, gain);
        }
    }

    pub fn checkpoint(&self) -> AecCheckpoint {
        AecCheckpoint {
            target: self.params.target,
            index_exposure: self.index_exposure,
            index_gain: self.index_gain,
            speed_p: self.speed_p,
            history: self.history.clone(),
            converged: self.converged,
            flickering: self.flickering,
        }
    }

    /// Roll back to `checkpoint`, as if the steps taken since never happened.
    /// The gain guard is left alone; it only moves on committed writes.
    pub fn restore(&mut self, checkpoint: AecCheckpoint) {
        self.params.target = checkpoint.target;
        self.index_exposure = checkpoint.index_exposure;
        self.index_gain = checkpoint.index_gain;
        self.speed_p = checkpoint.speed_p;
        self.history = checkpoint.history;
        self.converged = checkpoint.converged;
        self.flickering = checkpoint.flickering;
    }

    /// Limit the next gain excursion to a window around the current index.
    pub fn refresh_gain_guard(&mut self) {
        let diff = self.params.max_index_diff_gain;
        self.gain_guard = (
            self.index_gain.saturating_sub(diff),
            (self.index_gain + diff).min(GAIN_TABLE_SIZE - 1),
        );
    }

    /// Feed one luminance measurement. Returns true when the exposure or
    /// gain index moved.
    pub fn converge(&mut self, luminance: u32) -> bool {
        let target = self.params.target;
        let delta = target as i32 - luminance as i32;
        self.history.push(delta, self.indices());

        if delta.unsigned_abs() <= self.params.tolerance {
            self.converged = true;
            self.flickering = false;
            return false;
        }
        self.converged = false;
        self.flickering = self.history.oscillating() || self.history.revisiting();

        let (min, max) = (self.params.speed_p_min, self.params.speed_p_max);
        self.speed_p = if self.flickering {
            min
        } else {
            let far = (delta.unsigned_abs() as f32 / target.max(1) as f32).min(1.0);
            min + (max - min) * far
        };

        let ratio = target.max(1) as f32 / luminance.max(1) as f32;
        let factor = (1.0 + self.speed_p * (ratio - 1.0)).clamp(FACTOR_MIN, FACTOR_MAX);

        let before = self.indices();
        if delta > 0 {
            self.brighten(factor);
        } else {
            self.darken(factor);
        }
        self.indices() != before
    }

    fn gain_steps(&self, factor: f32) -> usize {
        let step = self.tables.gain_step_mdb();
        if step <= 0.0 || factor <= 1.0 {
            return 0;
        }
        (20_000.0 * factor.log10() / step).ceil() as usize
    }

    fn brighten(&mut self, factor: f32) {
        let last_exposure = EXPOSURE_TABLE_SIZE - 1;
        let last_gain = GAIN_TABLE_SIZE - 1;
        let table = &self.tables.exposure;
        let mut rest = factor;

        if self.index_exposure < last_exposure {
            let current = table[self.index_exposure];
            let wanted = current as f32 * factor;
            let limit = (self.index_exposure + self.params.max_index_diff_exposure).min(last_exposure);
            let mut idx = index_at_or_above(table, wanted).min(limit);
            if table[idx] <= current {
                idx = next_up(table, self.index_exposure);
            }
            // Gain only takes over once exposure is exhausted.
            rest = if idx == last_exposure {
                wanted / table[last_exposure].max(1) as f32
            } else {
                1.0
            };
            self.index_exposure = idx;
        }

        if rest > 1.0 && self.index_gain < last_gain {
            let hi = self.gain_guard.1.max(self.index_gain);
            let steps = self.gain_steps(rest).max(1);
            let mut idx = (self.index_gain + steps).min(hi);
            if self.tables.gain[idx] <= self.gain() {
                idx = next_up(&self.tables.gain, self.index_gain);
            }
            self.index_gain = idx;
        }
    }

    fn darken(&mut self, factor: f32) {
        let mut rest = factor;

        if self.index_gain > 0 {
            let needed_mdb = 20_000.0 * (1.0 / factor).log10();
            let lo = self.gain_guard.0.min(self.index_gain);
            let steps = self.gain_steps(1.0 / factor).max(1);
            let mut idx = self.index_gain.saturating_sub(steps).max(lo);
            if self.tables.gain[idx] >= self.gain() {
                idx = next_down(&self.tables.gain, self.index_gain);
            }
            let absorbed_mdb = (self.gain() - self.tables.gain[idx]) as f32;
            self.index_gain = idx;
            // Exposure only gives back what gain could not.
            rest = if idx == 0 && needed_mdb > absorbed_mdb {
                10f32.powf(-(needed_mdb - absorbed_mdb) / 20_000.0)
            } else {
                1.0
            };
        }

        if rest < 1.0 && self.index_exposure > 0 {
            let table = &self.tables.exposure;
            let current = table[self.index_exposure];
            let wanted = current as f32 * rest;
            let limit = self
                .index_exposure
                .saturating_sub(self.params.max_index_diff_exposure);
            let mut idx = index_at_or_below(table, wanted).max(limit);
            if table[idx] >= current {
                idx = next_down(table, self.index_exposure);
            }
            self.index_exposure = idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(exposure_min: u32, exposure_max: u32, gain_min: u32, gain_max: u32) -> SensorInfo {
        SensorInfo {
            name: "test".into(),
            exposure_min,
            exposure_max,
            gain_min,
            gain_max,
            vsync_latency: 3,
        }
    }

    /// Luminance a flat scene would read back at the given settings.
    fn plant(brightness: f32, exposure: u32, gain: u32) -> u32 {
        let lum = brightness * exposure as f32 / 1000.0 * 10f32.powf(gain as f32 / 20_000.0);
        lum.round().clamp(0.0, 255.0) as u32
    }

    #[test]
    fn test_tables_span_sensor_range() {
        for (emin, emax, gmin, gmax) in [
            (100, 10_000, 0, 24_000),
            (8, 33_266, 0, 72_000),
            (50, 50, 1000, 1000),
            (1, 3000, 0, 100),
            (0, u32::MAX, 0, u32::MAX),
        ] {
            let t = ExposureTables::new(&info(emin, emax, gmin, gmax)).unwrap();
            assert_eq!(t.exposure[0], emin);
            assert_eq!(t.exposure[EXPOSURE_TABLE_SIZE - 1], emax);
            assert_eq!(t.gain[0], gmin);
            assert_eq!(t.gain[GAIN_TABLE_SIZE - 1], gmax);
            assert!(t.exposure.windows(2).all(|w| w[0] <= w[1]));
            assert!(t.gain.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(ExposureTables::new(&info(500, 100, 0, 10)).is_err());
        assert!(ExposureTables::new(&info(100, 500, 20, 10)).is_err());
    }

    #[test]
    fn test_starts_at_table_minimum() {
        let est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        assert_eq!(est.exposure(), 100);
        assert_eq!(est.gain(), 0);
    }

    #[test]
    fn test_idempotent_at_target() {
        let mut est = AecEstimator::new(
            &info(100, 10_000, 0, 24_000),
            AecHyperParams { target: 56, tolerance: 0, ..AecHyperParams::default() },
        )
        .unwrap();
        est.reassert(5000, 1200);
        let before = (est.exposure(), est.gain());
        assert!(!est.converge(56));
        assert_eq!((est.exposure(), est.gain()), before);
        assert!(est.is_converged());
    }

    #[test]
    fn test_dark_scene_raises_exposure_before_gain() {
        let mut est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        assert!(est.converge(0));
        assert!(est.exposure() > 100);
        assert_eq!(est.gain(), 0);
    }

    #[test]
    fn test_bright_scene_drops_gain_before_exposure() {
        let mut est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        est.reassert(10_000, 12_000);
        est.refresh_gain_guard();
        assert!(est.converge(200));
        assert_eq!(est.exposure(), 10_000);
        assert!(est.gain() < 12_000);
        assert!(est.indices().1 >= 120 - GAIN_INDEX_GUARD);
    }

    #[test]
    fn test_gain_step_bounded_by_guard() {
        let mut est = AecEstimator::new(&info(100, 200, 0, 60_000), AecHyperParams::default()).unwrap();
        est.reassert(200, 0);
        est.refresh_gain_guard();
        est.converge(1);
        let (_, ig) = est.indices();
        assert!(ig <= GAIN_INDEX_GUARD, "gain index jumped to {ig}");
    }

    #[test]
    fn test_converges_on_flat_scene() {
        let mut est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        let mut lum = 0;
        for _ in 0..200 {
            est.converge(lum);
            est.refresh_gain_guard();
            lum = plant(4.0, est.exposure(), est.gain());
        }
        assert!(lum.abs_diff(56) <= 2, "settled at {lum}");
        assert_eq!(est.exposure(), 10_000, "needs full exposure before gain");
        assert!(est.gain() > 0);
    }

    #[test]
    fn test_converges_down_from_saturation() {
        let mut est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        est.reassert(10_000, 24_000);
        let mut lum = 255;
        for _ in 0..300 {
            est.converge(lum);
            est.refresh_gain_guard();
            lum = plant(40.0, est.exposure(), est.gain());
        }
        assert!(lum.abs_diff(56) <= 2, "settled at {lum}");
        assert_eq!(est.gain(), 0);
    }

    #[test]
    fn test_narrow_exposure_range_still_progresses() {
        let mut est = AecEstimator::new(&info(100, 300, 0, 24_000), AecHyperParams::default()).unwrap();
        let start = est.exposure();
        assert!(est.converge(40));
        assert!(est.exposure() > start);
    }

    #[test]
    fn test_restore_rewinds_a_step() {
        let mut est = AecEstimator::new(&info(100, 10_000, 0, 24_000), AecHyperParams::default()).unwrap();
        est.converge(0);
        est.refresh_gain_guard();
        let before = est.indices();

        let checkpoint = est.checkpoint();
        est.set_target(80);
        assert!(est.converge(10));
        let first = est.indices();
        est.restore(checkpoint);

        assert_eq!(est.indices(), before);
        assert_eq!(est.params.target, 56);
        assert_eq!(est.history.len, 1);

        est.set_target(80);
        assert!(est.converge(10));
        assert_eq!(est.indices(), first, "a replayed step lands on the same indices");
        assert_eq!(est.history.len, 2);
    }

    #[test]
    fn test_history_detects_oscillation() {
        let mut h = History::default();
        h.push(10, (1, 1));
        h.push(-8, (2, 1));
        assert!(!h.oscillating());
        h.push(6, (1, 1));
        assert!(h.oscillating());
    }

    #[test]
    fn test_history_detects_revisit() {
        let mut h = History::default();
        h.push(10, (4, 0));
        h.push(3, (5, 0));
        assert!(!h.revisiting());
        h.push(-3, (4, 0));
        assert!(h.revisiting());
    }

    #[test]
    fn test_nearest_index() {
        let table = [0, 10, 20, 30];
        assert_eq!(nearest_index(&table, 0), 0);
        assert_eq!(nearest_index(&table, 14), 1);
        assert_eq!(nearest_index(&table, 16), 2);
        assert_eq!(nearest_index(&table, 99), 3);
    }
}
