//! Bad pixel correction strength controller.
//!
//! Averages the hardware defect count over a fixed window and nudges the
//! correction strength one step towards the configured threshold.

use crate::algo::{AlgoContext, AlgoError, Algorithm};
use crate::types::{AlgoId, AlgoState};
use std::cmp::Ordering;

/// Number of strength levels supported by the correction block.
pub const STRENGTH_MAX: u8 = 8;
/// Defect counts averaged per adjustment.
pub const ACCUMULATION_STEPS: u32 = 10;

pub struct BadPixel {
    state: AlgoState,
    running: bool,
    /// 0 = idle frame, 1..=ACCUMULATION_STEPS = accumulating.
    step: u32,
    count_sum: u32,
    strength: u8,
}

impl BadPixel {
    pub fn new() -> Self {
        Self {
            state: AlgoState::Uninitialized,
            running: false,
            step: 0,
            count_sum: 0,
            strength: 0,
        }
    }

    pub fn strength(&self) -> u8 {
        self.strength
    }
}

impl Default for BadPixel {
    fn default() -> Self {
        Self::new()
    }
}

/// One step towards `threshold`, kept within `[0, STRENGTH_MAX - 1]`.
///
/// A mean count exactly on the threshold holds the current strength.
pub fn adjust_strength(strength: u8, mean_count: u32, threshold: u32) -> u8 {
    match mean_count.cmp(&threshold) {
        Ordering::Greater => strength.saturating_sub(1),
        Ordering::Less if strength < STRENGTH_MAX - 1 => strength + 1,
        _ => strength,
    }
}

impl Algorithm for BadPixel {
    fn id(&self) -> AlgoId {
        AlgoId::BadPixel
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.running = false;
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.running = false;
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let params = &ctx.iq.bad_pixel;
        if !params.enable {
            self.running = false;
            return Ok(());
        }

        if !self.running {
            self.running = true;
            self.step = 0;
            self.count_sum = 0;
            self.strength = params.strength.min(STRENGTH_MAX - 1);
        }

        // Idle frame: the previous configuration is still settling.
        if self.step == 0 {
            self.step = 1;
            return Ok(());
        }

        // On failure the step is not consumed, so the next call retries it.
        let count = ctx.port.bad_pixel_count()?;
        let sum = self.count_sum.saturating_add(count);

        if self.step < ACCUMULATION_STEPS {
            self.count_sum = sum;
            self.step += 1;
            return Ok(());
        }

        let mean = sum / ACCUMULATION_STEPS;
        let strength = adjust_strength(self.strength, mean, params.threshold);
        ctx.port.set_bad_pixel_correction(strength, true)?;

        tracing::debug!(mean, threshold = params.threshold, strength, "bad pixel strength applied");
        self.strength = strength;
        self.count_sum = 0;
        self.step = 0;
        Ok(())
    }
}
