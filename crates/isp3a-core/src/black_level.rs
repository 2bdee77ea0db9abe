//! Black level correction selected from calibration by sensor gain.

use crate::algo::{AlgoContext, AlgoError, Algorithm};
use crate::types::{AlgoId, AlgoState};
use isp3a_hw::BlackLevel as BlackLevelRegs;

/// Index of the reference gain closest to `gain`; the earliest wins ties.
pub fn nearest_reference(gain: u32, reference_gain: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, &reference) in reference_gain.iter().enumerate() {
        let distance = gain.abs_diff(reference);
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

pub struct BlackLevel {
    state: AlgoState,
    last_applied: Option<[u8; 3]>,
}

impl BlackLevel {
    pub fn new() -> Self {
        Self {
            state: AlgoState::Uninitialized,
            last_applied: None,
        }
    }

    pub fn last_applied(&self) -> Option<[u8; 3]> {
        self.last_applied
    }
}

impl Default for BlackLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl Algorithm for BlackLevel {
    fn id(&self) -> AlgoId {
        AlgoId::BlackLevel
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.last_applied = None;
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.last_applied = None;
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let params = &ctx.iq.black_level;
        if !params.enable {
            self.last_applied = None;
            return Ok(());
        }
        if params.reference_gain.len() != params.level.len() {
            return Err(AlgoError::InvalidArgument(format!(
                "black level table has {} reference gains but {} levels",
                params.reference_gain.len(),
                params.level.len()
            )));
        }

        let gain = ctx.port.sensor_gain()?;
        let index = nearest_reference(gain, &params.reference_gain).ok_or_else(|| {
            AlgoError::InvalidArgument("black level reference table is empty".into())
        })?;
        let level = params.level[index];

        if self.last_applied == Some(level) {
            return Ok(());
        }

        ctx.port.set_black_level(BlackLevelRegs {
            enable: true,
            r: level[0],
            g: level[1],
            b: level[2],
        })?;
        tracing::debug!(gain, index, ?level, "black level applied");
        self.last_applied = Some(level);
        Ok(())
    }
}
