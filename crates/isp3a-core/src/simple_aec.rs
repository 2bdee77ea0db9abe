//! Proportional exposure control without lookup tables.

use crate::algo::{AlgoContext, AlgoError, Algorithm, StatSlot};
use crate::types::{AlgoId, AlgoState};
use isp3a_hw::{SensorInfo, StatKind, StatLocation};

/// Gain change per step once exposure is exhausted, in mdB.
pub const GAIN_STEP_MDB: u32 = 1000;

pub struct SimpleAec {
    state: AlgoState,
    slot: StatSlot,
    sensor: Option<SensorInfo>,
    bypass: bool,
}

impl SimpleAec {
    pub fn new(bypass: bool) -> Self {
        Self {
            state: AlgoState::Uninitialized,
            slot: StatSlot::default(),
            sensor: None,
            bypass,
        }
    }

    fn step(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let sensor = self
            .sensor
            .as_ref()
            .ok_or_else(|| AlgoError::AlgorithmFailure("simple aec sensor info missing".into()))?;
        let target = ctx.iq.aec.exposure_target;
        let luminance = u32::from(self.slot.snapshot.l);

        if target.abs_diff(luminance) > ctx.iq.simple_aec.tolerance {
            let exposure = ctx.port.sensor_exposure()?;
            let gain = ctx.port.sensor_gain()?;
            let ratio = target.max(1) as f32 / luminance.max(1) as f32;

            if luminance < target {
                if exposure < sensor.exposure_max {
                    let scaled = (exposure as f32 * ratio) as u32;
                    let next = scaled.max(exposure + 1).min(sensor.exposure_max);
                    ctx.port.set_sensor_exposure(next)?;
                    tracing::debug!(luminance, target, exposure = next, "simple aec exposure up");
                } else if gain < sensor.gain_max {
                    let next = (gain + GAIN_STEP_MDB).min(sensor.gain_max);
                    ctx.port.set_sensor_gain(next)?;
                    tracing::debug!(luminance, target, gain = next, "simple aec gain up");
                }
            } else if gain > sensor.gain_min {
                let next = gain.saturating_sub(GAIN_STEP_MDB).max(sensor.gain_min);
                ctx.port.set_sensor_gain(next)?;
                tracing::debug!(luminance, target, gain = next, "simple aec gain down");
            } else if exposure > sensor.exposure_min {
                let scaled = (exposure as f32 * ratio) as u32;
                let next = scaled.min(exposure - 1).max(sensor.exposure_min);
                ctx.port.set_sensor_exposure(next)?;
                tracing::debug!(luminance, target, exposure = next, "simple aec exposure down");
            }
        }

        self.state = AlgoState::NeedStat;
        self.request(ctx)
    }

    fn request(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let latency = self
            .sensor
            .as_ref()
            .map(|s| s.vsync_latency)
            .ok_or_else(|| AlgoError::AlgorithmFailure("simple aec sensor info missing".into()))?;
        self.slot.request(ctx.port, StatLocation::Up, StatKind::Luminance, latency)?;
        self.state = AlgoState::WaitingStat;
        Ok(())
    }
}

impl Algorithm for SimpleAec {
    fn id(&self) -> AlgoId {
        AlgoId::SimpleAec
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.sensor = Some(ctx.port.sensor_info()?);
        self.slot.reset();
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.sensor = None;
        self.slot.reset();
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        if self.bypass || !ctx.iq.simple_aec.enable {
            return Ok(());
        }
        self.slot.poll(AlgoId::SimpleAec, &mut self.state);
        match self.state {
            AlgoState::Uninitialized => Err(AlgoError::AlgorithmFailure("simple aec not initialised".into())),
            AlgoState::Init | AlgoState::NeedStat => self.request(ctx),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => self.step(ctx),
        }
    }
}
