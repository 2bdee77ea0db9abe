//! Auto exposure: drives sensor exposure and analog gain towards the
//! configured target luminance.

use crate::algo::{AlgoContext, AlgoError, Algorithm, StatSlot};
use crate::exposure::{AecEstimator, AecHyperParams};
use crate::types::{AlgoId, AlgoState};
use isp3a_hw::{IspPort, StatKind, StatLocation, Statistics};

/// Sensor values last written successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub exposure: u32,
    pub gain: u32,
}

pub struct Aec {
    state: AlgoState,
    estimator: Option<AecEstimator>,
    slot: StatSlot,
    committed: Option<Committed>,
    /// Frames the sensor needs before a write shows in the statistics.
    latency: u32,
}

impl Aec {
    pub fn new() -> Self {
        Self {
            state: AlgoState::Uninitialized,
            estimator: None,
            slot: StatSlot::default(),
            committed: None,
            latency: 0,
        }
    }

    pub fn estimator(&self) -> Option<&AecEstimator> {
        self.estimator.as_ref()
    }

    pub fn committed(&self) -> Option<Committed> {
        self.committed
    }

    fn step(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let estimator = self
            .estimator
            .as_mut()
            .ok_or_else(|| AlgoError::AlgorithmFailure("aec estimator missing".into()))?;
        let checkpoint = estimator.checkpoint();

        // Someone may have overridden the sensor since our last write.
        if let Some(c) = self.committed {
            estimator.reassert(c.exposure, c.gain);
        }
        estimator.set_target(ctx.iq.aec.exposure_target);

        let luminance = u32::from(self.slot.snapshot.l);
        let moved = estimator.converge(luminance);
        let (exposure, gain) = (estimator.exposure(), estimator.gain());

        // The retry on the next tick replays this step from the same snapshot.
        if let Err(e) = write_sensor(ctx.port, exposure, gain) {
            estimator.restore(checkpoint);
            return Err(e);
        }
        self.committed = Some(Committed { exposure, gain });
        estimator.refresh_gain_guard();

        tracing::debug!(
            luminance,
            target = ctx.iq.aec.exposure_target,
            exposure,
            gain,
            moved,
            speed_p = estimator.speed_p(),
            converged = estimator.is_converged(),
            flickering = estimator.is_flickering(),
            "aec step"
        );

        self.state = AlgoState::NeedStat;
        self.request(ctx)
    }

    fn request(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.slot.request(
            ctx.port,
            StatLocation::Up,
            StatKind::Luminance,
            self.latency,
        )?;
        self.state = AlgoState::WaitingStat;
        Ok(())
    }
}

/// Push gain then exposure, skipping registers that already hold the value.
fn write_sensor(port: &mut dyn IspPort, exposure: u32, gain: u32) -> Result<(), AlgoError> {
    if port.sensor_gain()? != gain {
        port.set_sensor_gain(gain)?;
    }
    if port.sensor_exposure()? != exposure {
        port.set_sensor_exposure(exposure)?;
    }
    Ok(())
}

impl Default for Aec {
    fn default() -> Self {
        Self::new()
    }
}

impl Algorithm for Aec {
    fn id(&self) -> AlgoId {
        AlgoId::Aec
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let info = ctx.port.sensor_info()?;
        let params = AecHyperParams {
            target: ctx.iq.aec.exposure_target,
            ..AecHyperParams::default()
        };
        let mut estimator = AecEstimator::new(&info, params)
            .map_err(|e| AlgoError::AlgorithmFailure(e.to_string()))?;
        estimator.reset();

        self.slot.reset();
        self.committed = None;
        self.latency = info.vsync_latency;
        if ctx.iq.aec.enable {
            let (exposure, gain) = (estimator.exposure(), estimator.gain());
            ctx.port.set_sensor_exposure(exposure)?;
            ctx.port.set_sensor_gain(gain)?;
            self.committed = Some(Committed { exposure, gain });
        }

        tracing::info!(
            sensor = %info.name,
            exposure_min = info.exposure_min,
            exposure_max = info.exposure_max,
            gain_min = info.gain_min,
            gain_max = info.gain_max,
            vsync_latency = info.vsync_latency,
            target = ctx.iq.aec.exposure_target,
            "aec initialised"
        );
        self.estimator = Some(estimator);
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.estimator = None;
        self.committed = None;
        self.slot.reset();
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        if !ctx.iq.aec.enable {
            return Ok(());
        }

        self.slot.poll(AlgoId::Aec, &mut self.state);
        match self.state {
            AlgoState::Uninitialized => Err(AlgoError::AlgorithmFailure("aec not initialised".into())),
            AlgoState::Init => {
                // Hardware sits at the table minimum; treat the scene as black.
                self.slot.snapshot = Statistics::default();
                self.state = AlgoState::StatReady;
                self.step(ctx)
            }
            AlgoState::NeedStat => self.request(ctx),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => self.step(ctx),
        }
    }
}
