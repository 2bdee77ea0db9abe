//! Auto white balance: selects the calibration profile (ISP gains + color
//! conversion) matching the estimated scene color temperature.

use crate::algo::{AlgoContext, AlgoError, Algorithm, StatSlot, ISP_VSYNC_LATENCY};
use crate::color::{apply_ccm, inverse_gamma};
use crate::types::{AlgoId, AlgoState};
use crate::white_balance::{build_profiles, AwbHyperParams, WbEstimator};
use isp3a_hw::{Pipe, StatKind, StatLocation};

pub struct Awb {
    state: AlgoState,
    estimator: Option<WbEstimator>,
    slot: StatSlot,
    applied_temp: Option<u32>,
    /// Apply the selected profile even if its temperature did not change.
    force_apply: bool,
}

impl Awb {
    pub fn new() -> Self {
        Self {
            state: AlgoState::Uninitialized,
            estimator: None,
            slot: StatSlot::default(),
            applied_temp: None,
            force_apply: false,
        }
    }

    pub fn estimator(&self) -> Option<&WbEstimator> {
        self.estimator.as_ref()
    }

    pub fn applied_temp(&self) -> Option<u32> {
        self.applied_temp
    }

    /// Rebuild the profile set from the current tuning.
    fn configure(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        ctx.iq.awb.reconfigure = false;
        let profiles =
            build_profiles(&ctx.iq.awb).map_err(|e| AlgoError::AlgorithmFailure(e.to_string()))?;
        let estimator = WbEstimator::new(profiles, AwbHyperParams::default())
            .map_err(|e| AlgoError::AlgorithmFailure(e.to_string()))?;

        tracing::info!(
            profiles = estimator.profiles().len(),
            thresholds = ?estimator.thresholds(),
            start = estimator.output(),
            "awb configured"
        );
        self.estimator = Some(estimator);
        self.force_apply = true;
        self.state = AlgoState::NeedStat;
        Ok(())
    }

    fn step(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let estimator = self
            .estimator
            .as_mut()
            .ok_or_else(|| AlgoError::AlgorithmFailure("awb estimator missing".into()))?;

        let stats = self.slot.snapshot;
        let ccm = ctx.port.color_conversion()?;
        let mut rgb = apply_ccm(
            &ccm,
            [f32::from(stats.r), f32::from(stats.g), f32::from(stats.b)],
        );
        if ctx.port.is_gamma_enabled(Pipe::Main) {
            rgb = rgb.map(inverse_gamma);
        }

        let temp = estimator.converge(rgb);
        let converged = estimator.is_converged();
        if self.applied_temp != Some(temp) || self.force_apply {
            self.apply_temperature(ctx, temp)?;
        } else {
            tracing::trace!(temperature = temp, converged, "awb holding");
        }

        self.state = AlgoState::NeedStat;
        self.request(ctx)
    }

    /// Push the profile calibrated for `temp`. Nothing is written when no
    /// profile carries that reference temperature.
    fn apply_temperature(&mut self, ctx: &mut AlgoContext<'_>, temp: u32) -> Result<(), AlgoError> {
        let estimator = self
            .estimator
            .as_ref()
            .ok_or_else(|| AlgoError::AlgorithmFailure("awb estimator missing".into()))?;
        let (index, profile) = estimator
            .profile_for(temp)
            .ok_or(AlgoError::UnknownColorTemperature(temp))?;
        profile.apply(ctx.port)?;

        ctx.diagnostics.awb_profile = index;
        ctx.diagnostics.awb_temperature = temp;
        tracing::info!(
            profile = %profile.label,
            temperature = temp,
            estimate = estimator.estimate_kelvin(),
            "awb profile applied"
        );
        self.applied_temp = Some(temp);
        self.force_apply = false;
        Ok(())
    }

    fn request(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.slot
            .request(ctx.port, StatLocation::Down, StatKind::Rgb, ISP_VSYNC_LATENCY)?;
        self.state = AlgoState::WaitingStat;
        Ok(())
    }
}

impl Default for Awb {
    fn default() -> Self {
        Self::new()
    }
}

impl Algorithm for Awb {
    fn id(&self) -> AlgoId {
        AlgoId::Awb
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.estimator = None;
        self.applied_temp = None;
        self.slot.reset();
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.estimator = None;
        self.applied_temp = None;
        self.slot.reset();
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        if self.state == AlgoState::Uninitialized {
            return Err(AlgoError::AlgorithmFailure("awb not initialised".into()));
        }
        if !ctx.iq.awb.enable {
            // Re-enabling starts over from a fresh profile set.
            if self.state != AlgoState::Init {
                self.slot.reset();
                self.state = AlgoState::Init;
            }
            return Ok(());
        }
        if ctx.iq.awb.reconfigure {
            self.slot.reset();
            self.state = AlgoState::Init;
        }

        self.slot.poll(AlgoId::Awb, &mut self.state);
        match self.state {
            AlgoState::Uninitialized => Ok(()),
            AlgoState::Init => {
                self.configure(ctx)?;
                self.request(ctx)
            }
            AlgoState::NeedStat => self.request(ctx),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => self.step(ctx),
        }
    }
}
