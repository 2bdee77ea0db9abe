//! Ratio-based white balance: pulls R and B towards G with the ISP gains.

use crate::algo::{AlgoContext, AlgoError, Algorithm, StatSlot, ISP_VSYNC_LATENCY};
use crate::types::{AlgoId, AlgoState};
use isp3a_hw::{IspGain, StatKind, StatLocation};

pub struct SimpleAwb {
    state: AlgoState,
    slot: StatSlot,
    bypass: bool,
}

impl SimpleAwb {
    /// A bypassed instance keeps its place in the schedule but does nothing.
    pub fn new(bypass: bool) -> Self {
        Self {
            state: AlgoState::Uninitialized,
            slot: StatSlot::default(),
            bypass,
        }
    }

    fn step(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let stats = self.slot.snapshot;
        if stats.r > 0 && stats.g > 0 && stats.b > 0 {
            let params = &ctx.iq.simple_awb;
            let current = ctx.port.isp_gain()?;
            let current = if current.enable { current } else { IspGain::UNITY };

            let g = f32::from(stats.g);
            let r = (current.r * g / f32::from(stats.r)).clamp(params.gain_min, params.gain_max);
            let b = (current.b * g / f32::from(stats.b)).clamp(params.gain_min, params.gain_max);
            let gain = IspGain { enable: true, r, g: current.g, b };

            if gain != current {
                ctx.port.set_isp_gain(gain)?;
                tracing::debug!(r, b, ?stats, "simple awb gains applied");
            }
        }
        self.state = AlgoState::NeedStat;
        self.request(ctx)
    }

    fn request(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.slot
            .request(ctx.port, StatLocation::Down, StatKind::Rgb, ISP_VSYNC_LATENCY)?;
        self.state = AlgoState::WaitingStat;
        Ok(())
    }
}

impl Algorithm for SimpleAwb {
    fn id(&self) -> AlgoId {
        AlgoId::SimpleAwb
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.slot.reset();
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.slot.reset();
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        if self.bypass || !ctx.iq.simple_awb.enable {
            return Ok(());
        }
        self.slot.poll(AlgoId::SimpleAwb, &mut self.state);
        match self.state {
            AlgoState::Uninitialized => Err(AlgoError::AlgorithmFailure("simple awb not initialised".into())),
            AlgoState::Init | AlgoState::NeedStat => self.request(ctx),
            AlgoState::WaitingStat => Ok(()),
            AlgoState::StatReady => self.step(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iq::IqParams;
    use crate::types::Diagnostics;
    use isp3a_hw::{SensorInfo, SimulatedIsp};

    fn setup(cct: f32) -> (SimulatedIsp, IqParams) {
        let mut isp = SimulatedIsp::new(
            SensorInfo {
                name: "test".into(),
                exposure_min: 100,
                exposure_max: 33_000,
                gain_min: 0,
                gain_max: 24_000,
                vsync_latency: 3,
            },
        );
        isp.scene.cct = cct;
        isp.sensor_exposure = 20_000;
        isp.gamma_enabled = false;
        (isp, IqParams::builtin("imx335").unwrap())
    }

    fn run(algo: &mut SimpleAwb, isp: &mut SimulatedIsp, iq: &mut IqParams, ticks: usize) {
        let mut diag = Diagnostics::default();
        for _ in 0..ticks {
            isp.advance_frame();
            let mut ctx = AlgoContext { port: &mut *isp, iq: &mut *iq, diagnostics: &mut diag };
            algo.process(&mut ctx).unwrap();
        }
    }

    fn started(bypass: bool, isp: &mut SimulatedIsp, iq: &mut IqParams) -> SimpleAwb {
        let mut algo = SimpleAwb::new(bypass);
        let mut diag = Diagnostics::default();
        let mut ctx = AlgoContext { port: isp, iq, diagnostics: &mut diag };
        algo.init(&mut ctx).unwrap();
        algo
    }

    #[test]
    fn test_bypass_is_a_no_op() {
        let (mut isp, mut iq) = setup(2856.0);
        let mut algo = started(true, &mut isp, &mut iq);
        run(&mut algo, &mut isp, &mut iq, 10);
        assert_eq!(algo.state(), AlgoState::Init);
        assert_eq!(isp.writes.isp_gain, 0);
        assert_eq!(isp.outstanding_requests(), 0);
    }

    #[test]
    fn test_balances_warm_scene() {
        let (mut isp, mut iq) = setup(2856.0);
        let mut algo = started(false, &mut isp, &mut iq);
        run(&mut algo, &mut isp, &mut iq, 10);

        let stats = isp.sample(StatLocation::Down);
        assert!(stats.r.abs_diff(stats.g) <= 1, "{stats:?}");
        assert!(stats.b.abs_diff(stats.g) <= 1, "{stats:?}");
        assert!(isp.isp_gain.r < 1.0 && isp.isp_gain.b > 1.0);
    }

    #[test]
    fn test_gains_respect_limits() {
        let (mut isp, mut iq) = setup(2000.0);
        iq.simple_awb.gain_min = 0.8;
        iq.simple_awb.gain_max = 1.2;
        let mut algo = started(false, &mut isp, &mut iq);
        run(&mut algo, &mut isp, &mut iq, 10);
        assert_eq!(isp.isp_gain.r, 0.8);
        assert_eq!(isp.isp_gain.b, 1.2);
    }
}
