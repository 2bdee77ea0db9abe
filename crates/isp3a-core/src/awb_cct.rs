//! White balance by direct color temperature estimate.
//!
//! No iterative convergence: every measurement is turned into a CCT via
//! McCamy's formula and mapped to the nearest calibration profile. Profile
//! switches are rate-limited by a voting window.

use crate::algo::{AlgoContext, AlgoError, Algorithm, StatSlot, ISP_VSYNC_LATENCY};
use crate::color::estimate_cct;
use crate::types::{AlgoId, AlgoState};
use crate::white_balance::{build_profiles, AwbProfile};
use isp3a_hw::{StatKind, StatLocation};

/// Measurements collected after a switch before the next one may happen.
pub const HOLD_CYCLES: u32 = 11;

/// Index of the reference temperature closest to `cct`; the earliest wins
/// ties.
pub fn nearest_profile(cct: f64, reference_temps: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &temp) in reference_temps.iter().enumerate() {
        let distance = (cct - f64::from(temp)).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

/// Vote-based anti-oscillation filter.
#[derive(Debug, Clone)]
pub struct CctHysteresis {
    applied: Option<usize>,
    hold: u32,
    votes: Vec<u32>,
}

impl CctHysteresis {
    pub fn new(profiles: usize) -> Self {
        Self {
            applied: None,
            hold: 0,
            votes: vec![0; profiles],
        }
    }

    pub fn applied(&self) -> Option<usize> {
        self.applied
    }

    /// Record one nearest-profile observation. Returns the profile to
    /// apply when a switch is due. The switch only takes effect once
    /// [`commit`](Self::commit)ted; until then every observation offers
    /// it again.
    pub fn observe(&mut self, candidate: usize) -> Option<usize> {
        if candidate >= self.votes.len() {
            return None;
        }
        let Some(applied) = self.applied else {
            return Some(candidate);
        };

        self.votes[candidate] += 1;
        self.hold = self.hold.saturating_sub(1);
        if self.hold > 0 {
            return None;
        }

        let mut winner = 0;
        for (i, &v) in self.votes.iter().enumerate() {
            if v > self.votes[winner] {
                winner = i;
            }
        }
        if winner == applied {
            self.switch_to(applied);
            return None;
        }
        Some(winner)
    }

    /// Mark `index` as applied to the hardware and open a new window.
    pub fn commit(&mut self, index: usize) {
        if index < self.votes.len() {
            self.switch_to(index);
        }
    }

    fn switch_to(&mut self, index: usize) {
        self.applied = Some(index);
        self.hold = HOLD_CYCLES;
        self.votes.iter_mut().for_each(|v| *v = 0);
    }
}

pub struct SimpleAwbCct {
    state: AlgoState,
    slot: StatSlot,
    bypass: bool,
    profiles: Vec<AwbProfile>,
    hysteresis: CctHysteresis,
}

impl SimpleAwbCct {
    pub fn new(bypass: bool) -> Self {
        Self {
            state: AlgoState::Uninitialized,
            slot: StatSlot::default(),
            bypass,
            profiles: Vec::new(),
            hysteresis: CctHysteresis::new(0),
        }
    }

    pub fn applied_profile(&self) -> Option<&AwbProfile> {
        self.hysteresis.applied().and_then(|i| self.profiles.get(i))
    }

    fn configure(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.profiles =
            build_profiles(&ctx.iq.awb).map_err(|e| AlgoError::AlgorithmFailure(e.to_string()))?;
        self.hysteresis = CctHysteresis::new(self.profiles.len());
        self.state = AlgoState::NeedStat;
        Ok(())
    }

    fn step(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        let stats = self.slot.snapshot;
        let gain = ctx.port.isp_gain()?;
        let mut rgb = [f64::from(stats.r), f64::from(stats.g), f64::from(stats.b)];
        if gain.enable {
            for (v, g) in rgb.iter_mut().zip([gain.r, gain.g, gain.b]) {
                if g > 0.0 {
                    *v /= f64::from(g);
                }
            }
        }

        if let Some(cct) = estimate_cct(rgb, ctx.iq.awb_cct.correction) {
            let temps: Vec<u32> = self.profiles.iter().map(|p| p.reference_temp).collect();
            let switch = nearest_profile(cct, &temps).and_then(|i| self.hysteresis.observe(i));
            if let Some(index) = switch {
                let profile = &self.profiles[index];
                profile.apply(ctx.port)?;
                self.hysteresis.commit(index);
                ctx.diagnostics.awb_profile = index;
                ctx.diagnostics.awb_temperature = profile.reference_temp;
                tracing::info!(cct, profile = %profile.label, "cct awb profile applied");
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

impl Algorithm for SimpleAwbCct {
    fn id(&self) -> AlgoId {
        AlgoId::SimpleAwbCct
    }

    fn state(&self) -> AlgoState {
        self.state
    }

    fn init(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.profiles.clear();
        self.slot.reset();
        self.state = AlgoState::Init;
        Ok(())
    }

    fn deinit(&mut self, _ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        self.profiles.clear();
        self.hysteresis = CctHysteresis::new(0);
        self.slot.reset();
        self.state = AlgoState::Uninitialized;
        Ok(())
    }

    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError> {
        if self.bypass || !ctx.iq.awb_cct.enable {
            return Ok(());
        }
        self.slot.poll(AlgoId::SimpleAwbCct, &mut self.state);
        match self.state {
            AlgoState::Uninitialized => Err(AlgoError::AlgorithmFailure("cct awb not initialised".into())),
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
