//! Ordered algorithm registry and the per-frame scheduler.

use crate::aec::Aec;
use crate::algo::{AlgoContext, AlgoError, Algorithm};
use crate::awb::Awb;
use crate::awb_cct::SimpleAwbCct;
use crate::bad_pixel::BadPixel;
use crate::black_level::BlackLevel;
use crate::iq::IqParams;
use crate::simple_aec::SimpleAec;
use crate::simple_awb::SimpleAwb;
use crate::types::{AlgoId, AlgoState, Diagnostics};
use isp3a_hw::IspPort;

/// Highest meaningful luminance target.
const EXPOSURE_TARGET_MAX: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Keep Simple AWB, Simple AEC and Simple AWB-CCT scheduled but inert.
    pub bypass_simple: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self { bypass_simple: true }
    }
}

pub struct AlgorithmRegistry {
    algorithms: Vec<Box<dyn Algorithm + Send>>,
    diagnostics: Diagnostics,
}

impl AlgorithmRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        let bypass = options.bypass_simple;
        let algorithms = AlgoId::ORDER
            .iter()
            .map(|id| -> Box<dyn Algorithm + Send> {
                match id {
                    AlgoId::BadPixel => Box::new(BadPixel::new()),
                    AlgoId::BlackLevel => Box::new(BlackLevel::new()),
                    AlgoId::SimpleAwb => Box::new(SimpleAwb::new(bypass)),
                    AlgoId::SimpleAec => Box::new(SimpleAec::new(bypass)),
                    AlgoId::Aec => Box::new(Aec::new()),
                    AlgoId::Awb => Box::new(Awb::new()),
                    AlgoId::SimpleAwbCct => Box::new(SimpleAwbCct::new(bypass)),
                }
            })
            .collect();
        Self {
            algorithms,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Initialise every algorithm in order. Stops at the first failure.
    pub fn init(&mut self, port: &mut dyn IspPort, iq: &mut IqParams) -> Result<(), AlgoError> {
        // The sensor helpers are mandatory even if no enabled algorithm
        // touches them yet.
        port.sensor_info()?;
        port.sensor_gain()?;
        port.sensor_exposure()?;

        self.diagnostics = Diagnostics::default();
        let mut ctx = AlgoContext {
            port,
            iq,
            diagnostics: &mut self.diagnostics,
        };
        for algo in self.algorithms.iter_mut() {
            if let Err(e) = algo.init(&mut ctx) {
                tracing::error!(algo = %algo.id(), error = %e, "init failed");
                return Err(e);
            }
            tracing::debug!(algo = %algo.id(), "initialised");
        }
        tracing::info!(algorithms = self.algorithms.len(), "3a registry initialised");
        Ok(())
    }

    /// Run one frame tick. Stops at the first failure; hardware writes made
    /// earlier in the tick stay in place.
    pub fn process(&mut self, port: &mut dyn IspPort, iq: &mut IqParams) -> Result<(), AlgoError> {
        let mut ctx = AlgoContext {
            port,
            iq,
            diagnostics: &mut self.diagnostics,
        };
        for algo in self.algorithms.iter_mut() {
            let before = algo.state();
            if let Err(e) = algo.process(&mut ctx) {
                tracing::warn!(
                    algo = %algo.id(),
                    error = %e,
                    recoverable = e.is_recoverable(),
                    "process failed; tick aborted"
                );
                return Err(e);
            }
            let after = algo.state();
            if before != after {
                tracing::trace!(algo = %algo.id(), ?before, ?after, "state change");
            }
        }
        Ok(())
    }

    pub fn deinit(&mut self, port: &mut dyn IspPort, iq: &mut IqParams) -> Result<(), AlgoError> {
        let mut ctx = AlgoContext {
            port,
            iq,
            diagnostics: &mut self.diagnostics,
        };
        for algo in self.algorithms.iter_mut() {
            algo.deinit(&mut ctx)?;
        }
        tracing::info!("3a registry de-initialised");
        Ok(())
    }

    pub fn states(&self) -> Vec<(AlgoId, AlgoState)> {
        self.algorithms.iter().map(|a| (a.id(), a.state())).collect()
    }

    pub fn state(&self, id: AlgoId) -> Option<AlgoState> {
        self.algorithms.iter().find(|a| a.id() == id).map(|a| a.state())
    }

    /// Index of the AWB profile applied last, 0 before the first one.
    pub fn awb_profile_index(&self) -> usize {
        self.diagnostics.awb_profile
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Change the AEC luminance target; picked up on the next AEC step.
    pub fn set_exposure_target(&self, iq: &mut IqParams, target: u32) -> Result<(), AlgoError> {
        if target > EXPOSURE_TARGET_MAX {
            return Err(AlgoError::InvalidArgument(format!(
                "exposure target {target} above {EXPOSURE_TARGET_MAX}"
            )));
        }
        tracing::info!(from = iq.aec.exposure_target, to = target, "exposure target changed");
        iq.aec.exposure_target = target;
        Ok(())
    }

    /// Ask AWB to rebuild its profiles from `iq` on the next tick.
    pub fn request_awb_reconfigure(&self, iq: &mut IqParams) {
        iq.awb.reconfigure = true;
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isp3a_hw::{SensorInfo, SimulatedIsp};

    fn setup() -> (SimulatedIsp, IqParams) {
        let isp = SimulatedIsp::new(
            SensorInfo {
                name: "test".into(),
                exposure_min: 100,
                exposure_max: 10_000,
                gain_min: 0,
                gain_max: 24_000,
                vsync_latency: 3,
            },
        );
        (isp, IqParams::builtin("imx335").unwrap())
    }

    #[test]
    fn test_fixed_order() {
        let reg = AlgorithmRegistry::default();
        let ids: Vec<AlgoId> = reg.states().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, AlgoId::ORDER.to_vec());
        assert!(reg.states().iter().all(|(_, s)| *s == AlgoState::Uninitialized));
    }

    #[test]
    fn test_init_moves_everything_to_init() {
        let (mut isp, mut iq) = setup();
        let mut reg = AlgorithmRegistry::default();
        reg.init(&mut isp, &mut iq).unwrap();
        assert!(reg.states().iter().all(|(_, s)| *s == AlgoState::Init));
        assert_eq!(reg.awb_profile_index(), 0);
    }

    #[test]
    fn test_unwired_helper_is_fatal() {
        let (mut isp, mut iq) = setup();
        isp.faults.sensor_helpers = false;
        let mut reg = AlgorithmRegistry::default();
        let err = reg.init(&mut isp, &mut iq).unwrap_err();
        assert_eq!(err, AlgoError::HelperNotImplemented("sensor_info"));
        assert!(!err.is_recoverable());
        assert!(reg.states().iter().all(|(_, s)| *s == AlgoState::Uninitialized));
    }

    #[test]
    fn test_bypassed_simple_algorithms_stay_idle() {
        let (mut isp, mut iq) = setup();
        let mut reg = AlgorithmRegistry::default();
        reg.init(&mut isp, &mut iq).unwrap();
        for _ in 0..5 {
            isp.advance_frame();
            reg.process(&mut isp, &mut iq).unwrap();
        }
        for id in [AlgoId::SimpleAwb, AlgoId::SimpleAec, AlgoId::SimpleAwbCct] {
            assert_eq!(reg.state(id), Some(AlgoState::Init), "{id}");
        }
        assert_eq!(reg.state(AlgoId::Aec), Some(AlgoState::WaitingStat));
    }

    #[test]
    fn test_exposure_target_validated() {
        let (_, mut iq) = setup();
        let reg = AlgorithmRegistry::default();
        reg.set_exposure_target(&mut iq, 80).unwrap();
        assert_eq!(iq.aec.exposure_target, 80);
        assert!(matches!(
            reg.set_exposure_target(&mut iq, 300),
            Err(AlgoError::InvalidArgument(_))
        ));
        assert_eq!(iq.aec.exposure_target, 80);
    }

    #[test]
    fn test_failure_aborts_rest_of_tick() {
        let (mut isp, mut iq) = setup();
        let mut reg = AlgorithmRegistry::default();
        reg.init(&mut isp, &mut iq).unwrap();

        // Black level reads the sensor gain and fails before AEC runs.
        isp.faults.fail_reads = true;
        isp.advance_frame();
        let err = reg.process(&mut isp, &mut iq).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(reg.state(AlgoId::Aec), Some(AlgoState::Init));

        isp.faults.fail_reads = false;
        isp.advance_frame();
        reg.process(&mut isp, &mut iq).unwrap();
        assert_eq!(reg.state(AlgoId::Aec), Some(AlgoState::WaitingStat));
    }

    #[test]
    fn test_deinit_resets_states() {
        let (mut isp, mut iq) = setup();
        let mut reg = AlgorithmRegistry::default();
        reg.init(&mut isp, &mut iq).unwrap();
        reg.process(&mut isp, &mut iq).unwrap();
        reg.deinit(&mut isp, &mut iq).unwrap();
        assert!(reg.states().iter().all(|(_, s)| *s == AlgoState::Uninitialized));
    }
}
