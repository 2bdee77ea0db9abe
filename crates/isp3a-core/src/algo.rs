//! The algorithm interface shared by every 3A control loop.

use crate::iq::IqParams;
use crate::types::{AlgoId, AlgoState, Diagnostics};
use isp3a_hw::{HwError, IspPort, StatKind, StatLocation, StatPoll, StatRequest, Statistics};
use thiserror::Error;

/// Frames between an ISP block write and statistics reflecting it.
pub const ISP_VSYNC_LATENCY: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("hardware access failed: {0}")]
    HardwareAccess(#[source] HwError),
    #[error("algorithm failure: {0}")]
    AlgorithmFailure(String),
    #[error("no profile for color temperature {0} K")]
    UnknownColorTemperature(u32),
    #[error("mandatory hardware helper not implemented: {0}")]
    HelperNotImplemented(&'static str),
}

impl From<HwError> for AlgoError {
    fn from(e: HwError) -> Self {
        match e {
            HwError::NotImplemented(helper) => AlgoError::HelperNotImplemented(helper),
            other => AlgoError::HardwareAccess(other),
        }
    }
}

impl AlgoError {
    /// True when the next tick can simply carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlgoError::HardwareAccess(_) | AlgoError::UnknownColorTemperature(_)
        )
    }
}

/// Everything an algorithm may touch during one call.
pub struct AlgoContext<'a> {
    pub port: &'a mut dyn IspPort,
    pub iq: &'a mut IqParams,
    pub diagnostics: &'a mut Diagnostics,
}

pub trait Algorithm {
    fn id(&self) -> AlgoId;
    fn state(&self) -> AlgoState;
    fn init(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError>;
    fn deinit(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError>;
    fn process(&mut self, ctx: &mut AlgoContext<'_>) -> Result<(), AlgoError>;
}

/// One in-flight statistics request plus the last delivered snapshot.
#[derive(Debug, Default)]
pub(crate) struct StatSlot {
    pending: Option<isp3a_hw::PendingStatistics>,
    pub snapshot: Statistics,
}

impl StatSlot {
    pub fn request(
        &mut self,
        port: &mut dyn IspPort,
        location: StatLocation,
        kind: StatKind,
        vsync_delay: u32,
    ) -> Result<(), AlgoError> {
        let pending = port.request_statistics(StatRequest {
            location,
            kind,
            vsync_delay,
        })?;
        self.pending = Some(pending);
        Ok(())
    }

    /// Move `WaitingStat` on once the hardware delivered.
    pub fn poll(&mut self, id: AlgoId, state: &mut AlgoState) {
        if *state != AlgoState::WaitingStat {
            return;
        }
        let Some(pending) = self.pending.as_mut() else {
            *state = AlgoState::NeedStat;
            return;
        };
        match pending.poll() {
            StatPoll::Ready(stats) => {
                tracing::trace!(algo = %id, ?stats, "statistics ready");
                self.snapshot = stats;
                self.pending = None;
                *state = AlgoState::StatReady;
            }
            StatPoll::Pending => {}
            StatPoll::Dropped => {
                tracing::warn!(algo = %id, "statistics request dropped by hardware; re-requesting");
                self.pending = None;
                *state = AlgoState::NeedStat;
            }
        }
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.snapshot = Statistics::default();
    }
}
