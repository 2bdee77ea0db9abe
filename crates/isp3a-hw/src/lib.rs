//! isp3a-hw: Hardware abstraction for the 3A control core.
//!
//! Defines the sensor/ISP port the algorithms drive, the asynchronous
//! statistics request plumbing, the embedded sensor database and a
//! simulated ISP implementing the port.

pub mod port;
pub mod sensors;
pub mod sim;
pub mod stats;

pub use port::{BlackLevel, ColorConversion, HwError, IspGain, IspPort, Pipe, SensorInfo};
pub use sim::SimulatedIsp;
pub use stats::{PendingStatistics, StatKind, StatLocation, StatPoll, StatRequest, Statistics};
