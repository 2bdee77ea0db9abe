//! isp3a-core: 3A control loops for an image signal processor.
//!
//! Auto exposure, auto white balance, bad pixel and black level control,
//! scheduled once per frame over an [`isp3a_hw::IspPort`].

pub mod aec;
pub mod algo;
pub mod awb;
pub mod awb_cct;
pub mod bad_pixel;
pub mod black_level;
pub mod color;
pub mod exposure;
pub mod iq;
pub mod registry;
pub mod simple_aec;
pub mod simple_awb;
pub mod types;
pub mod white_balance;

pub use algo::{AlgoError, Algorithm, ISP_VSYNC_LATENCY};
pub use iq::{IqError, IqParams};
pub use registry::{AlgorithmRegistry, RegistryOptions};
pub use types::{AlgoId, AlgoState, Diagnostics};
