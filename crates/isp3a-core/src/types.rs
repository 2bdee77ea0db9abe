use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of each algorithm, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgoId {
    BadPixel,
    BlackLevel,
    SimpleAwb,
    SimpleAec,
    Aec,
    Awb,
    SimpleAwbCct,
}

impl AlgoId {
    /// Fixed processing order. Later algorithms see the hardware state the
    /// earlier ones wrote during the same tick.
    pub const ORDER: [AlgoId; 7] = [
        AlgoId::BadPixel,
        AlgoId::BlackLevel,
        AlgoId::SimpleAwb,
        AlgoId::SimpleAec,
        AlgoId::Aec,
        AlgoId::Awb,
        AlgoId::SimpleAwbCct,
    ];
}

impl fmt::Display for AlgoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgoId::BadPixel => "bad-pixel",
            AlgoId::BlackLevel => "black-level",
            AlgoId::SimpleAwb => "simple-awb",
            AlgoId::SimpleAec => "simple-aec",
            AlgoId::Aec => "aec",
            AlgoId::Awb => "awb",
            AlgoId::SimpleAwbCct => "simple-awb-cct",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an algorithm instance.
///
/// `NeedStat -> WaitingStat -> StatReady` repeats for as long as the
/// device runs; only the statistics delivery moves `WaitingStat` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgoState {
    Uninitialized,
    Init,
    NeedStat,
    WaitingStat,
    StatReady,
}

/// Values exposed to external callers for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Index of the AWB profile applied last (0 until the first application).
    pub awb_profile: usize,
    /// Reference temperature of that profile, 0 before the first application.
    pub awb_temperature: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_complete_and_unique() {
        for (i, a) in AlgoId::ORDER.iter().enumerate() {
            for b in &AlgoId::ORDER[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(AlgoId::ORDER[0], AlgoId::BadPixel);
        assert_eq!(AlgoId::ORDER[6], AlgoId::SimpleAwbCct);
    }

    #[test]
    fn test_diagnostics_serialization() {
        let diag = Diagnostics {
            awb_profile: 3,
            awb_temperature: 6500,
        };
        let json = serde_json::to_string(&diag).unwrap();
        let back: Diagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(diag, back);
    }
}
