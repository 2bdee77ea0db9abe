//! Statistics snapshots and the asynchronous request plumbing.
//!
//! A request hands back a [`PendingStatistics`] that the requester polls on
//! later frames. The port side keeps the matching sender in a [`StatQueue`]
//! and fulfils it once the requested number of vsyncs has gone by.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Averaged 8-bit statistics over the hardware statistics window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Luminance.
    pub l: u8,
}

/// Where in the pipeline the statistics are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatLocation {
    /// Straight from the sensor, before any ISP gain.
    Up,
    /// After the ISP gain stage, gamma-encoded when the main pipe gamma is
    /// on. Color conversion is not applied.
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    Luminance,
    Rgb,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRequest {
    pub location: StatLocation,
    pub kind: StatKind,
    /// Frames to wait before sampling, so earlier writes are reflected.
    pub vsync_delay: u32,
}

/// Outcome of polling an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatPoll {
    Ready(Statistics),
    Pending,
    /// The port dropped the request without fulfilling it.
    Dropped,
}

/// Requester half of a statistics request.
#[derive(Debug)]
pub struct PendingStatistics {
    rx: oneshot::Receiver<Statistics>,
}

impl PendingStatistics {
    /// Build a request pair outside of a [`StatQueue`].
    pub fn channel() -> (oneshot::Sender<Statistics>, PendingStatistics) {
        let (tx, rx) = oneshot::channel();
        (tx, PendingStatistics { rx })
    }

    /// Non-blocking check for delivery.
    pub fn poll(&mut self) -> StatPoll {
        match self.rx.try_recv() {
            Ok(stats) => StatPoll::Ready(stats),
            Err(TryRecvError::Empty) => StatPoll::Pending,
            Err(TryRecvError::Closed) => StatPoll::Dropped,
        }
    }
}

struct Outstanding {
    request: StatRequest,
    frames_left: u32,
    tx: oneshot::Sender<Statistics>,
}

/// Port-side bookkeeping of outstanding requests.
#[derive(Default)]
pub struct StatQueue {
    outstanding: Vec<Outstanding>,
}

impl StatQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: StatRequest) -> PendingStatistics {
        let (tx, pending) = PendingStatistics::channel();
        self.outstanding.push(Outstanding {
            request,
            frames_left: request.vsync_delay,
            tx,
        });
        pending
    }

    /// Count one vsync. Requests whose delay elapsed are sampled with
    /// `sample` and delivered; returns how many were delivered.
    pub fn on_vsync(&mut self, mut sample: impl FnMut(&StatRequest) -> Statistics) -> usize {
        let mut delivered = 0;
        let mut still_waiting = Vec::with_capacity(self.outstanding.len());

        for mut entry in self.outstanding.drain(..) {
            entry.frames_left = entry.frames_left.saturating_sub(1);
            if entry.frames_left > 0 {
                still_waiting.push(entry);
                continue;
            }
            let stats = sample(&entry.request);
            // A requester that went away (de-init) simply misses the delivery.
            if entry.tx.send(stats).is_ok() {
                delivered += 1;
            }
        }

        self.outstanding = still_waiting;
        delivered
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Drop every outstanding request; requesters observe [`StatPoll::Dropped`].
    pub fn clear(&mut self) {
        self.outstanding.clear();
    }
}
