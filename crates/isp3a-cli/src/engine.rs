use isp3a_core::{AlgoError, AlgoId, AlgoState, AlgorithmRegistry, IqParams, RegistryOptions};
use isp3a_hw::sensors::lookup_sensor;
use isp3a_hw::{SimulatedIsp, StatLocation};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("3a error: {0}")]
    Algo(#[from] AlgoError),
    #[error("unknown sensor: {0}")]
    UnknownSensor(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Everything the engine starts with.
pub struct EngineSetup {
    pub sensor: String,
    pub iq: IqParams,
    pub options: RegistryOptions,
    pub scene_lux: f32,
    pub scene_cct: f32,
    pub frame_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlgoStatus {
    pub algo: AlgoId,
    pub state: AlgoState,
}

/// Snapshot of the simulated device and the control loops.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub frame: u64,
    pub sensor: String,
    pub exposure_us: u32,
    pub gain_mdb: u32,
    pub luminance: u8,
    pub exposure_target: u32,
    pub isp_gain: [f32; 3],
    pub awb_profile: usize,
    pub awb_temperature: u32,
    /// Ticks aborted by a recoverable error since start.
    pub failed_ticks: u64,
    pub algorithms: Vec<AlgoStatus>,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Tick {
        frames: u32,
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
    SetExposureTarget {
        target: u32,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetScene {
        lux: Option<f32>,
        cct: Option<f32>,
        reply: oneshot::Sender<()>,
    },
    Reconfigure {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Advance `frames` vsyncs, running the scheduler after each.
    pub async fn tick(&self, frames: u32) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Tick { frames, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn set_exposure_target(&self, target: u32) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::SetExposureTarget { target, reply })
            .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Change what the simulated sensor sees. `None` keeps the current value.
    pub async fn set_scene(&self, lux: Option<f32>, cct: Option<f32>) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::SetScene { lux, cct, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Make AWB rebuild its profiles on the next tick.
    pub async fn reconfigure(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Reconfigure { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

struct Engine {
    registry: AlgorithmRegistry,
    isp: SimulatedIsp,
    iq: IqParams,
    frame_interval: Duration,
    failed_ticks: u64,
}

impl Engine {
    fn tick(&mut self, frames: u32) -> Result<EngineStatus, EngineError> {
        for _ in 0..frames {
            let delivered = self.isp.advance_frame();
            if let Err(e) = self.registry.process(&mut self.isp, &mut self.iq) {
                if !e.is_recoverable() {
                    return Err(e.into());
                }
                // Partial writes stay; the next tick starts over.
                self.failed_ticks += 1;
            }
            tracing::trace!(frame = self.isp.frame(), delivered, "tick");
            if !self.frame_interval.is_zero() {
                std::thread::sleep(self.frame_interval);
            }
        }
        Ok(self.status())
    }

    fn status(&self) -> EngineStatus {
        let diag = self.registry.diagnostics();
        let gain = self.isp.isp_gain;
        EngineStatus {
            frame: self.isp.frame(),
            sensor: self.isp.sensor.name.clone(),
            exposure_us: self.isp.sensor_exposure,
            gain_mdb: self.isp.sensor_gain,
            luminance: self.isp.sample(StatLocation::Up).l,
            exposure_target: self.iq.aec.exposure_target,
            isp_gain: [gain.r, gain.g, gain.b],
            awb_profile: diag.awb_profile,
            awb_temperature: diag.awb_temperature,
            failed_ticks: self.failed_ticks,
            algorithms: self
                .registry
                .states()
                .into_iter()
                .map(|(algo, state)| AlgoStatus { algo, state })
                .collect(),
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Tick { frames, reply } => {
                let _ = reply.send(self.tick(frames));
            }
            EngineRequest::SetExposureTarget { target, reply } => {
                let result = self
                    .registry
                    .set_exposure_target(&mut self.iq, target)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::SetScene { lux, cct, reply } => {
                if let Some(lux) = lux {
                    self.isp.scene.brightness = lux;
                }
                if let Some(cct) = cct {
                    self.isp.scene.cct = cct;
                }
                tracing::info!(
                    brightness = self.isp.scene.brightness,
                    cct = self.isp.scene.cct,
                    "scene changed"
                );
                let _ = reply.send(());
            }
            EngineRequest::Reconfigure { reply } => {
                self.registry.request_awb_reconfigure(&mut self.iq);
                tracing::info!("awb reconfiguration requested");
                let _ = reply.send(());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Builds the simulated sensor and initialises the registry before the
/// thread starts, so an unknown sensor or a broken tuning fails here.
pub fn spawn_engine(setup: EngineSetup) -> Result<EngineHandle, EngineError> {
    let entry =
        lookup_sensor(&setup.sensor).ok_or_else(|| EngineError::UnknownSensor(setup.sensor.clone()))?;
    let mut isp = SimulatedIsp::from_entry(entry);
    isp.scene.brightness = setup.scene_lux;
    isp.scene.cct = setup.scene_cct;
    tracing::info!(
        sensor = %entry.name,
        vsync_latency = entry.vsync_latency,
        brightness = setup.scene_lux,
        cct = setup.scene_cct,
        "simulated sensor ready"
    );

    let mut iq = setup.iq;
    let mut registry = AlgorithmRegistry::new(setup.options);
    registry.init(&mut isp, &mut iq)?;

    let mut engine = Engine {
        registry,
        isp,
        iq,
        frame_interval: setup.frame_interval,
        failed_ticks: 0,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("isp3a-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            if let Err(e) = engine.registry.deinit(&mut engine.isp, &mut engine.iq) {
                tracing::warn!(error = %e, "deinit failed");
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
