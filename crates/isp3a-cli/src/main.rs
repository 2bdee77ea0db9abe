use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use isp3a_core::awb_cct::nearest_profile;
use isp3a_core::color::estimate_cct;
use isp3a_core::white_balance::{build_profiles, decision_thresholds};
use isp3a_core::{IqParams, RegistryOptions};
use isp3a_hw::sensors::list_sensors;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{spawn_engine, EngineSetup};

/// Sensor tuning shipped with the crate, used for sensors without their own.
const FALLBACK_TUNING: &str = "imx335";

#[derive(Parser)]
#[command(name = "isp3a", about = "3A control loops over a simulated ISP")]
struct Cli {
    /// Sensor name (overrides ISP3A_SENSOR)
    #[arg(long, global = true)]
    sensor: Option<String>,
    /// IQ tuning TOML file (overrides ISP3A_IQ_FILE)
    #[arg(long, global = true)]
    iq: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loops and print JSON status lines
    Run {
        /// Number of frames to simulate
        #[arg(short, long, default_value_t = 300)]
        frames: u32,
        /// Print a status line every N frames
        #[arg(short, long, default_value_t = 30)]
        every: u32,
        /// Scene brightness (overrides ISP3A_SCENE_LUX)
        #[arg(long)]
        lux: Option<f32>,
        /// Scene color temperature in Kelvin (overrides ISP3A_SCENE_CCT)
        #[arg(long)]
        cct: Option<f32>,
        /// AEC luminance target, 0-255
        #[arg(long)]
        target: Option<u32>,
        /// Schedule the simple AWB/AEC variants instead of bypassing them
        #[arg(long)]
        simple: bool,
        /// Change the scene color temperature halfway through the run
        #[arg(long)]
        switch_cct: Option<f32>,
        /// Restart AWB from its tuning when the scene changes
        #[arg(long, requires = "switch_cct")]
        reconfigure: bool,
    },
    /// List the embedded sensors
    Sensors,
    /// Show AWB profiles and decision thresholds of a tuning
    Profiles,
    /// Estimate the color temperature of an 8-bit RGB average
    Cct { r: u8, g: u8, b: u8 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(sensor) = cli.sensor {
        config.sensor = sensor;
    }
    if let Some(iq) = cli.iq {
        config.iq_file = Some(iq);
    }

    match cli.command {
        Commands::Run {
            frames,
            every,
            lux,
            cct,
            target,
            simple,
            switch_cct,
            reconfigure,
        } => {
            if let Some(lux) = lux {
                config.scene_lux = lux;
            }
            if let Some(cct) = cct {
                config.scene_cct = cct;
            }
            if simple {
                config.bypass_simple = false;
            }
            let plan = RunPlan {
                frames,
                every: every.max(1),
                target,
                switch_cct,
                reconfigure,
            };
            run(&config, &plan).await?;
        }
        Commands::Sensors => {
            for s in list_sensors() {
                println!(
                    "{:<10} exposure {}-{} us  gain {}-{} mdB  latency {} frames",
                    s.name, s.exposure_min, s.exposure_max, s.gain_min, s.gain_max, s.vsync_latency
                );
            }
        }
        Commands::Profiles => {
            let iq = load_iq(&config)?;
            let profiles = build_profiles(&iq.awb).context("invalid AWB profile table")?;
            let thresholds = decision_thresholds(&profiles);
            for (i, p) in profiles.iter().enumerate() {
                println!(
                    "{i}  {:<6} {:>5} K  gains {:?}",
                    p.label, p.reference_temp, p.gains
                );
                if let Some(t) = thresholds.get(i) {
                    println!("   -- {t} K --");
                }
            }
        }
        Commands::Cct { r, g, b } => {
            let iq = load_iq(&config)?;
            let rgb = [f64::from(r), f64::from(g), f64::from(b)];
            let cct = estimate_cct(rgb, iq.awb_cct.correction)
                .context("no chromaticity for a black measurement")?;
            let profiles = build_profiles(&iq.awb).context("invalid AWB profile table")?;
            let temps: Vec<u32> = profiles.iter().map(|p| p.reference_temp).collect();
            match nearest_profile(cct, &temps) {
                Some(i) => println!("{cct:.0} K -> {} ({} K)", profiles[i].label, temps[i]),
                None => println!("{cct:.0} K"),
            }
        }
    }

    Ok(())
}

struct RunPlan {
    frames: u32,
    every: u32,
    target: Option<u32>,
    switch_cct: Option<f32>,
    reconfigure: bool,
}

async fn run(config: &Config, plan: &RunPlan) -> Result<()> {
    let setup = EngineSetup {
        sensor: config.sensor.clone(),
        iq: load_iq(config)?,
        options: RegistryOptions {
            bypass_simple: config.bypass_simple,
        },
        scene_lux: config.scene_lux,
        scene_cct: config.scene_cct,
        frame_interval: Duration::from_millis(config.frame_interval_ms),
    };
    let engine = spawn_engine(setup).context("failed to start engine")?;

    if let Some(target) = plan.target {
        engine.set_exposure_target(target).await?;
    }
    println!("{}", serde_json::to_string(&engine.status().await?)?);

    let switch_at = plan.switch_cct.map(|_| plan.frames / 2);
    let mut done = 0;
    while done < plan.frames {
        let mut chunk = plan.every.min(plan.frames - done);
        if let Some(at) = switch_at.filter(|&at| at > done) {
            chunk = chunk.min(at - done);
        }
        let status = engine.tick(chunk).await?;
        done += chunk;
        println!("{}", serde_json::to_string(&status)?);

        if switch_at == Some(done) {
            engine.set_scene(None, plan.switch_cct).await?;
            if plan.reconfigure {
                engine.reconfigure().await?;
            }
        }
    }
    Ok(())
}

fn load_iq(config: &Config) -> Result<IqParams> {
    if let Some(path) = &config.iq_file {
        return IqParams::from_toml_file(path)
            .with_context(|| format!("failed to load tuning {}", path.display()));
    }
    if let Some(iq) = IqParams::builtin(&config.sensor) {
        return Ok(iq);
    }
    tracing::warn!(
        sensor = %config.sensor,
        fallback = FALLBACK_TUNING,
        "no built-in tuning for sensor"
    );
    IqParams::builtin(FALLBACK_TUNING).context("built-in tuning unavailable")
}
