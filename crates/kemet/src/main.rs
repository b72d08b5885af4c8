use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kemet_capture::{format_elapsed, frame_jpeg, FfmpegBackend, Recorder};
use kemet_core::{catalog, OverlayVariant};
use kemet_hw::{spawn_feed, AudioTrack, Camera, CameraFeed};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

mod config;
mod driver;
mod provider;
mod transmute;

use config::Config;
use driver::{DriverError, DriverHandle, DriverState, ProviderSlot, RenderLoop};
use provider::{load_with_retry, spawn_landmarker, LandmarkerHandle};

/// How long one-shot commands let the camera settle before capturing.
const SETTLE: Duration = Duration::from_millis(800);

#[derive(Parser)]
#[command(name = "kemet", about = "Kemet Mirror: live Egyptian regalia overlays")]
struct Cli {
    /// V4L2 device path (overrides KEMET_CAMERA_DEVICE)
    #[arg(short, long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live mirror, controlled by commands on stdin
    Run {
        /// Overlay to start with (nemes, nefertiti, collar, makeup, anubis, none)
        #[arg(short, long, default_value = "none")]
        overlay: OverlayVariant,
    },
    /// Capture one snapshot with an overlay
    Snap {
        #[arg(short, long, default_value = "none")]
        overlay: OverlayVariant,
    },
    /// Record a clip of the composited mirror
    Record {
        #[arg(short, long, default_value = "none")]
        overlay: OverlayVariant,
        /// Clip length in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
    /// List overlays with their history
    Overlays,
    /// List generative archetypes
    Archetypes,
    /// List video capture devices
    Devices,
    /// Restyle a portrait as an archetype via the generative service
    Transmute {
        /// Archetype id (pharaoh, queen, anubis, priest, warrior)
        #[arg(short, long, default_value = "pharaoh")]
        archetype: String,
    },
}

/// A started render loop plus the background model loader.
struct Live {
    handle: DriverHandle,
    task: JoinHandle<Result<(), DriverError>>,
    provider: ProviderSlot<LandmarkerHandle>,
}

impl Live {
    fn start(config: &Config) -> Self {
        let feed = open_feed(config);

        let provider: ProviderSlot<LandmarkerHandle> = Arc::new(OnceCell::new());
        let slot = Arc::clone(&provider);
        let detector_path = config.face_detector_model_path();
        let mesh_path = config.face_mesh_model_path();
        let (retries, interval) = (config.model_retries, config.model_retry_interval);
        tokio::spawn(async move {
            let loaded = load_with_retry(
                move || spawn_landmarker(&detector_path, &mesh_path),
                retries,
                interval,
            )
            .await;
            if let Some(handle) = loaded {
                let _ = slot.set(handle);
                tracing::info!("overlays available");
            }
        });

        let recorder = Recorder::new(FfmpegBackend::new(config.ffmpeg.clone()), &config.export_dir);
        let (render_loop, handle) = RenderLoop::new(
            feed,
            Arc::clone(&provider),
            recorder,
            config.export_dir.clone(),
            config.tick_interval(),
        );
        Self {
            handle,
            task: render_loop.start(),
            provider,
        }
    }

    /// Wait for the first frame, or surface why the camera never started.
    async fn running(self) -> Result<Self> {
        if self.handle.wait_started().await == DriverState::Running {
            return Ok(self);
        }
        match self.task.await? {
            Err(e) => Err(e).context("camera failed to start"),
            Ok(()) => bail!("render loop stopped before the first frame"),
        }
    }

    /// Give the model loader a chance before a one-shot overlay capture.
    async fn wait_for_overlays(&self, config: &Config) {
        let budget = config.model_retry_interval * (config.model_retries + 1);
        let deadline = tokio::time::Instant::now() + budget;
        while self.provider.get().is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if self.provider.get().is_none() {
            tracing::warn!("face models not loaded; capturing without overlay");
        }
    }

    async fn shutdown(self) -> Result<()> {
        self.handle.stop();
        self.task.await??;
        Ok(())
    }
}

fn open_feed(config: &Config) -> CameraFeed {
    let device = config.camera_device.clone();
    let (width, height) = (config.camera_width, config.camera_height);
    let audio: Vec<AudioTrack> = config
        .audio_device
        .iter()
        .map(|device| AudioTrack { device: device.clone() })
        .collect();
    spawn_feed(
        move || {
            let camera = Camera::open(&device, width, height)?;
            tracing::info!(
                device = %device,
                width = camera.width,
                height = camera.height,
                "camera opened"
            );
            camera.into_stream(audio)
        },
        1,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(device) = cli.device {
        config.camera_device = device;
    }

    match cli.command {
        Commands::Run { overlay } => run(&config, overlay).await,
        Commands::Snap { overlay } => {
            let live = Live::start(&config).running().await?;
            live.handle.select(overlay);
            if overlay != OverlayVariant::None {
                live.wait_for_overlays(&config).await;
            }
            tokio::time::sleep(SETTLE).await;
            let path = live.handle.snapshot().await?;
            println!("{}", path.display());
            live.shutdown().await
        }
        Commands::Record { overlay, seconds } => {
            let live = Live::start(&config).running().await?;
            live.handle.select(overlay);
            if overlay != OverlayVariant::None {
                live.wait_for_overlays(&config).await;
            }
            let format = live.handle.start_recording().await?;
            println!("recording {format} for {seconds}s");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let path = live.handle.stop_recording().await?;
            println!("{}", path.display());
            live.shutdown().await
        }
        Commands::Overlays => {
            for info in catalog::overlays() {
                println!("{:<10} {:<16} [{}] {}", info.id, info.name, info.category, info.description);
                println!("           {}", info.historical_snippet);
            }
            Ok(())
        }
        Commands::Archetypes => {
            for a in catalog::archetypes() {
                println!("{:<8} {:<18} {}", a.id, a.name, a.description);
            }
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Transmute { archetype } => {
            let archetype = catalog::lookup_archetype(&archetype)
                .with_context(|| format!("unknown archetype: {archetype}"))?;
            let client = transmute::GeminiClient::new(config.gemini_api_key.clone())?;

            let live = Live::start(&config).running().await?;
            tokio::time::sleep(SETTLE).await;
            let frame = live.handle.raw_frame().await?;
            live.shutdown().await?;

            let jpeg = frame_jpeg(&frame)?;
            let result = transmute::transmute(&client, &jpeg, archetype).await?;
            let path = transmute::save_transmutation(&result, &config.export_dir)?;
            println!("{}", path.display());
            println!("{}", result.decree);
            Ok(())
        }
    }
}

/// Live mode: the loop runs until `quit`, EOF on stdin or Ctrl-C.
async fn run(config: &Config, overlay: OverlayVariant) -> Result<()> {
    let live = Live::start(config).running().await?;
    live.handle.select(overlay);
    tracing::info!(%overlay, "kemet running");
    println!("commands: overlay <id> | snap | rec | stop | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let mut words = line.split_whitespace();
        let reply = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("quit" | "exit"), _) => break,
            (Some("overlay"), Some(id)) => match id.parse::<OverlayVariant>() {
                Ok(v) => {
                    live.handle.select(v);
                    match catalog::overlay_info(v) {
                        Some(info) => format!("{}: {}", info.name, info.historical_snippet),
                        None => "overlay off".to_string(),
                    }
                }
                Err(e) => e.to_string(),
            },
            (Some("snap"), _) => match live.handle.snapshot().await {
                Ok(path) => format!("saved {}", path.display()),
                Err(e) => format!("snapshot failed: {e}"),
            },
            (Some("rec"), _) => match live.handle.start_recording().await {
                Ok(format) => format!("recording {format}"),
                Err(e) => format!("cannot record: {e}"),
            },
            (Some("stop"), _) => match live.handle.stop_recording().await {
                Ok(path) => format!("saved {}", path.display()),
                Err(e) => format!("cannot stop: {e}"),
            },
            (Some("status"), _) => match live.handle.status().await {
                Ok(s) => format!(
                    "{}x{} overlay={} frames={} overlays={} misses={}{}",
                    s.width,
                    s.height,
                    live.handle.selected(),
                    s.frames,
                    s.overlays,
                    s.misses,
                    s.recording.map(|d| format!(" {}", format_elapsed(d))).unwrap_or_default()
                ),
                Err(e) => e.to_string(),
            },
            (Some(other), _) => format!("unknown command: {other}"),
        };
        println!("{reply}");
        if live.handle.state() == DriverState::Stopped {
            break;
        }
    }

    live.shutdown().await
}
