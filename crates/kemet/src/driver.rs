//! Render loop driver.
//!
//! Owns the camera feed, the surface and the recorder. Ticks at the refresh
//! rate, composites the newest frame and serves commands from
//! [`DriverHandle`]s between ticks.

use kemet_capture::{
    save_snapshot, CaptureError, Encoder, EncoderBackend, FinishingSession, Recorder, RecordingFormat,
};
use kemet_core::{render_tick, LandmarkProvider, OverlayVariant, Surface, TickOutcome};
use kemet_hw::{CameraError, CameraFeed, Frame};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("camera feed ended before the first frame")]
    NoFrames,
    #[error("render loop has stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// Snapshot of loop counters for `status`.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub frames: u64,
    pub overlays: u64,
    pub misses: u64,
    pub width: u32,
    pub height: u32,
    pub recording: Option<Duration>,
}

enum Command {
    Snapshot {
        reply: oneshot::Sender<Result<PathBuf, DriverError>>,
    },
    StartRecording {
        reply: oneshot::Sender<Result<RecordingFormat, DriverError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<PathBuf, DriverError>>,
    },
    RawFrame {
        reply: oneshot::Sender<Option<Frame>>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
}

/// Clone-safe handle to a running loop. The loop stops when every handle is dropped.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    overlay: Arc<watch::Sender<OverlayVariant>>,
    stop: Arc<watch::Sender<bool>>,
    state: watch::Receiver<DriverState>,
}

impl DriverHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| DriverError::Stopped)?;
        rx.await.map_err(|_| DriverError::Stopped)
    }

    /// Takes effect at the next tick.
    pub fn select(&self, variant: OverlayVariant) {
        self.overlay.send_replace(variant);
    }

    pub fn selected(&self) -> OverlayVariant {
        *self.overlay.borrow()
    }

    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Wait until the loop is running or has stopped.
    pub async fn wait_started(&self) -> DriverState {
        let mut state = self.state.clone();
        let result = match state
            .wait_for(|s| matches!(s, DriverState::Running | DriverState::Stopped))
            .await
        {
            Ok(s) => *s,
            Err(_) => DriverState::Stopped,
        };
        result
    }

    pub async fn snapshot(&self) -> Result<PathBuf, DriverError> {
        self.request(|reply| Command::Snapshot { reply }).await?
    }

    pub async fn start_recording(&self) -> Result<RecordingFormat, DriverError> {
        self.request(|reply| Command::StartRecording { reply }).await?
    }

    pub async fn stop_recording(&self) -> Result<PathBuf, DriverError> {
        self.request(|reply| Command::StopRecording { reply }).await?
    }

    /// Newest camera frame as captured (unmirrored, no overlay).
    pub async fn raw_frame(&self) -> Result<Frame, DriverError> {
        self.request(|reply| Command::RawFrame { reply })
            .await?
            .ok_or(DriverError::NoFrames)
    }

    pub async fn status(&self) -> Result<Status, DriverError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop ticking. An in-flight detection is allowed to finish but its
    /// result is discarded.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Slot the landmark provider is placed in once its model has loaded.
pub type ProviderSlot<P> = Arc<OnceCell<P>>;

pub struct RenderLoop<P, B: EncoderBackend> {
    feed: CameraFeed,
    provider: ProviderSlot<P>,
    recorder: Recorder<B>,
    export_dir: PathBuf,
    tick: Duration,
    surface: Surface,
    latest: Option<Frame>,
    status: Status,
    commands: mpsc::Receiver<Command>,
    overlay: watch::Receiver<OverlayVariant>,
    stop: watch::Receiver<bool>,
    state: watch::Sender<DriverState>,
}

impl<P, B> RenderLoop<P, B>
where
    P: LandmarkProvider + 'static,
    B: EncoderBackend + Send + 'static,
    B::Encoder: Send + 'static,
{
    /// Create a loop in the `Idle` state.
    pub fn new(
        feed: CameraFeed,
        provider: ProviderSlot<P>,
        recorder: Recorder<B>,
        export_dir: PathBuf,
        tick: Duration,
    ) -> (Self, DriverHandle) {
        let (commands_tx, commands) = mpsc::channel(8);
        let (overlay_tx, overlay) = watch::channel(OverlayVariant::None);
        let (stop_tx, stop) = watch::channel(false);
        let (state, state_rx) = watch::channel(DriverState::Idle);

        let handle = DriverHandle {
            commands: commands_tx,
            overlay: Arc::new(overlay_tx),
            stop: Arc::new(stop_tx),
            state: state_rx,
        };
        let this = Self {
            feed,
            provider,
            recorder,
            export_dir,
            tick,
            surface: Surface::new(),
            latest: None,
            status: Status::default(),
            commands,
            overlay,
            stop,
            state,
        };
        (this, handle)
    }

    /// Spawn the loop on the runtime.
    pub fn start(self) -> JoinHandle<Result<(), DriverError>> {
        tokio::spawn(self.run())
    }

    fn set_state(&self, state: DriverState) {
        tracing::info!(?state, "render loop state");
        self.state.send_replace(state);
    }

    pub async fn run(mut self) -> Result<(), DriverError> {
        self.set_state(DriverState::Starting);

        let first = tokio::select! {
            item = self.feed.recv() => item,
            _ = self.stop.changed() => {
                self.set_state(DriverState::Stopped);
                return Ok(());
            }
        };
        let result = match first {
            Some(Ok(frame)) => {
                self.latest = Some(frame);
                self.set_state(DriverState::Running);
                self.ticks().await
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "camera acquisition failed");
                Err(DriverError::Camera(e))
            }
            None => Err(DriverError::NoFrames),
        };

        self.finish_recording().await;
        self.set_state(DriverState::Stopped);
        result
    }

    async fn ticks(&mut self) -> Result<(), DriverError> {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Size the surface before serving any command
        self.render().await;
        let mut fresh = false;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => return Ok(()),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        tracing::info!("all handles dropped");
                        return Ok(());
                    }
                },
                _ = interval.tick() => {
                    loop {
                        match self.feed.try_recv() {
                            Ok(Ok(frame)) => {
                                self.latest = Some(frame);
                                fresh = true;
                            }
                            Ok(Err(e)) => {
                                tracing::error!(error = %e, "camera lost");
                                return Err(DriverError::Camera(e));
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => {
                                tracing::warn!("camera feed closed");
                                return Ok(());
                            }
                        }
                    }
                    if fresh {
                        fresh = false;
                        self.render().await;
                    }
                    self.record();
                }
            }
        }
    }

    async fn render(&mut self) {
        let Some(frame) = self.latest.clone() else {
            return;
        };
        let selected = *self.overlay.borrow_and_update();
        let stop = self.stop.clone();
        let outcome = render_tick(&frame, &mut self.surface, selected, self.provider.get(), || *stop.borrow()).await;

        self.status.frames += 1;
        self.status.width = self.surface.width();
        self.status.height = self.surface.height();
        match outcome {
            TickOutcome::Overlay { .. } => self.status.overlays += 1,
            TickOutcome::NoFace | TickOutcome::DetectFailed | TickOutcome::GeometryMissing => {
                self.status.misses += 1
            }
            _ => {}
        }
    }

    fn record(&mut self) {
        if !self.recorder.is_recording() {
            return;
        }
        let Some(rgba) = self.surface.rgba() else {
            return;
        };
        if let Err(e) = self.recorder.offer_frame(rgba, Instant::now()) {
            tracing::warn!(error = %e, "recording aborted");
        }
    }

    /// Finalize an active recording on the way out so it is not lost.
    async fn finish_recording(&mut self) {
        let Ok(pending) = self.recorder.take_session() else {
            return;
        };
        match finish_off_loop(pending).await {
            Ok(path) => tracing::info!(path = %path.display(), "recording finalized at shutdown"),
            Err(e) => tracing::warn!(error = %e, "recording lost at shutdown"),
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Snapshot { reply } => {
                let result = save_snapshot(&self.surface, &self.export_dir).map_err(DriverError::from);
                let _ = reply.send(result);
            }
            Command::StartRecording { reply } => {
                let audio = self.feed.audio_tracks().first().cloned();
                let result = self
                    .recorder
                    .start(self.surface.width(), self.surface.height(), audio.as_ref())
                    .map_err(DriverError::from);
                let _ = reply.send(result);
            }
            Command::StopRecording { reply } => match self.recorder.take_session() {
                // Flushing waits on the encoder; ticks keep running meanwhile
                Ok(pending) => {
                    tokio::spawn(async move {
                        let _ = reply.send(finish_off_loop(pending).await);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            Command::RawFrame { reply } => {
                let _ = reply.send(self.latest.clone());
            }
            Command::Status { reply } => {
                let mut status = self.status.clone();
                status.recording = self.recorder.elapsed();
                let _ = reply.send(status);
            }
        }
    }
}

/// Flush a stopped session on the blocking pool.
async fn finish_off_loop<E>(pending: FinishingSession<E>) -> Result<PathBuf, DriverError>
where
    E: Encoder + Send + 'static,
{
    tokio::task::spawn_blocking(move || pending.finish())
        .await
        .map_err(|e| CaptureError::Encoder(format!("encoder flush panicked: {e}")))?
        .map_err(DriverError::from)
}
