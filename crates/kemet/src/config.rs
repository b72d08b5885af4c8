use std::path::PathBuf;
use std::time::Duration;

/// SCRFD face detector model file name inside the model directory.
const FACE_DETECTOR_MODEL: &str = "det_10g.onnx";
/// Face-mesh model file name inside the model directory.
const FACE_MESH_MODEL: &str = "face_landmark.onnx";

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture width; the driver may pick the nearest mode.
    pub camera_width: u32,
    pub camera_height: u32,
    /// ALSA capture device recorded alongside the video. Unset: silent recordings.
    pub audio_device: Option<String>,
    /// Directory containing the face detector and face-mesh ONNX models.
    pub model_dir: PathBuf,
    /// Attempts to load the model before giving up on overlays.
    pub model_retries: u32,
    pub model_retry_interval: Duration,
    /// Compositor ticks per second.
    pub refresh_hz: u32,
    /// Where snapshots, recordings and transmutations are written.
    pub export_dir: PathBuf,
    /// ffmpeg executable used for recording.
    pub ffmpeg: PathBuf,
    /// Gemini API key for `transmute`.
    pub gemini_api_key: Option<String>,
}

impl Config {
    /// Load configuration from `KEMET_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());

        let model_dir = std::env::var("KEMET_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(&home).join(".local/share"))
                    .join("kemet/models")
            });

        let export_dir = std::env::var("KEMET_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&home).join("Pictures/kemet"));

        Self {
            camera_device: std::env::var("KEMET_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_u32("KEMET_CAMERA_WIDTH", 1280),
            camera_height: env_u32("KEMET_CAMERA_HEIGHT", 720),
            audio_device: env_nonempty("KEMET_AUDIO_DEVICE"),
            model_dir,
            model_retries: env_u32("KEMET_MODEL_RETRIES", 20),
            model_retry_interval: Duration::from_millis(500),
            refresh_hz: env_u32("KEMET_REFRESH_HZ", 60).clamp(1, 240),
            export_dir,
            ffmpeg: std::env::var("KEMET_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            gemini_api_key: env_nonempty("GEMINI_API_KEY"),
        }
    }

    /// Path to the face detector model.
    pub fn face_detector_model_path(&self) -> String {
        self.model_dir
            .join(FACE_DETECTOR_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face-mesh model.
    pub fn face_mesh_model_path(&self) -> String {
        self.model_dir
            .join(FACE_MESH_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.refresh_hz.max(1)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_interval() {
        let mut config = Config::from_env();
        config.refresh_hz = 60;
        assert_eq!(config.tick_interval(), Duration::from_nanos(16_666_666));
        config.refresh_hz = 0;
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_model_path_in_model_dir() {
        let mut config = Config::from_env();
        config.model_dir = PathBuf::from("/opt/kemet/models");
        assert_eq!(config.face_detector_model_path(), "/opt/kemet/models/det_10g.onnx");
        assert_eq!(config.face_mesh_model_path(), "/opt/kemet/models/face_landmark.onnx");
    }
}
