use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Mp4,
    WebM,
    Mkv,
    Gif,
}

impl OutputFormat {
    /// File extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::WebM => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Gif => "gif",
        }
    }
}

/// Target resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPreset {
    /// Keep source resolution, no scale filter
    Original,
    /// 4K (3840 wide, height follows aspect)
    R2160p,
    R1080p,
    R720p,
    R480p,
    /// 1080x1080 center-cropped square
    Square1080,
    /// Explicit width/height from `custom_width`/`custom_height`
    Custom,
}

/// Where output files are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Next to the source file
    SameAsSource,
    /// Into a fixed directory
    Custom(PathBuf),
}

/// One immutable snapshot of the user-facing compression settings.
///
/// The orchestrator clones a snapshot per job at admission time, so settings
/// edits never affect an encode that is already running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub format: OutputFormat,
    pub resolution: ResolutionPreset,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub lock_aspect_ratio: bool,
    /// 1 (best quality) .. 10 (smallest file); mapped to codec CRF scales
    pub compression_level: u8,
    pub remove_audio: bool,
    /// Stabilize shaky footage with the deshake filter
    pub enable_deshake: bool,
    /// Overlay watermark text in the bottom-right corner
    pub enable_watermark: bool,
    /// Watermark text; `None` falls back to the application name
    pub watermark_text: Option<String>,
    /// Save a single-frame thumbnail next to each successful output
    pub enable_thumbnail: bool,
    /// Move the original into a recoverable trash dir after a successful encode
    pub move_to_trash: bool,
    /// Perceptual tuning (SVT-AV1 tune=0)
    pub subjective_tune: bool,
    /// Force 10-bit output with HDR signaling
    pub enable_hdr: bool,
    /// Strip all container metadata
    pub clean_metadata: bool,
    /// Bias speed over quality, allow hardware encoders and tiling
    pub enable_turbo: bool,
    /// Max concurrently running encodes, >= 1
    pub parallel_limit: usize,
    pub output_mode: OutputMode,
    /// true = AV1 family, false = VP9 (safe, royalty-free, plays everywhere)
    pub use_high_efficiency_codec: bool,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp4,
            resolution: ResolutionPreset::Original,
            custom_width: None,
            custom_height: None,
            lock_aspect_ratio: true,
            compression_level: 6,
            remove_audio: false,
            enable_deshake: false,
            enable_watermark: false,
            watermark_text: None,
            enable_thumbnail: false,
            move_to_trash: false,
            subjective_tune: true,
            enable_hdr: false,
            clean_metadata: false,
            enable_turbo: false,
            parallel_limit: 2,
            output_mode: OutputMode::SameAsSource,
            use_high_efficiency_codec: false,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
        }
    }
}

impl Settings {
    /// Load settings from a file, or return defaults if path is None or the
    /// file doesn't exist. JSON unless the extension is `.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    settings = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    settings = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(settings)
    }

    /// Compression level clamped to the documented 1..=10 range.
    ///
    /// The planner itself treats out-of-range levels as a caller contract
    /// violation; every call site goes through this first.
    pub fn clamped_level(&self) -> u8 {
        self.compression_level.clamp(1, 10)
    }

    /// Derive the output path for a source file under these settings.
    /// `<dir>/<stem>_compressed[_<preset>].<ext>`
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");

        let suffix = match self.resolution {
            ResolutionPreset::Original => String::new(),
            ResolutionPreset::R2160p => "_2160p".to_string(),
            ResolutionPreset::R1080p => "_1080p".to_string(),
            ResolutionPreset::R720p => "_720p".to_string(),
            ResolutionPreset::R480p => "_480p".to_string(),
            ResolutionPreset::Square1080 => "_square".to_string(),
            ResolutionPreset::Custom => "_custom".to_string(),
        };

        let file_name = format!("{}_compressed{}.{}", stem, suffix, self.format.extension());

        let dir = match &self.output_mode {
            OutputMode::Custom(dir) => dir.clone(),
            OutputMode::SameAsSource => source
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default(),
        };

        dir.join(file_name)
    }
}

/// Partial settings update, applied field-by-field onto a `Settings`.
///
/// Mirrors the UI's `updateSettings(partial)` command: only fields that are
/// `Some` are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub format: Option<OutputFormat>,
    pub resolution: Option<ResolutionPreset>,
    pub custom_width: Option<Option<u32>>,
    pub custom_height: Option<Option<u32>>,
    pub lock_aspect_ratio: Option<bool>,
    pub compression_level: Option<u8>,
    pub remove_audio: Option<bool>,
    pub enable_deshake: Option<bool>,
    pub enable_watermark: Option<bool>,
    pub watermark_text: Option<Option<String>>,
    pub enable_thumbnail: Option<bool>,
    pub move_to_trash: Option<bool>,
    pub subjective_tune: Option<bool>,
    pub enable_hdr: Option<bool>,
    pub clean_metadata: Option<bool>,
    pub enable_turbo: Option<bool>,
    pub parallel_limit: Option<usize>,
    pub output_mode: Option<OutputMode>,
    pub use_high_efficiency_codec: Option<bool>,
}

impl SettingsPatch {
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(v) = self.format {
            settings.format = v;
        }
        if let Some(v) = self.resolution {
            settings.resolution = v;
        }
        if let Some(v) = self.custom_width {
            settings.custom_width = v;
        }
        if let Some(v) = self.custom_height {
            settings.custom_height = v;
        }
        if let Some(v) = self.lock_aspect_ratio {
            settings.lock_aspect_ratio = v;
        }
        if let Some(v) = self.compression_level {
            settings.compression_level = v;
        }
        if let Some(v) = self.remove_audio {
            settings.remove_audio = v;
        }
        if let Some(v) = self.enable_deshake {
            settings.enable_deshake = v;
        }
        if let Some(v) = self.enable_watermark {
            settings.enable_watermark = v;
        }
        if let Some(v) = &self.watermark_text {
            settings.watermark_text = v.clone();
        }
        if let Some(v) = self.enable_thumbnail {
            settings.enable_thumbnail = v;
        }
        if let Some(v) = self.move_to_trash {
            settings.move_to_trash = v;
        }
        if let Some(v) = self.subjective_tune {
            settings.subjective_tune = v;
        }
        if let Some(v) = self.enable_hdr {
            settings.enable_hdr = v;
        }
        if let Some(v) = self.clean_metadata {
            settings.clean_metadata = v;
        }
        if let Some(v) = self.enable_turbo {
            settings.enable_turbo = v;
        }
        if let Some(v) = self.parallel_limit {
            settings.parallel_limit = v.max(1);
        }
        if let Some(v) = &self.output_mode {
            settings.output_mode = v.clone();
        }
        if let Some(v) = self.use_high_efficiency_codec {
            settings.use_high_efficiency_codec = v;
        }
    }
}
