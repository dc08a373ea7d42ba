use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::{
    TtlPolicy, DEFAULT_TTL_BASE, DEFAULT_TTL_MAX_MULTIPLIER, DEFAULT_TTL_MIN_MULTIPLIER,
};
use crate::fusion::{AllowList, DEFAULT_MIN_CONFIDENCE};
use crate::ingest::PixelFormat;
use crate::remote::DEFAULT_REMOTE_INTERVAL;

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_INPUT_SIZE: u32 = 300;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct SightcueConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    remote: Option<RemoteConfigFile>,
    notify: Option<NotifyConfigFile>,
    allow_list: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    rotation: Option<i32>,
    pixel_format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    maintain_aspect: Option<bool>,
    quantized: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RemoteConfigFile {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key: Option<String>,
    interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    tts_command: Option<String>,
    ttl_base_ms: Option<u64>,
    ttl_min: Option<u32>,
    ttl_max: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SightcueConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub remote: RemoteSettings,
    pub notify: NotifySettings,
    pub allow_list: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Clockwise degrees from sensor orientation to display orientation.
    pub rotation: i32,
    pub pixel_format: PixelFormat,
}

fn parse_pixel_format(value: &str) -> Result<PixelFormat> {
    match value.trim().to_lowercase().as_str() {
        "rgb24" | "rgb" => Ok(PixelFormat::Rgb24),
        "nv12" => Ok(PixelFormat::Nv12),
        other => Err(anyhow!(
            "unknown source pixel_format '{}'; expected rgb24 or nv12",
            other
        )),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl DetectorKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub min_confidence: f32,
    pub maintain_aspect: bool,
    pub quantized: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: String,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub tts_command: Option<String>,
    pub ttl: TtlPolicy,
}

impl SightcueConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGHTCUE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The configured allow-list in matcher form.
    pub fn allow_list(&self) -> AllowList {
        AllowList::from_csv(&self.allow_list.join(","))
    }

    fn from_file(file: SightcueConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            rotation: source_file.rotation.unwrap_or(0),
            pixel_format: match source_file.pixel_format.as_deref() {
                Some(format) => parse_pixel_format(format)?,
                None => PixelFormat::Rgb24,
            },
        };

        let detector_file = file.detector.unwrap_or_default();
        let backend = match detector_file.backend.as_deref() {
            Some(name) => DetectorKind::parse(name)?,
            None => DetectorKind::Stub,
        };
        let detector = DetectorSettings {
            backend,
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            maintain_aspect: detector_file.maintain_aspect.unwrap_or(false),
            quantized: detector_file.quantized.unwrap_or(true),
        };

        let remote_file = file.remote.unwrap_or_default();
        let remote = RemoteSettings {
            enabled: remote_file.enabled.unwrap_or(false),
            endpoint: remote_file.endpoint,
            api_key: remote_file.api_key.unwrap_or_default(),
            interval: remote_file
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REMOTE_INTERVAL),
            timeout: Duration::from_secs(
                remote_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
            ),
        };

        let notify_file = file.notify.unwrap_or_default();
        let notify = NotifySettings {
            tts_command: notify_file.tts_command.filter(|cmd| !cmd.trim().is_empty()),
            ttl: TtlPolicy {
                base: notify_file
                    .ttl_base_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_TTL_BASE),
                min_multiplier: notify_file.ttl_min.unwrap_or(DEFAULT_TTL_MIN_MULTIPLIER),
                max_multiplier: notify_file.ttl_max.unwrap_or(DEFAULT_TTL_MAX_MULTIPLIER),
            },
        };

        let allow_list = file
            .allow_list
            .as_deref()
            .map(split_csv)
            .unwrap_or_default();

        Ok(Self {
            source,
            detector,
            remote,
            notify,
            allow_list,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SIGHTCUE_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(endpoint) = std::env::var("SIGHTCUE_REMOTE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.remote.endpoint = Some(endpoint);
                self.remote.enabled = true;
            }
        }
        if let Ok(key) = std::env::var("SIGHTCUE_REMOTE_KEY") {
            if !key.trim().is_empty() {
                self.remote.api_key = key;
            }
        }
        if let Ok(labels) = std::env::var("SIGHTCUE_ALLOW_LIST") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.allow_list = parsed;
            }
        }
        if let Ok(confidence) = std::env::var("SIGHTCUE_MIN_CONFIDENCE") {
            self.detector.min_confidence = confidence.trim().parse().map_err(|_| {
                anyhow!("SIGHTCUE_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(command) = std::env::var("SIGHTCUE_TTS_COMMAND") {
            if !command.trim().is_empty() {
                self.notify.tts_command = Some(command);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within 0..=1, got {}",
                self.detector.min_confidence
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.rotation % 90 != 0 {
            return Err(anyhow!(
                "source rotation must be a multiple of 90 degrees, got {}",
                self.source.rotation
            ));
        }
        self.source.rotation = self.source.rotation.rem_euclid(360);

        let ttl = &self.notify.ttl;
        if ttl.min_multiplier == 0 || ttl.min_multiplier > ttl.max_multiplier {
            return Err(anyhow!(
                "notify ttl_min must be in 1..=ttl_max (got {}..={})",
                ttl.min_multiplier,
                ttl.max_multiplier
            ));
        }
        if ttl.base.is_zero() {
            return Err(anyhow!("notify ttl_base_ms must be greater than zero"));
        }

        if self.detector.backend == DetectorKind::Tract
            && (self.detector.model_path.is_none() || self.detector.labels_path.is_none())
        {
            return Err(anyhow!(
                "tract detector requires both model_path and labels_path"
            ));
        }

        if self.remote.enabled {
            let endpoint = self.remote.endpoint.as_deref().unwrap_or("").trim();
            if endpoint.is_empty() {
                return Err(anyhow!("remote analysis enabled but no endpoint configured"));
            }
        }
        self.allow_list = self
            .allow_list
            .iter()
            .map(|label| label.to_lowercase())
            .collect();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SightcueConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
