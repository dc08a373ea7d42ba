//! sightcued - directional audio cue daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured source
//! 2. Admits at most one frame at a time into the detection pipeline
//! 3. Runs the local detector, optionally augmented by a remote service
//! 4. Speaks "label zone" cues for new, confident, allow-listed objects
//! 5. Logs pipeline health every few seconds

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use sightcue::config::{DetectorKind, SightcueConfig};
use sightcue::pipeline::{CycleSettings, DetectionCycle, Pipeline};
use sightcue::{
    BoundingBox, CommandSink, Detection, DetectorBackend, FrameSource, LogSink, NotificationSink,
    QueuedSink, SourceConfig, StubBackend,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Speak directional cues for objects seen by a camera"
)]
struct Args {
    /// Comma-separated labels to announce (empty announces everything).
    #[arg(long)]
    allow: Option<String>,

    /// Stop after this many seconds (runs until Ctrl-C when omitted).
    #[arg(long)]
    seconds: Option<u64>,

    /// Override the source frame rate.
    #[arg(long)]
    fps: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = SightcueConfig::load()?;
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(anyhow!("--fps must be greater than zero"));
        }
        cfg.source.target_fps = fps;
    }

    let detector = build_detector(&cfg)?;
    log::info!(
        "detector backend={} input={}x{}",
        detector.name(),
        detector.input_size(),
        detector.input_size()
    );

    let sink: Arc<dyn NotificationSink> = match cfg.notify.tts_command.as_deref() {
        Some(command) => Arc::new(QueuedSink::spawn(CommandSink::from_command_line(command)?)?),
        None => Arc::new(QueuedSink::spawn(LogSink)?),
    };

    let settings = CycleSettings {
        min_confidence: cfg.detector.min_confidence,
        maintain_aspect: cfg.detector.maintain_aspect,
        ttl: cfg.notify.ttl,
    };
    let mut cycle = DetectionCycle::new(detector, sink, settings).with_allow_list(cfg.allow_list());
    if cfg.remote.enabled {
        cycle = attach_remote(cycle, &cfg)?;
    }

    let pipeline = Pipeline::spawn(cycle)?;
    if let Some(allow) = args.allow.as_deref() {
        pipeline.set_allow_list(allow)?;
    }

    let mut source = FrameSource::new(SourceConfig {
        url: cfg.source.url.clone(),
        target_fps: cfg.source.target_fps,
        width: cfg.source.width,
        height: cfg.source.height,
        rotation: cfg.source.rotation,
        pixel_format: cfg.source.pixel_format,
    })?;
    source.connect()?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let frame_interval = Duration::from_secs(1) / cfg.source.target_fps;
    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_health_log = Instant::now();

    log::info!(
        "sightcued running. source={} fps={} rotation={} remote={}",
        cfg.source.url,
        cfg.source.target_fps,
        cfg.source.rotation,
        cfg.remote.enabled
    );

    loop {
        if shutdown_rx.try_recv().is_ok() {
            log::info!("shutdown signal received, stopping pipeline...");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run time elapsed, stopping pipeline...");
            break;
        }

        let tick = Instant::now();
        let frame = source.next_frame()?;
        if let Err(e) = pipeline.on_frame(&frame.capture(), &mut source) {
            log::warn!("frame {} rejected: {:#}", frame.seq, e);
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = pipeline.stats();
            let source_stats = source.stats();
            log::info!(
                "source health={} url={} frames={} admitted={} dropped={} cycles={} errors={} cues={}",
                source.is_healthy(),
                source_stats.url,
                stats.frames_seen,
                stats.admitted,
                stats.dropped,
                stats.cycles_completed,
                stats.cycle_errors,
                stats.notifications
            );
            last_health_log = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    pipeline.shutdown()?;
    Ok(())
}

fn build_detector(cfg: &SightcueConfig) -> Result<Box<dyn DetectorBackend>> {
    match cfg.detector.backend {
        DetectorKind::Stub => {
            let side = cfg.detector.input_size as f32;
            // A fixed scene so the daemon produces cues without a model.
            let scripted = vec![
                Detection::in_model_input(
                    "0",
                    "bottle",
                    0.82,
                    BoundingBox::new(side * 0.05, side * 0.1, side * 0.2, side * 0.4),
                ),
                Detection::in_model_input(
                    "1",
                    "door",
                    0.91,
                    BoundingBox::new(side * 0.7, 0.0, side * 0.95, side * 0.9),
                ),
            ];
            Ok(Box::new(
                StubBackend::new(cfg.detector.input_size).with_detections(scripted),
            ))
        }
        DetectorKind::Tract => build_tract(cfg),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(cfg: &SightcueConfig) -> Result<Box<dyn DetectorBackend>> {
    let model_path = cfg
        .detector
        .model_path
        .as_deref()
        .ok_or_else(|| anyhow!("tract detector requires model_path"))?;
    let labels_path = cfg
        .detector
        .labels_path
        .as_deref()
        .ok_or_else(|| anyhow!("tract detector requires labels_path"))?;
    Ok(Box::new(sightcue::detect::TractBackend::new(
        model_path,
        labels_path,
        cfg.detector.input_size,
        cfg.detector.quantized,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_cfg: &SightcueConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "tract detector requested but sightcued was built without the backend-tract feature"
    ))
}

#[cfg(feature = "remote-http")]
fn attach_remote(cycle: DetectionCycle, cfg: &SightcueConfig) -> Result<DetectionCycle> {
    use sightcue::remote::{EndpointProbe, HttpVisionService};

    let endpoint = cfg
        .remote
        .endpoint
        .as_deref()
        .ok_or_else(|| anyhow!("remote analysis enabled but no endpoint configured"))?;
    let service = HttpVisionService::new(endpoint, &cfg.remote.api_key, cfg.remote.timeout)?;
    let probe = EndpointProbe::new(endpoint, Duration::from_secs(1), cfg.remote.interval)?;
    log::info!(
        "remote analysis via {} every >{}s",
        service.endpoint(),
        cfg.remote.interval.as_secs()
    );
    Ok(cycle.with_remote(Arc::new(service), Arc::new(probe), cfg.remote.interval))
}

#[cfg(not(feature = "remote-http"))]
fn attach_remote(cycle: DetectionCycle, _cfg: &SightcueConfig) -> Result<DetectionCycle> {
    log::warn!("remote analysis configured but sightcued was built without remote-http");
    Ok(cycle)
}
