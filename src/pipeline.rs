//! Frame admission and the detection cycle.
//!
//! The capture thread calls `Pipeline::on_frame` for every frame. At most one
//! detection cycle is in flight: an atomic IDLE/PROCESSING flag is checked and
//! set in a single `compare_exchange`, and admitted frames travel to one
//! dedicated worker over a single-slot channel. A frame that arrives while a
//! cycle is running is dropped, not queued, and the source is released
//! immediately either way.
//!
//! One cycle:
//! 1. crop the snapshot into model-input space
//! 2. run the local detector
//! 3. maybe issue a remote request (rate limited, fire-and-forget)
//! 4. fuse with whatever remote results have arrived since the last cycle
//! 5. filter by confidence and allow-list
//! 6. classify direction, gate through the dedup cache, speak
//! 7. hand the full fused list, in frame space, to the tracker

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dedup::{NotificationCache, TtlPolicy};
use crate::detect::{Detection, DetectorBackend};
use crate::direction::{classify_detection, Zone};
use crate::frame::{FrameCapture, FrameSnapshot};
use crate::fusion::{fuse, AllowList, NotificationFilter, RemoteInbox, DEFAULT_MIN_CONFIDENCE};
use crate::geometry::{crop_rgb, CoordinateSpace, Transform};
use crate::notify::{cue_text, NotificationSink, CONFIRM_VIBRATION};
use crate::remote::{Connectivity, PendingCall, RemoteAnalyzer, RemoteClient};

// ----------------------------------------------------------------------------
// Collaborator seams
// ----------------------------------------------------------------------------

/// The frame source's "you may reuse your buffer now" signal.
pub trait ImageRelease {
    fn ready_for_next_image(&mut self);
}

/// Tracking / overlay path.
///
/// `on_frame` runs on the capture thread for every frame, admitted or not.
/// `track_results` runs on the detection worker with every fused detection,
/// in frame space, regardless of notification filtering.
pub trait Tracker: Send + Sync {
    fn on_frame(&self, capture: &FrameCapture<'_>);
    fn track_results(&self, detections: &[Detection], luminance: &[u8], seq: u64);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn on_frame(&self, _capture: &FrameCapture<'_>) {}
    fn track_results(&self, _detections: &[Detection], _luminance: &[u8], _seq: u64) {}
}

// ----------------------------------------------------------------------------
// DetectionCycle
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CycleSettings {
    pub min_confidence: f32,
    pub maintain_aspect: bool,
    pub ttl: TtlPolicy,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            maintain_aspect: false,
            ttl: TtlPolicy::default(),
        }
    }
}

/// A cue that was emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub label: String,
    pub zone: Zone,
    pub text: String,
    pub ttl: Duration,
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub seq: u64,
    pub local_count: usize,
    /// Fused list in model-input space, before notification filtering.
    pub fused: Vec<Detection>,
    pub notifications: Vec<Notification>,
    /// Remote request issued by this cycle, if any.
    pub remote_call: Option<PendingCall>,
}

#[derive(Clone, Copy, Debug)]
struct FrameGeometry {
    key: (u32, u32, i32),
    frame_to_crop: Transform,
    crop_to_frame: Transform,
}

/// Everything a detection cycle owns. Lives on the detection worker.
pub struct DetectionCycle {
    detector: Box<dyn DetectorBackend>,
    remote: Option<RemoteClient>,
    inbox: RemoteInbox,
    allow_list: Arc<Mutex<AllowList>>,
    settings: CycleSettings,
    cache: NotificationCache,
    rng: StdRng,
    sink: Arc<dyn NotificationSink>,
    tracker: Arc<dyn Tracker>,
    geometry: Option<FrameGeometry>,
}

impl DetectionCycle {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        sink: Arc<dyn NotificationSink>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            detector,
            remote: None,
            inbox: RemoteInbox::new(),
            allow_list: Arc::new(Mutex::new(AllowList::default())),
            settings,
            cache: NotificationCache::new(),
            rng: StdRng::from_entropy(),
            sink,
            tracker: Arc::new(NoopTracker),
            geometry: None,
        }
    }

    /// Enable remote augmentation. Results land in this cycle's inbox.
    pub fn with_remote(
        mut self,
        analyzer: Arc<dyn RemoteAnalyzer>,
        connectivity: Arc<dyn Connectivity>,
        interval: Duration,
    ) -> Self {
        self.remote = Some(RemoteClient::new(
            analyzer,
            connectivity,
            interval,
            self.inbox.clone(),
        ));
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Initial allow-list. Later changes go through `Pipeline::set_allow_list`.
    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = Arc::new(Mutex::new(allow_list));
        self
    }

    /// Deterministic TTL draws.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn inbox(&self) -> &RemoteInbox {
        &self.inbox
    }

    pub fn cache(&self) -> &NotificationCache {
        &self.cache
    }

    pub fn input_size(&self) -> u32 {
        self.detector.input_size()
    }

    fn allow_list_handle(&self) -> Arc<Mutex<AllowList>> {
        Arc::clone(&self.allow_list)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.detector
            .warm_up()
            .with_context(|| format!("detector '{}' failed to initialize", self.detector.name()))
    }

    fn geometry_for(&mut self, frame: &FrameSnapshot) -> Result<FrameGeometry> {
        let key = (frame.width(), frame.height(), frame.rotation());
        if let Some(geometry) = self.geometry.filter(|g| g.key == key) {
            return Ok(geometry);
        }
        let side = self.detector.input_size();
        let frame_to_crop = Transform::frame_to_crop(
            frame.width(),
            frame.height(),
            side,
            side,
            frame.rotation(),
            self.settings.maintain_aspect,
        )?;
        let geometry = FrameGeometry {
            key,
            frame_to_crop,
            crop_to_frame: frame_to_crop.invert()?,
        };
        log::info!(
            "frame geometry {}x{} rot={} -> {}x{} crop",
            key.0,
            key.1,
            key.2,
            side,
            side
        );
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Run one full cycle on `frame`. `frame.timestamp()` is the cycle's clock.
    pub fn run(&mut self, frame: &FrameSnapshot) -> Result<CycleReport> {
        let now = frame.timestamp();
        let side = self.detector.input_size();
        let geometry = self.geometry_for(frame)?;
        let crop = crop_rgb(
            frame.rgb(),
            frame.width(),
            frame.height(),
            &geometry.frame_to_crop,
            side,
        )?;

        let started = Instant::now();
        let local = self
            .detector
            .detect(crop.pixels(), crop.width(), crop.height())
            .with_context(|| format!("local detection failed on frame {}", frame.seq()))?;
        log::debug!(
            "frame {}: {} local detection(s) in {} ms",
            frame.seq(),
            local.len(),
            started.elapsed().as_millis()
        );
        let local_count = local.len();

        let remote_call = self
            .remote
            .as_mut()
            .and_then(|remote| remote.maybe_analyze(&crop, now));

        let fused = fuse(local, &self.inbox)?;

        let filter = {
            let allow_list = self
                .allow_list
                .lock()
                .map_err(|_| anyhow!("allow-list lock poisoned"))?;
            NotificationFilter::new(self.settings.min_confidence, allow_list.clone())
        };

        let mut notifications = Vec::new();
        for detection in filter.apply(&fused) {
            if self.cache.contains(&detection.label, now) {
                continue;
            }
            let zone = classify_detection(detection, side);
            let text = cue_text(&detection.label, zone);
            self.sink.speak(&text);
            let ttl = self.settings.ttl.sample(&mut self.rng);
            self.cache.put(&detection.label, ttl, now);
            log::info!(
                "frame {}: {} ({:.2}) suppressed for {} ms",
                frame.seq(),
                text,
                detection.confidence,
                ttl.as_millis()
            );
            notifications.push(Notification {
                label: detection.label.clone(),
                zone,
                text,
                ttl,
            });
        }

        let in_frame: Vec<Detection> = fused
            .iter()
            .map(|d| match d.space {
                CoordinateSpace::ModelInput => {
                    d.mapped(&geometry.crop_to_frame, CoordinateSpace::Frame)
                }
                CoordinateSpace::Frame => d.clone(),
            })
            .collect();
        self.tracker
            .track_results(&in_frame, frame.luminance(), frame.seq());

        Ok(CycleReport {
            seq: frame.seq(),
            local_count,
            fused,
            notifications,
            remote_call,
        })
    }
}

// ----------------------------------------------------------------------------
// Pipeline: admission controller
// ----------------------------------------------------------------------------

/// Outcome of offering a frame to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The frame started a detection cycle.
    Admitted { seq: u64 },
    /// A cycle was already running; the frame was skipped.
    Dropped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_seen: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub cycles_completed: u64,
    pub cycle_errors: u64,
    pub notifications: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_seen: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    cycles_completed: AtomicU64,
    cycle_errors: AtomicU64,
    notifications: AtomicU64,
}

pub struct Pipeline {
    processing: Arc<AtomicBool>,
    jobs: Option<SyncSender<FrameSnapshot>>,
    worker: Option<JoinHandle<()>>,
    tracker: Arc<dyn Tracker>,
    sink: Arc<dyn NotificationSink>,
    allow_list: Arc<Mutex<AllowList>>,
    counters: Arc<Counters>,
}

impl Pipeline {
    /// Warm up the detector and start the detection worker.
    ///
    /// A detector that fails to initialize is returned as an error and no
    /// worker is started.
    pub fn spawn(mut cycle: DetectionCycle) -> Result<Self> {
        cycle.warm_up()?;

        let processing = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let tracker = Arc::clone(&cycle.tracker);
        let sink = Arc::clone(&cycle.sink);
        let allow_list = cycle.allow_list_handle();
        let (tx, rx) = mpsc::sync_channel::<FrameSnapshot>(1);

        let worker_processing = Arc::clone(&processing);
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("detection".to_string())
            .spawn(move || {
                for snapshot in rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| cycle.run(&snapshot)))
                        .unwrap_or_else(|_| {
                            Err(anyhow!("detection cycle panicked on frame {}", snapshot.seq()))
                        });
                    match outcome {
                        Ok(report) => {
                            worker_counters
                                .notifications
                                .fetch_add(report.notifications.len() as u64, Ordering::Relaxed);
                            worker_counters
                                .cycles_completed
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            log::error!("detection cycle failed: {:#}", e);
                            worker_counters.cycle_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    worker_processing.store(false, Ordering::Release);
                }
            })
            .context("failed to start detection worker")?;

        Ok(Self {
            processing,
            jobs: Some(tx),
            worker: Some(worker),
            tracker,
            sink,
            allow_list,
            counters,
        })
    }

    /// Offer a captured frame. Never blocks on detection.
    ///
    /// The tracker sees every frame. `source.ready_for_next_image()` is called
    /// exactly once before this returns, after the frame has been copied if it
    /// was admitted.
    pub fn on_frame(
        &self,
        capture: &FrameCapture<'_>,
        source: &mut dyn ImageRelease,
    ) -> Result<Admission> {
        self.tracker.on_frame(capture);
        self.counters.frames_seen.fetch_add(1, Ordering::Relaxed);

        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            source.ready_for_next_image();
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(Admission::Dropped);
        }

        let snapshot = match capture.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.processing.store(false, Ordering::Release);
                source.ready_for_next_image();
                return Err(e);
            }
        };
        source.ready_for_next_image();

        let Some(jobs) = self.jobs.as_ref() else {
            self.processing.store(false, Ordering::Release);
            return Err(anyhow!("pipeline is shut down"));
        };
        match jobs.try_send(snapshot) {
            Ok(()) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Admitted { seq: capture.seq })
            }
            Err(TrySendError::Full(_)) => {
                // The worker clears the flag only after taking its job, so the
                // slot is empty whenever the flag was clear.
                self.processing.store(false, Ordering::Release);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Dropped)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.processing.store(false, Ordering::Release);
                Err(anyhow!("detection worker stopped"))
            }
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Poll until no cycle is running or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_processing() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Replace the allow-list from user input and acknowledge with a short
    /// vibration. Returns the number of labels now allowed.
    pub fn set_allow_list(&self, csv: &str) -> Result<usize> {
        let parsed = AllowList::from_csv(csv);
        let count = parsed.len();
        {
            let mut current = self
                .allow_list
                .lock()
                .map_err(|_| anyhow!("allow-list lock poisoned"))?;
            *current = parsed;
        }
        self.sink.vibrate(CONFIRM_VIBRATION);
        log::info!("allow-list updated: {} label(s)", count);
        Ok(count)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_seen: self.counters.frames_seen.load(Ordering::Relaxed),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            cycles_completed: self.counters.cycles_completed.load(Ordering::Relaxed),
            cycle_errors: self.counters.cycle_errors.load(Ordering::Relaxed),
            notifications: self.counters.notifications.load(Ordering::Relaxed),
        }
    }

    /// Finish the running cycle, if any, and stop the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("detection worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
    }
}
