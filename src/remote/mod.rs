//! Remote augmentation client.
//!
//! A slower, more capable vision service supplements the local detector. At
//! most one request is issued per interval; each runs on its own thread and,
//! when it completes, appends its detections to the shared `RemoteInbox`.
//! Failures are logged and dropped. Nothing is retried; the next attempt is
//! governed purely by the rate-limit clock.
//!
//! Remote results carry no link to the frame that triggered them. They are
//! fused into whichever detection cycle drains the inbox next.

#[cfg(feature = "remote-http")]
pub mod http;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::Detection;
use crate::frame::CropImage;
use crate::fusion::RemoteInbox;
use crate::geometry::BoundingBox;

#[cfg(feature = "remote-http")]
pub use http::{EndpointProbe, HttpVisionService};

pub const DEFAULT_REMOTE_INTERVAL: Duration = Duration::from_secs(3);

/// Opaque remote vision service.
///
/// Boxes come back in the pixel space of the image that was sent, which is
/// always the model-input crop.
pub trait RemoteAnalyzer: Send + Sync {
    fn analyze(&self, image: &CropImage) -> Result<Vec<Detection>>;
}

/// Whether the network is usable right now.
pub trait Connectivity: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Connectivity flag flipped by whoever watches the network.
#[derive(Clone, Debug)]
pub struct NetworkStatus {
    online: Arc<AtomicBool>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for NetworkStatus {
    fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Response decoding
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    objects: Vec<AnalyzedObject>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedObject {
    rectangle: Rectangle,
    object: String,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct Rectangle {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

/// Decode an analysis response body.
///
/// Each object's `x, y, w, h` rectangle becomes the box
/// `(x, y, x + w, y + h)`; its id is its index in the response. Missing
/// fields are a decode error.
pub fn decode_response(body: &[u8]) -> Result<Vec<Detection>> {
    let response: AnalyzeResponse =
        serde_json::from_slice(body).context("malformed analysis response")?;
    Ok(response
        .objects
        .into_iter()
        .enumerate()
        .map(|(i, object)| {
            let r = object.rectangle;
            Detection::in_model_input(
                i.to_string(),
                object.object,
                object.confidence,
                BoundingBox::from_xywh(r.x, r.y, r.w, r.h),
            )
        })
        .collect())
}

// ----------------------------------------------------------------------------
// Rate limiting
// ----------------------------------------------------------------------------

/// Last-call clock. A call is allowed once strictly more than `interval`
/// has elapsed since the previous one.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_call(&self) -> Option<Instant> {
        self.last_call
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last_call {
            Some(last) => now.saturating_duration_since(last) > self.interval,
            None => true,
        }
    }

    /// Take the slot if ready, stamping `now` as the last call.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.ready(now) {
            return false;
        }
        self.last_call = Some(now);
        true
    }
}

// ----------------------------------------------------------------------------
// RemoteClient
// ----------------------------------------------------------------------------

/// Handle to an in-flight remote request. Dropping it detaches the request;
/// it is never cancelled.
#[derive(Debug)]
pub struct PendingCall {
    issued_at: Instant,
    handle: JoinHandle<()>,
}

impl PendingCall {
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the request has completed and its results, if any, are
    /// in the inbox.
    pub fn wait(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| anyhow!("remote analysis thread panicked"))
    }
}

pub struct RemoteClient {
    analyzer: Arc<dyn RemoteAnalyzer>,
    connectivity: Arc<dyn Connectivity>,
    limiter: RateLimiter,
    inbox: RemoteInbox,
}

impl RemoteClient {
    pub fn new(
        analyzer: Arc<dyn RemoteAnalyzer>,
        connectivity: Arc<dyn Connectivity>,
        interval: Duration,
        inbox: RemoteInbox,
    ) -> Self {
        Self {
            analyzer,
            connectivity,
            limiter: RateLimiter::new(interval),
            inbox,
        }
    }

    pub fn inbox(&self) -> &RemoteInbox {
        &self.inbox
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Issue a request for `image` if the network is up and the interval has
    /// passed. The crop is copied; the caller keeps its own.
    pub fn maybe_analyze(&mut self, image: &CropImage, now: Instant) -> Option<PendingCall> {
        if !self.limiter.ready(now) {
            return None;
        }
        if !self.connectivity.is_available() {
            log::debug!("network not connected; skipping remote analysis");
            return None;
        }
        // Stamped at issue time so overlapping calls cannot start.
        self.limiter.try_acquire(now);

        let analyzer = Arc::clone(&self.analyzer);
        let inbox = self.inbox.clone();
        let image = image.clone();
        let spawned = std::thread::Builder::new()
            .name("remote-analyze".to_string())
            .spawn(move || match analyzer.analyze(&image) {
                Ok(detections) => {
                    for det in &detections {
                        log::info!(
                            "remote service detected {} ({:.2})",
                            det.label,
                            det.confidence
                        );
                    }
                    if let Err(e) = inbox.push(detections) {
                        log::warn!("dropping remote results: {}", e);
                    }
                }
                Err(e) => log::warn!("remote analysis failed: {:#}", e),
            });

        match spawned {
            Ok(handle) => Some(PendingCall {
                issued_at: now,
                handle,
            }),
            Err(e) => {
                log::warn!("failed to start remote analysis: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedAnalyzer {
        result: Mutex<Option<Result<Vec<Detection>>>>,
    }

    impl ScriptedAnalyzer {
        fn ok(detections: Vec<Detection>) -> Self {
            Self {
                result: Mutex::new(Some(Ok(detections))),
            }
        }

        fn failing() -> Self {
            Self {
                result: Mutex::new(Some(Err(anyhow!("connection reset")))),
            }
        }
    }

    impl RemoteAnalyzer for ScriptedAnalyzer {
        fn analyze(&self, _image: &CropImage) -> Result<Vec<Detection>> {
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn crop() -> CropImage {
        CropImage::new(vec![0u8; 12], 2, 2)
    }

    fn cup() -> Detection {
        Detection::in_model_input("0", "cup", 0.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn decodes_rectangles_into_boxes() -> Result<()> {
        let body = br#"{
            "objects": [
                {"rectangle": {"x": 10, "y": 20, "w": 30, "h": 40}, "object": "chair", "confidence": 0.81},
                {"rectangle": {"x": 0, "y": 0, "w": 5, "h": 5}, "object": "cup", "confidence": 0.4, "parent": {}}
            ],
            "requestId": "abc"
        }"#;
        let detections = decode_response(body)?;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "chair");
        assert_eq!(detections[0].id, "0");
        assert_eq!(detections[0].location, BoundingBox::new(10.0, 20.0, 40.0, 60.0));
        assert_eq!(detections[1].id, "1");
        Ok(())
    }

    #[test]
    fn malformed_responses_are_decode_errors() {
        assert!(decode_response(b"not json").is_err());
        assert!(decode_response(br#"{"requestId": "x"}"#).is_err());
        assert!(decode_response(br#"{"objects": [{"object": "cup", "confidence": 0.5}]}"#).is_err());
        assert!(decode_response(br#"{"objects": []}"#).unwrap().is_empty());
    }

    #[test]
    fn limiter_requires_strictly_more_than_interval() {
        let mut limiter = RateLimiter::new(Duration::from_secs(3));
        let t0 = Instant::now();
        assert!(limiter.try_acquire(t0));
        assert!(!limiter.try_acquire(t0 + Duration::from_secs(1)));
        assert!(!limiter.try_acquire(t0 + Duration::from_secs(3)));
        assert!(limiter.try_acquire(t0 + Duration::from_millis(3001)));
        assert_eq!(limiter.last_call(), Some(t0 + Duration::from_millis(3001)));
    }

    #[test]
    fn successful_call_lands_in_inbox() -> Result<()> {
        let inbox = RemoteInbox::new();
        let mut client = RemoteClient::new(
            Arc::new(ScriptedAnalyzer::ok(vec![cup(), cup()])),
            Arc::new(NetworkStatus::new(true)),
            DEFAULT_REMOTE_INTERVAL,
            inbox.clone(),
        );
        let t0 = Instant::now();
        let call = client.maybe_analyze(&crop(), t0).expect("call issued");
        assert_eq!(call.issued_at(), t0);
        // Second attempt inside the interval is suppressed even before completion.
        assert!(client.maybe_analyze(&crop(), t0 + Duration::from_secs(1)).is_none());
        call.wait()?;
        assert_eq!(inbox.drain()?.len(), 2);
        Ok(())
    }

    #[test]
    fn failures_are_swallowed_and_do_not_block_next_attempt() -> Result<()> {
        let inbox = RemoteInbox::new();
        let mut client = RemoteClient::new(
            Arc::new(ScriptedAnalyzer::failing()),
            Arc::new(NetworkStatus::new(true)),
            DEFAULT_REMOTE_INTERVAL,
            inbox.clone(),
        );
        let t0 = Instant::now();
        client.maybe_analyze(&crop(), t0).expect("call issued").wait()?;
        assert!(inbox.is_empty());
        assert!(client
            .maybe_analyze(&crop(), t0 + Duration::from_secs(4))
            .is_some());
        Ok(())
    }

    #[test]
    fn offline_skips_without_consuming_the_slot() {
        let network = NetworkStatus::new(false);
        let mut client = RemoteClient::new(
            Arc::new(ScriptedAnalyzer::ok(vec![cup()])),
            Arc::new(network.clone()),
            DEFAULT_REMOTE_INTERVAL,
            RemoteInbox::new(),
        );
        let t0 = Instant::now();
        assert!(client.maybe_analyze(&crop(), t0).is_none());
        assert_eq!(client.limiter().last_call(), None);

        network.set_online(true);
        assert!(client.maybe_analyze(&crop(), t0).is_some());
    }
}
