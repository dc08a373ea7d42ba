//! Sightcue
//!
//! Turns a live camera stream into short spoken cues ("bottle Left") for
//! nearby objects.
//!
//! # Architecture
//!
//! Each frame flows through one admission cycle at a time:
//!
//! 1. **Admission**: a frame is accepted only when no cycle is running; the
//!    rest are dropped and released back to the source immediately.
//! 2. **Crop**: the frame is mapped into the detector's square input
//!    (rotation, scaling, optional letterbox).
//! 3. **Detection**: a local detector runs on the crop; at most every few
//!    seconds the crop is also sent to a remote vision service.
//! 4. **Fusion**: remote results that arrived since the last cycle are
//!    appended to the local ones.
//! 5. **Notification**: results above the confidence threshold and on the
//!    allow-list are classified Left / Center / Right and spoken, unless the
//!    same label was spoken within its randomized TTL.
//! 6. **Tracking**: the full fused list, mapped back to frame space, goes to
//!    the tracker / overlay.
//!
//! # Module Structure
//!
//! - `geometry`: bounding boxes, frame↔crop transforms, crop sampling
//! - `frame`: per-frame borrowed capture and owned snapshot
//! - `detect`: detector backends, label maps, `Detection`
//! - `direction`: 3x3 grid zone classifier
//! - `dedup`: self-expiring notification cache
//! - `fusion`: remote inbox, allow-list, notification filter
//! - `remote`: rate-limited remote analysis client
//! - `notify`: speech / haptic sinks
//! - `pipeline`: admission controller and detection cycle
//! - `ingest`: frame sources
//! - `config`: daemon configuration

pub mod config;
pub mod dedup;
pub mod detect;
pub mod direction;
pub mod frame;
pub mod fusion;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod remote;

pub use dedup::{NotificationCache, TtlPolicy};
pub use detect::{Detection, DetectorBackend, LabelMap, StubBackend};
pub use direction::Zone;
pub use frame::{CropImage, FrameCapture, FrameSnapshot};
pub use fusion::{AllowList, NotificationFilter, RemoteInbox};
pub use geometry::{BoundingBox, CoordinateSpace, Transform};
pub use ingest::{FrameSource, SourceConfig, SyntheticSource};
pub use notify::{CommandSink, LogSink, NotificationSink, QueuedSink};
pub use pipeline::{
    Admission, CycleReport, CycleSettings, DetectionCycle, ImageRelease, Pipeline, PipelineStats,
    Tracker,
};
pub use remote::{Connectivity, NetworkStatus, RateLimiter, RemoteAnalyzer, RemoteClient};
