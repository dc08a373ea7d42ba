use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use sightcue::pipeline::{Admission, CycleSettings, DetectionCycle, Pipeline};
use sightcue::remote::RemoteAnalyzer;
use sightcue::{
    BoundingBox, CropImage, Detection, FrameCapture, FrameSnapshot, FrameSource, NetworkStatus,
    NotificationSink, SourceConfig, StubBackend,
};

#[derive(Clone, Default)]
struct Recorder {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl NotificationSink for Recorder {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }

    fn vibrate(&self, _duration: Duration) {}
}

struct ChairService;

impl RemoteAnalyzer for ChairService {
    fn analyze(&self, image: &CropImage) -> Result<Vec<Detection>> {
        assert_eq!((image.width(), image.height()), (300, 300));
        Ok(vec![Detection::in_model_input(
            "0",
            "chair",
            0.9,
            BoundingBox::from_xywh(220.0, 100.0, 60.0, 80.0),
        )])
    }
}

fn snapshot(seq: u64, timestamp: Instant) -> FrameSnapshot {
    let rgb = vec![90u8; 640 * 480 * 3];
    let luma = vec![90u8; 640 * 480];
    FrameCapture {
        seq,
        timestamp,
        width: 640,
        height: 480,
        stride: 640,
        rotation: 90,
        luminance: &luma,
        rgb: &rgb,
    }
    .snapshot()
    .expect("valid frame")
}

fn bottle() -> Detection {
    Detection::in_model_input("0", "bottle", 0.8, BoundingBox::new(10.0, 10.0, 50.0, 50.0))
}

#[test]
fn bottle_on_the_left_is_announced_then_suppressed_until_ttl() -> Result<()> {
    let recorder = Recorder::default();
    let backend = StubBackend::new(300).with_detections(vec![bottle()]);
    let mut cycle = DetectionCycle::new(
        Box::new(backend),
        Arc::new(recorder.clone()),
        CycleSettings::default(),
    );

    let t0 = Instant::now();
    let first = cycle.run(&snapshot(1, t0))?;
    assert_eq!(first.notifications.len(), 1);
    assert!(first.notifications[0].ttl >= Duration::from_millis(1500));
    assert!(first.notifications[0].ttl <= Duration::from_millis(3750));
    assert_eq!(recorder.spoken(), vec!["bottle Left"]);

    cycle.run(&snapshot(2, t0 + Duration::from_millis(500)))?;
    assert_eq!(recorder.spoken().len(), 1);

    cycle.run(&snapshot(3, t0 + Duration::from_millis(4000)))?;
    assert_eq!(recorder.spoken(), vec!["bottle Left", "bottle Left"]);
    Ok(())
}

#[test]
fn allow_list_and_threshold_gate_cues() -> Result<()> {
    let recorder = Recorder::default();
    let backend = StubBackend::new(300).with_detections(vec![
        bottle(),
        Detection::in_model_input("1", "cup", 0.95, BoundingBox::new(140.0, 10.0, 160.0, 40.0)),
        Detection::in_model_input("2", "phone", 0.6, BoundingBox::new(140.0, 10.0, 160.0, 40.0)),
    ]);
    let mut cycle = DetectionCycle::new(
        Box::new(backend),
        Arc::new(recorder.clone()),
        CycleSettings::default(),
    )
    .with_allow_list(sightcue::AllowList::from_csv("cup, phone"));

    let report = cycle.run(&snapshot(1, Instant::now()))?;
    assert_eq!(report.fused.len(), 3);
    assert_eq!(recorder.spoken(), vec!["cup Center"]);
    Ok(())
}

#[test]
fn remote_detection_is_spoken_on_the_following_cycle() -> Result<()> {
    let recorder = Recorder::default();
    let network = NetworkStatus::new(false);
    let mut cycle = DetectionCycle::new(
        Box::new(StubBackend::new(300)),
        Arc::new(recorder.clone()),
        CycleSettings::default(),
    )
    .with_remote(
        Arc::new(ChairService),
        Arc::new(network.clone()),
        Duration::from_secs(3),
    );

    let t0 = Instant::now();
    let offline = cycle.run(&snapshot(1, t0))?;
    assert!(offline.remote_call.is_none());

    network.set_online(true);
    let issued = cycle.run(&snapshot(2, t0 + Duration::from_millis(100)))?;
    issued.remote_call.expect("remote issued").wait()?;

    let rate_limited = cycle.run(&snapshot(3, t0 + Duration::from_millis(200)))?;
    assert!(rate_limited.remote_call.is_none());
    assert_eq!(rate_limited.fused.len(), 1);
    assert_eq!(recorder.spoken(), vec!["chair Right"]);

    let allowed_again = cycle.run(&snapshot(4, t0 + Duration::from_millis(3200)))?;
    assert!(allowed_again.remote_call.is_some());
    Ok(())
}

#[test]
fn daemon_style_loop_announces_from_synthetic_source() -> Result<()> {
    let recorder = Recorder::default();
    let backend = StubBackend::new(300).with_detections(vec![bottle()]);
    let pipeline = Pipeline::spawn(DetectionCycle::new(
        Box::new(backend),
        Arc::new(recorder.clone()),
        CycleSettings::default(),
    ))?;

    let mut source = FrameSource::new(SourceConfig {
        width: 64,
        height: 48,
        ..SourceConfig::default()
    })?;
    source.connect()?;

    let mut admitted = 0;
    for _ in 0..20 {
        let frame = source.next_frame()?;
        if let Admission::Admitted { .. } = pipeline.on_frame(&frame.capture(), &mut source)? {
            admitted += 1;
        }
    }
    assert!(pipeline.wait_idle(Duration::from_secs(5)));

    let stats = pipeline.stats();
    assert_eq!(stats.frames_seen, 20);
    assert_eq!(stats.admitted, admitted);
    assert_eq!(stats.admitted + stats.dropped, 20);
    assert_eq!(source.stats().frames_released, 20);
    pipeline.shutdown()?;

    let spoken = recorder.spoken();
    assert!(!spoken.is_empty());
    assert!(spoken.iter().all(|cue| cue == "bottle Left"));
    Ok(())
}
