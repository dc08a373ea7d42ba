use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sightcue::config::{DetectorKind, SightcueConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SIGHTCUE_CONFIG",
        "SIGHTCUE_SOURCE_URL",
        "SIGHTCUE_REMOTE_ENDPOINT",
        "SIGHTCUE_REMOTE_KEY",
        "SIGHTCUE_ALLOW_LIST",
        "SIGHTCUE_MIN_CONFIDENCE",
        "SIGHTCUE_TTS_COMMAND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let model_path = file.path().with_extension("onnx");
    let labels_path = file.path().with_extension("labels");
    let json = format!(
        r#"{{
            "source": {{
                "url": "stub://hallway",
                "target_fps": 15,
                "width": 1280,
                "height": 720,
                "rotation": 90
            }},
            "detector": {{
                "backend": "tract",
                "model_path": "{}",
                "labels_path": "{}",
                "input_size": 320,
                "min_confidence": 0.6,
                "maintain_aspect": true
            }},
            "remote": {{
                "enabled": true,
                "endpoint": "https://vision.local/analyze",
                "api_key": "file-key",
                "interval_secs": 5,
                "timeout_secs": 4
            }},
            "notify": {{
                "tts_command": "espeak -s 160",
                "ttl_base_ms": 500,
                "ttl_min": 1,
                "ttl_max": 3
            }},
            "allow_list": "cup, bottle"
        }}"#,
        model_path.display(),
        labels_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SIGHTCUE_CONFIG", file.path());
    std::env::set_var("SIGHTCUE_REMOTE_KEY", "env-key");
    std::env::set_var("SIGHTCUE_ALLOW_LIST", "Door, chair,,");
    std::env::set_var("SIGHTCUE_MIN_CONFIDENCE", "0.8");

    let cfg = SightcueConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "stub://hallway");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.width, 1280);
    assert_eq!(cfg.source.height, 720);
    assert_eq!(cfg.source.rotation, 90);
    assert_eq!(cfg.detector.backend, DetectorKind::Tract);
    assert_eq!(cfg.detector.model_path.as_deref(), Some(model_path.as_path()));
    assert_eq!(cfg.detector.input_size, 320);
    assert!(cfg.detector.maintain_aspect);
    assert!((cfg.detector.min_confidence - 0.8).abs() < f32::EPSILON);
    assert!(cfg.remote.enabled);
    assert_eq!(cfg.remote.api_key, "env-key");
    assert_eq!(cfg.remote.interval, Duration::from_secs(5));
    assert_eq!(cfg.remote.timeout, Duration::from_secs(4));
    assert_eq!(cfg.notify.tts_command.as_deref(), Some("espeak -s 160"));
    assert_eq!(cfg.notify.ttl.base, Duration::from_millis(500));
    assert_eq!(cfg.allow_list, vec!["door", "chair"]);
    assert!(cfg.allow_list().permits("door"));
    assert!(!cfg.allow_list().permits("cup"));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SightcueConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://front_camera");
    assert_eq!(cfg.source.target_fps, 10);
    assert_eq!(cfg.detector.backend, DetectorKind::Stub);
    assert!((cfg.detector.min_confidence - 0.75).abs() < f32::EPSILON);
    assert!(!cfg.remote.enabled);
    assert!(cfg.notify.tts_command.is_none());
    assert!(cfg.allow_list.is_empty());

    clear_env();
}

#[test]
fn remote_endpoint_from_env_enables_remote() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIGHTCUE_REMOTE_ENDPOINT", "http://127.0.0.1:9/analyze");
    let cfg = SightcueConfig::load().expect("load config");
    assert!(cfg.remote.enabled);
    assert_eq!(cfg.remote.endpoint.as_deref(), Some("http://127.0.0.1:9/analyze"));

    clear_env();
}

#[test]
fn rejects_out_of_range_confidence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIGHTCUE_MIN_CONFIDENCE", "1.5");
    assert!(SightcueConfig::load().is_err());
    std::env::set_var("SIGHTCUE_MIN_CONFIDENCE", "high");
    assert!(SightcueConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_remote_enabled_without_endpoint() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"remote": {"enabled": true}}"#)
        .expect("write config");
    std::env::set_var("SIGHTCUE_CONFIG", file.path());
    let err = SightcueConfig::load().expect_err("missing endpoint");
    assert!(err.to_string().contains("endpoint"));

    clear_env();
}
