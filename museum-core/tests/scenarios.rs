//! End-to-end coverage for the concrete scenarios: a timeout chain, an
//! audio-gated transition, device staleness, global-event preemption, and
//! the feedback tracker's timeout/supersede behavior. Scenarios C and F
//! drive the feedback tracker directly (no broker is available here) and
//! observe it through the logger's embedded channel rather than private
//! state, since `FeedbackTracker` intentionally exposes no pending-count
//! getter.

use museum_core::mqtt::device_registry::DeviceRegistry;
use museum_core::mqtt::feedback_tracker::FeedbackTracker;
use museum_core::scene::runner::SceneRunner;
use museum_core::scene::transitions::TransitionManager;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Scenario C and F both switch the global logger into embedded mode to
// inspect emitted records; serialize them so they don't race on the same
// channel within this test binary.
static LOG_LOCK: Mutex<()> = Mutex::new(());

fn write_scene(dir: &Path, room: &str, name: &str, contents: &str) {
    let room_dir = dir.join(room);
    std::fs::create_dir_all(&room_dir).unwrap();
    std::fs::write(room_dir.join(format!("{name}.json")), contents).unwrap();
}

fn wait_until(mut check: impl FnMut() -> bool, budget: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < budget {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn new_runner(dir: &Path, room: &str, transitions: Arc<TransitionManager>) -> Arc<SceneRunner> {
    Arc::new(SceneRunner::new(
        room,
        dir.to_path_buf(),
        50.0,
        transitions,
        FeedbackTracker::new(1.0),
        None,
        None,
        None,
    ))
}

#[test]
fn scenario_a_timeout_chain_reaches_end() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(
        dir.path(),
        "room1",
        "scenario-a",
        r#"{
            "sceneId": "scenario-a",
            "initialState": "s1",
            "states": {
                "s1": {
                    "onEnter": [{"action": "mqtt", "topic": "room1/light", "message": "ON"}],
                    "transitions": [{"type": "timeout", "delay": 0.15, "goto": "s2"}],
                    "onExit": [{"action": "mqtt", "topic": "room1/light", "message": "OFF"}]
                },
                "s2": {
                    "transitions": [{"type": "always", "goto": "END"}]
                }
            }
        }"#,
    );

    let transitions = Arc::new(TransitionManager::new());
    let runner = new_runner(dir.path(), "room1", transitions);
    runner.start_scene("scenario-a").unwrap();

    assert!(wait_until(|| !runner.is_running(), Duration::from_secs(2)));
    assert_eq!(runner.progress_info().current_state.as_deref(), Some("END"));
}

#[test]
fn scenario_b_audio_gated_transition_waits_for_audio_end() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(
        dir.path(),
        "room1",
        "scenario-b",
        r#"{
            "sceneId": "scenario-b",
            "initialState": "s1",
            "states": {
                "s1": {
                    "onEnter": [{"action": "audio", "message": "PLAY:welcome.mp3"}],
                    "transitions": [{"type": "audioEnd", "target": "welcome.mp3", "goto": "END"}]
                }
            }
        }"#,
    );

    let transitions = Arc::new(TransitionManager::new());
    let runner = new_runner(dir.path(), "room1", transitions.clone());
    runner.start_scene("scenario-b").unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(runner.is_running(), "scene should still be waiting on audioEnd");

    transitions.register_audio_end("welcome.mp3");
    assert!(wait_until(|| !runner.is_running(), Duration::from_secs(2)));
}

#[test]
fn scenario_d_device_offline_staleness() {
    let registry = DeviceRegistry::new(0.05);
    registry.update_device_status("esp32_07", "online", false);
    assert_eq!(registry.get_connected_devices().len(), 1);

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(registry.get_connected_devices().len(), 0);
}

#[test]
fn scenario_e_global_emergency_preempts_running_state() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(
        dir.path(),
        "room1",
        "scenario-e",
        r#"{
            "sceneId": "scenario-e",
            "initialState": "s2",
            "globalEvents": [
                {"type": "mqttMessage", "topic": "room1/emergency", "message": "ON", "goto": "END"}
            ],
            "states": {
                "s2": {
                    "transitions": [{"type": "timeout", "delay": 30.0, "goto": "END"}]
                }
            }
        }"#,
    );

    let transitions = Arc::new(TransitionManager::new());
    let runner = new_runner(dir.path(), "room1", transitions.clone());
    runner.start_scene("scenario-e").unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(runner.is_running(), "scene should still be in s2 before the emergency arrives");

    transitions.register_mqtt_event("room1/emergency", "ON");
    assert!(wait_until(|| !runner.is_running(), Duration::from_secs(2)));
}

#[test]
fn scenario_c_feedback_timeout_logs_a_warning() {
    let _guard = LOG_LOCK.lock().unwrap();
    let (tx, rx) = museum_core::create_log_channel();
    museum_core::set_embedded_mode(tx);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let tracker = FeedbackTracker::new(0.05);
        tracker.enable();
        tracker.track_published("room1/motor");
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    museum_core::set_standalone_mode();
    let saw_timeout = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|line| line.text.contains("Feedback TIMEOUT") && line.text.contains("room1/motor"));
    assert!(saw_timeout, "expected a Feedback TIMEOUT warning");
}

#[test]
fn scenario_f_supersede_yields_exactly_one_ok_and_no_timeout() {
    let _guard = LOG_LOCK.lock().unwrap();
    let (tx, rx) = museum_core::create_log_channel();
    museum_core::set_embedded_mode(tx);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let tracker = FeedbackTracker::new(0.3);
        tracker.enable();
        tracker.track_published("room1/motor");
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracker.track_published("room1/motor");
        tokio::time::sleep(Duration::from_millis(300)).await;
        tracker.handle_incoming("room1/motor/feedback", "OK");
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    museum_core::set_standalone_mode();
    let lines: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let ok_count = lines
        .iter()
        .filter(|line| line.text.contains("Feedback OK") && line.text.contains("room1/motor"))
        .count();
    let saw_timeout = lines.iter().any(|line| line.text.contains("Feedback TIMEOUT"));

    assert_eq!(ok_count, 1);
    assert!(!saw_timeout);
}
