//! Owns the running scene end-to-end: load → run → stop. One dedicated OS
//! thread per running scene (grounded on the same `ThreadBuilder`-with-
//! priority pattern the rest of this codebase uses for its real-time work),
//! driving a small current-thread Tokio runtime so the executor's async
//! action dispatch can run without handing scene state to the process's main
//! runtime. Only that thread mutates the State Machine and Transition event
//! queues while a scene runs; `stop_scene` is the one cross-thread exception,
//! and it is a panic button, not a negotiation.

use crate::audio::engine::AudioEngine;
use crate::error::{ControllerError, ControllerResult};
use crate::mqtt::client::MqttClient;
use crate::mqtt::topic_contract::{self, Payload};
use crate::scene::executor::StateExecutor;
use crate::scene::model::{Action, ActionValue, Scene, State, END_STATE};
use crate::scene::state_machine::{ProgressInfo, StateMachine};
use crate::scene::transitions::TransitionManager;
use crate::scene::validator::load_scene_json;
use crate::{log_critical, log_error, log_info, log_warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thread_priority::{ThreadBuilder, ThreadPriority};

#[derive(Debug, Deserialize)]
struct CommandEntry {
    topic: String,
    message: String,
    #[serde(default)]
    retain: bool,
}

pub struct SceneRunner {
    room_id: String,
    scenes_dir: PathBuf,
    tick_interval: Duration,
    state_machine: Arc<Mutex<StateMachine>>,
    transitions: Arc<TransitionManager>,
    feedback_tracker: Arc<crate::mqtt::feedback_tracker::FeedbackTracker>,
    mqtt_client: Option<Arc<MqttClient>>,
    audio_engine: Option<Arc<AudioEngine>>,
    video_engine: Option<Arc<VideoEngineHandle>>,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
}

// Kept as a type alias rather than importing `VideoEngine` directly under a
// second name; exists purely so this module reads the same whether the
// caller wires a real engine or leaves video out entirely.
pub type VideoEngineHandle = crate::video::engine::VideoEngine;

impl SceneRunner {
    pub fn new(
        room_id: impl Into<String>,
        scenes_dir: impl Into<PathBuf>,
        tick_hz: f64,
        transitions: Arc<TransitionManager>,
        feedback_tracker: Arc<crate::mqtt::feedback_tracker::FeedbackTracker>,
        mqtt_client: Option<Arc<MqttClient>>,
        audio_engine: Option<Arc<AudioEngine>>,
        video_engine: Option<Arc<VideoEngineHandle>>,
    ) -> Self {
        let tick_hz = if tick_hz <= 0.0 { 10.0 } else { tick_hz };
        SceneRunner {
            room_id: room_id.into(),
            scenes_dir: scenes_dir.into(),
            tick_interval: Duration::from_secs_f64(1.0 / tick_hz),
            state_machine: Arc::new(Mutex::new(StateMachine::new())),
            transitions,
            feedback_tracker,
            mqtt_client,
            audio_engine,
            video_engine,
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn progress_info(&self) -> ProgressInfo {
        self.state_machine.lock().unwrap().progress_info()
    }

    fn scene_path(&self, name: &str) -> PathBuf {
        self.scenes_dir.join(&self.room_id).join(format!("{name}.json"))
    }

    fn command_path(&self, name: &str) -> PathBuf {
        self.scenes_dir
            .join(&self.room_id)
            .join("commands")
            .join(format!("{name}.json"))
    }

    /// Loads and validates `scenes/<room>/<name>.json`, preloads its `sfx_`
    /// audio, and starts the tick-loop thread. Returns
    /// [`ControllerError::SceneBusy`] if a scene is already running.
    pub fn start_scene(self: &Arc<Self>, name: &str) -> ControllerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::SceneBusy(name.to_string()));
        }

        let result = self.load_and_launch(name);
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    fn load_and_launch(self: &Arc<Self>, name: &str) -> ControllerResult<()> {
        let path = self.scene_path(name);
        let text = std::fs::read_to_string(&path)?;
        let scene = load_scene_json(&text)?;

        if let Some(engine) = &self.audio_engine {
            engine.preload_files_for_scene(&collect_audio_files(&scene));
        }

        {
            let mut sm = self.state_machine.lock().unwrap();
            sm.load(scene);
            if !sm.start() {
                return Err(ControllerError::SceneSchema {
                    scene: name.to_string(),
                    reason: "scene has no resolvable initial state".to_string(),
                });
            }
        }

        self.feedback_tracker.enable();
        self.stop_flag.store(false, Ordering::SeqCst);

        let runner = Arc::clone(self);
        ThreadBuilder::default()
            .name(format!("scene-{}", self.room_id))
            .priority(ThreadPriority::Max)
            .spawn(move |_| {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build scene tick runtime");
                runtime.block_on(runner.run_tick_loop());
            })
            .map_err(|e| ControllerError::Config(format!("failed to start scene thread: {e}")))?;

        log_info!("Scene '{name}' started");
        Ok(())
    }

    async fn run_tick_loop(self: Arc<Self>) {
        let mut executor = StateExecutor::new(
            self.mqtt_client.clone(),
            self.audio_engine.clone(),
            self.video_engine.clone(),
        );

        if let Some(state) = self.current_state_snapshot() {
            executor.execute_on_enter(&state).await;
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;

            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if self.state_machine.lock().unwrap().is_finished() {
                break;
            }

            let elapsed = self.state_machine.lock().unwrap().elapsed_in_state();
            let Some(state) = self.current_state_snapshot() else {
                break;
            };

            executor.check_and_execute_timeline(&state, elapsed).await;

            let mut next = self.transitions.check_transitions(&state.transitions, elapsed);
            if next.is_none() {
                let global_events = self.state_machine.lock().unwrap().global_events().to_vec();
                next = self.transitions.check_transitions(&global_events, elapsed);
            }

            if let Some(goto) = next {
                executor.execute_on_exit(&state).await;
                let moved = self.state_machine.lock().unwrap().goto_state(&goto);
                if !moved {
                    log_error!("scene '{}': transition targets unknown state '{goto}'", self.room_id);
                    break;
                }
                self.transitions.clear_events();
                executor.reset_timeline_tracking();
                if goto != END_STATE {
                    if let Some(new_state) = self.current_state_snapshot() {
                        executor.execute_on_enter(&new_state).await;
                    }
                }
            }

            if let Some(engine) = &self.audio_engine {
                engine.poll_end_events(&self.transitions);
            }
            if let Some(engine) = &self.video_engine {
                engine.poll_end_events(&self.transitions);
            }
        }

        self.feedback_tracker.disable();
        self.running.store(false, Ordering::SeqCst);
        log_info!("Scene finished for room '{}'", self.room_id);
    }

    fn current_state_snapshot(&self) -> Option<State> {
        self.state_machine.lock().unwrap().current_state_data().cloned()
    }

    /// Always allowed. Forces the state machine to `END`, disables feedback
    /// tracking, stops both media engines, clears pending events, and
    /// broadcasts a room-scoped stop — outside the action executor, since a
    /// panic stop is not scene content.
    pub fn stop_scene(self: &Arc<Self>) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.state_machine.lock().unwrap().goto_state(END_STATE);
        self.feedback_tracker.disable();
        self.transitions.clear_events();

        if let Some(engine) = &self.audio_engine {
            let _ = engine.stop_all();
        }
        if let Some(engine) = &self.video_engine {
            let _ = engine.stop_video();
        }

        self.broadcast_room_stop();
        self.running.store(false, Ordering::SeqCst);
        log_warn!("Scene stopped for room '{}' (panic stop)", self.room_id);
    }

    fn broadcast_room_stop(&self) {
        let Some(client) = self.mqtt_client.clone() else { return };
        let topic = format!("{}/STOP", self.room_id);
        tokio::spawn(async move {
            client.publish(&topic, "STOP").await;
        });
    }

    /// Loads `scenes/<room>/commands/<name>.json` (a flat array of
    /// `{topic, message, retain?}`) and publishes every entry through the
    /// same Topic Contract validation as scene actions. Bypasses the state
    /// machine entirely.
    pub async fn run_command(&self, name: &str) -> ControllerResult<()> {
        let path = self.command_path(name);
        let text = std::fs::read_to_string(&path)?;
        let entries: Vec<CommandEntry> = serde_json::from_str(&text)?;

        for entry in entries {
            if let Err(reason) =
                topic_contract::validate_publish(&entry.topic, &Payload::Text(&entry.message))
            {
                log_error!("command bundle '{name}': skipping invalid entry: {reason}");
                continue;
            }
            match &self.mqtt_client {
                Some(client) if client.is_connected() => {
                    client.publish(&entry.topic, &entry.message).await;
                }
                _ => log_warn!(
                    "command bundle '{name}': MQTT not connected (simulation): {} = {}",
                    entry.topic,
                    entry.message
                ),
            }
        }
        Ok(())
    }

    /// Manual publish path used by the dashboard's control surface.
    pub async fn publish(&self, topic: &str, payload: &str) -> ControllerResult<()> {
        topic_contract::validate_publish(topic, &Payload::Text(payload)).map_err(ControllerError::Mqtt)?;
        match &self.mqtt_client {
            Some(client) if client.is_connected() => {
                if client.publish(topic, payload).await {
                    Ok(())
                } else {
                    Err(ControllerError::Mqtt(format!("publish failed: {topic}")))
                }
            }
            _ => {
                log_warn!("Publish ignored, MQTT not connected: {topic} = {payload}");
                Err(ControllerError::Mqtt("not connected".to_string()))
            }
        }
    }
}

/// Walks every `audio` action in the scene (`onEnter`/`onExit`/`timeline`)
/// and extracts the filename each command references, for the preload pass.
fn collect_audio_files(scene: &Scene) -> Vec<String> {
    let mut files = Vec::new();
    for state in scene.states.values() {
        for action in state.on_enter.iter().chain(state.on_exit.iter()) {
            collect_from_action(action, &mut files);
        }
        for item in &state.timeline {
            for action in item.actions() {
                collect_from_action(action, &mut files);
            }
        }
    }
    files
}

fn collect_from_action(action: &Action, files: &mut Vec<String>) {
    let Action::Audio { message } = action else { return };
    let ActionValue::Text(command) = message else { return };
    if let Some(filename) = extract_audio_filename(command) {
        files.push(filename);
    }
}

fn extract_audio_filename(command: &str) -> Option<String> {
    if let Some(rest) = command.strip_prefix("PLAY:") {
        return rest.split(':').next().map(str::to_string);
    }
    if matches!(command, "STOP" | "PAUSE" | "RESUME")
        || command.starts_with("STOP:")
        || command.starts_with("VOLUME:")
    {
        return None;
    }
    Some(command.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_scene(dir: &Path, room: &str, name: &str, contents: &str) {
        let room_dir = dir.join(room);
        std::fs::create_dir_all(&room_dir).unwrap();
        std::fs::write(room_dir.join(format!("{name}.json")), contents).unwrap();
    }

    fn minimal_scene() -> &'static str {
        r#"{
            "sceneId": "intro",
            "initialState": "s1",
            "states": {
                "s1": {
                    "onEnter": [{"action": "audio", "message": "PLAY:sfx_chime.mp3:0.5"}],
                    "transitions": [{"type": "always", "goto": "END"}]
                }
            }
        }"#
    }

    fn runner(dir: &Path, room: &str) -> Arc<SceneRunner> {
        Arc::new(SceneRunner::new(
            room,
            dir.to_path_buf(),
            10.0,
            Arc::new(TransitionManager::new()),
            crate::mqtt::feedback_tracker::FeedbackTracker::new(1.0),
            None,
            None,
            None,
        ))
    }

    #[test]
    fn extracts_filenames_from_audio_commands() {
        assert_eq!(extract_audio_filename("PLAY:sfx_bell.mp3:0.5"), Some("sfx_bell.mp3".to_string()));
        assert_eq!(extract_audio_filename("welcome.mp3"), Some("welcome.mp3".to_string()));
        assert_eq!(extract_audio_filename("STOP"), None);
        assert_eq!(extract_audio_filename("STOP:welcome.mp3"), None);
        assert_eq!(extract_audio_filename("VOLUME:0.5"), None);
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_scene(dir.path(), "room1", "intro", minimal_scene());
        let runner = runner(dir.path(), "room1");
        runner.running.store(true, Ordering::SeqCst);
        let err = runner.start_scene("intro").unwrap_err();
        assert!(matches!(err, ControllerError::SceneBusy(_)));
    }

    #[test]
    fn missing_scene_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "room1");
        assert!(runner.start_scene("ghost").is_err());
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn stop_scene_forces_end_state() {
        let dir = tempfile::tempdir().unwrap();
        write_scene(dir.path(), "room1", "intro", minimal_scene());
        let runner = runner(dir.path(), "room1");
        {
            let scene = load_scene_json(minimal_scene()).unwrap();
            let mut sm = runner.state_machine.lock().unwrap();
            sm.load(scene);
            sm.start();
        }
        runner.running.store(true, Ordering::SeqCst);
        runner.stop_scene();
        assert!(runner.state_machine.lock().unwrap().is_finished());
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn run_command_reports_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "room1");
        assert!(runner.run_command("no-such-bundle").await.is_err());
    }
}
