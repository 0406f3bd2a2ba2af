//! Pure data owner for the running scene: current state, the scene/state
//! clocks, and visit history. Does not itself execute actions or evaluate
//! transitions — that is the Scene Runner's job, tick by tick.

use crate::scene::model::{Scene, State, END_STATE};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub struct StateMachine {
    scene: Option<Scene>,
    current_state: Option<String>,
    state_start_time: Option<DateTime<Utc>>,
    scene_start_time: Option<DateTime<Utc>>,
    state_history: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressInfo {
    pub scene_running: bool,
    pub scene_id: String,
    pub current_state: Option<String>,
    pub state_description: String,
    pub states_completed: usize,
    pub total_states: usize,
    pub state_elapsed: f64,
    pub scene_elapsed: f64,
    pub progress: f64,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            scene: None,
            current_state: None,
            state_start_time: None,
            scene_start_time: None,
            state_history: Vec::new(),
        }
    }

    pub fn load(&mut self, scene: Scene) {
        self.scene = Some(scene);
        self.current_state = None;
        self.state_start_time = None;
        self.scene_start_time = None;
        self.state_history.clear();
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn start(&mut self) -> bool {
        let Some(scene) = &self.scene else { return false };
        let initial = scene.initial_state.clone();
        self.scene_start_time = Some(Utc::now());
        self.goto_state(&initial)
    }

    /// Moves to `state_name`, or to the terminal `END` pseudo-state.
    /// Returns `false` if `state_name` is neither `END` nor a defined state.
    pub fn goto_state(&mut self, state_name: &str) -> bool {
        if state_name == END_STATE {
            self.current_state = Some(END_STATE.to_string());
            self.state_start_time = None;
            return true;
        }

        let Some(scene) = &self.scene else { return false };
        if !scene.states.contains_key(state_name) {
            return false;
        }

        if let Some(current) = &self.current_state {
            if current != state_name {
                self.state_history.push(current.clone());
            }
        }

        self.current_state = Some(state_name.to_string());
        self.state_start_time = Some(Utc::now());
        true
    }

    pub fn current_state_name(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    pub fn current_state_data(&self) -> Option<&State> {
        let name = self.current_state.as_deref()?;
        if name == END_STATE {
            return None;
        }
        self.scene.as_ref()?.states.get(name)
    }

    pub fn global_events(&self) -> &[crate::scene::model::Transition] {
        self.scene
            .as_ref()
            .map(|s| s.global_events.as_slice())
            .unwrap_or(&[])
    }

    pub fn elapsed_in_state(&self) -> f64 {
        self.state_start_time
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn elapsed_in_scene(&self) -> f64 {
        self.scene_start_time
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn is_finished(&self) -> bool {
        self.current_state.as_deref() == Some(END_STATE)
    }

    pub fn state_history(&self) -> &[String] {
        &self.state_history
    }

    pub fn progress_info(&self) -> ProgressInfo {
        let scene_id = self
            .scene
            .as_ref()
            .map(|s| s.scene_id.clone())
            .unwrap_or_default();
        let total_states = self
            .scene
            .as_ref()
            .map(|s| s.states.keys().filter(|k| k.as_str() != END_STATE).count())
            .unwrap_or(0);
        let description = if self.is_finished() {
            "Finished".to_string()
        } else {
            self.current_state_data()
                .map(|s| s.description.clone())
                .unwrap_or_default()
        };

        ProgressInfo {
            scene_running: !self.is_finished() && self.current_state.is_some(),
            scene_id,
            current_state: self.current_state.clone(),
            state_description: description,
            states_completed: self.state_history.len(),
            total_states,
            state_elapsed: (self.elapsed_in_state() * 10.0).round() / 10.0,
            scene_elapsed: (self.elapsed_in_scene() * 10.0).round() / 10.0,
            progress: (self.state_history.len() as f64 / total_states.max(1) as f64).min(1.0),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::validator::load_scene_json;

    fn scene_json() -> &'static str {
        r#"{
            "sceneId": "intro",
            "initialState": "s1",
            "states": {
                "s1": { "transitions": [{"type": "always", "goto": "s2"}] },
                "s2": { "transitions": [{"type": "always", "goto": "END"}] }
            }
        }"#
    }

    #[test]
    fn start_enters_initial_state() {
        let mut sm = StateMachine::new();
        sm.load(load_scene_json(scene_json()).unwrap());
        assert!(sm.start());
        assert_eq!(sm.current_state_name(), Some("s1"));
        assert!(!sm.is_finished());
    }

    #[test]
    fn goto_end_finishes_without_history_entry() {
        let mut sm = StateMachine::new();
        sm.load(load_scene_json(scene_json()).unwrap());
        sm.start();
        assert!(sm.goto_state("END"));
        assert!(sm.is_finished());
        assert!(!sm.state_history().contains(&"END".to_string()));
    }

    #[test]
    fn history_records_visited_states() {
        let mut sm = StateMachine::new();
        sm.load(load_scene_json(scene_json()).unwrap());
        sm.start();
        sm.goto_state("s2");
        assert_eq!(sm.state_history(), &["s1".to_string()]);
    }

    #[test]
    fn goto_unknown_state_fails() {
        let mut sm = StateMachine::new();
        sm.load(load_scene_json(scene_json()).unwrap());
        sm.start();
        assert!(!sm.goto_state("ghost"));
        assert_eq!(sm.current_state_name(), Some("s1"));
    }

    #[test]
    fn progress_info_reports_completion_ratio() {
        let mut sm = StateMachine::new();
        sm.load(load_scene_json(scene_json()).unwrap());
        sm.start();
        sm.goto_state("s2");
        let info = sm.progress_info();
        assert_eq!(info.states_completed, 1);
        assert_eq!(info.total_states, 2);
        assert!((info.progress - 0.5).abs() < 1e-9);
    }
}
