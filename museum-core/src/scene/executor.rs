//! Runs a state's `onEnter`/`onExit` actions and its `timeline`, dispatching
//! each action by its `action` tag. Timeline items fire at most once per
//! state visit, identified by their position and trigger time rather than
//! object identity (Rust has no `id()` equivalent worth relying on here).

use crate::audio::engine::AudioEngine;
use crate::mqtt::client::MqttClient;
use crate::mqtt::topic_contract::{validate_publish, Payload};
use crate::scene::model::{Action, ActionValue, State};
use crate::video::engine::VideoEngine;
use crate::{log_debug, log_error, log_warn};
use std::collections::HashSet;
use std::sync::Arc;

pub struct StateExecutor {
    mqtt_client: Option<Arc<MqttClient>>,
    audio_engine: Option<Arc<AudioEngine>>,
    video_engine: Option<Arc<VideoEngine>>,
    fired_timeline_items: HashSet<(usize, u64)>,
}

impl StateExecutor {
    pub fn new(
        mqtt_client: Option<Arc<MqttClient>>,
        audio_engine: Option<Arc<AudioEngine>>,
        video_engine: Option<Arc<VideoEngine>>,
    ) -> Self {
        StateExecutor {
            mqtt_client,
            audio_engine,
            video_engine,
            fired_timeline_items: HashSet::new(),
        }
    }

    pub async fn execute_on_enter(&self, state: &State) {
        if state.on_enter.is_empty() {
            return;
        }
        log_debug!("Executing onEnter: {} actions", state.on_enter.len());
        for action in &state.on_enter {
            self.execute_action(action).await;
        }
    }

    pub async fn execute_on_exit(&self, state: &State) {
        if state.on_exit.is_empty() {
            return;
        }
        log_debug!("Executing onExit: {} actions", state.on_exit.len());
        for action in &state.on_exit {
            self.execute_action(action).await;
        }
    }

    /// Runs every timeline item whose `at` has elapsed and that hasn't
    /// already fired during this state visit.
    pub async fn check_and_execute_timeline(&mut self, state: &State, state_elapsed: f64) {
        for (index, item) in state.timeline.iter().enumerate() {
            let identity = (index, item.at.to_bits());
            if self.fired_timeline_items.contains(&identity) {
                continue;
            }
            if state_elapsed >= item.at {
                log_debug!("Timeline trigger at {}s", item.at);
                for action in item.actions() {
                    self.execute_action(action).await;
                }
                self.fired_timeline_items.insert(identity);
            }
        }
    }

    pub fn reset_timeline_tracking(&mut self) {
        self.fired_timeline_items.clear();
    }

    async fn execute_action(&self, action: &Action) {
        match action {
            Action::Mqtt { topic, message, .. } => self.execute_mqtt(topic, message).await,
            Action::Audio { message } => self.execute_audio(message),
            Action::Video { message } => self.execute_video(message),
        }
    }

    async fn execute_mqtt(&self, topic: &str, message: &ActionValue) {
        if topic.trim().is_empty() {
            log_error!("MQTT action ignored: invalid or empty topic");
            return;
        }
        if message.is_empty_text() {
            log_error!("MQTT action ignored: message is empty for topic {topic}");
            return;
        }

        let payload = match message {
            ActionValue::Text(s) => Payload::Text(s),
            ActionValue::Number(n) => Payload::Number(*n),
            ActionValue::Bool(b) => Payload::Bool(*b),
        };
        if let Err(e) = validate_publish(topic, &payload) {
            log_error!("MQTT action ignored by contract validation: {e}");
            return;
        }

        let text = message.as_text();
        match &self.mqtt_client {
            Some(client) if client.is_connected() => {
                if client.publish(topic, &text).await {
                    log_debug!("MQTT: {topic} = {text}");
                } else {
                    log_error!("MQTT publish failed: {topic}");
                }
            }
            _ => log_warn!("MQTT not connected (simulation): {topic} = {text}"),
        }
    }

    fn execute_audio(&self, message: &ActionValue) {
        if message.is_empty_text() {
            log_error!("Audio action missing message");
            return;
        }
        let text = message.as_text();
        match &self.audio_engine {
            Some(engine) => match engine.handle_command(&text) {
                Ok(()) => log_debug!("Audio: {text}"),
                Err(e) => log_error!("Audio command failed: {text} ({e})"),
            },
            None => log_warn!("No audio handler (simulation): {text}"),
        }
    }

    fn execute_video(&self, message: &ActionValue) {
        if message.is_empty_text() {
            log_error!("Video action missing message");
            return;
        }
        let text = message.as_text();
        match &self.video_engine {
            Some(engine) => match engine.handle_command(&text) {
                Ok(()) => log_debug!("Video: {text}"),
                Err(e) => log_error!("Video command failed: {text} ({e})"),
            },
            None => log_warn!("No video handler (simulation): {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::model::TimelineItem;

    fn mqtt_action(topic: &str, message: &str) -> Action {
        Action::Mqtt {
            topic: topic.to_string(),
            message: ActionValue::Text(message.to_string()),
            retain: false,
        }
    }

    #[tokio::test]
    async fn timeline_item_fires_at_most_once_per_visit() {
        let mut executor = StateExecutor::new(None, None, None);
        let state = State {
            timeline: vec![TimelineItem {
                at: 0.0,
                action: Some(mqtt_action("room1/light", "ON")),
                actions: None,
            }],
            ..Default::default()
        };

        executor.check_and_execute_timeline(&state, 0.0).await;
        assert_eq!(executor.fired_timeline_items.len(), 1);
        executor.check_and_execute_timeline(&state, 1.0).await;
        assert_eq!(executor.fired_timeline_items.len(), 1);
    }

    #[tokio::test]
    async fn reset_timeline_tracking_allows_refiring_on_next_visit() {
        let mut executor = StateExecutor::new(None, None, None);
        let state = State {
            timeline: vec![TimelineItem {
                at: 0.0,
                action: Some(mqtt_action("room1/light", "ON")),
                actions: None,
            }],
            ..Default::default()
        };
        executor.check_and_execute_timeline(&state, 0.0).await;
        executor.reset_timeline_tracking();
        assert_eq!(executor.fired_timeline_items.len(), 0);
        executor.check_and_execute_timeline(&state, 0.0).await;
        assert_eq!(executor.fired_timeline_items.len(), 1);
    }

    #[tokio::test]
    async fn does_not_panic_without_any_engines_wired() {
        let executor = StateExecutor::new(None, None, None);
        let state = State {
            on_enter: vec![mqtt_action("room1/light", "ON")],
            ..Default::default()
        };
        executor.execute_on_enter(&state).await;
    }
}
