//! Owns the three event FIFOs (`mqttMessage`, `audioEnd`, `videoEnd`) and
//! evaluates a state's `transitions` list in source order, first match
//! wins. Global events are evaluated separately, after per-state
//! transitions, by the Scene Runner.

use crate::log_info;
use crate::scene::model::Transition;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MqttEvent {
    topic: String,
    message: String,
}

struct Events {
    mqtt: Vec<MqttEvent>,
    audio_end: Vec<String>,
    video_end: Vec<String>,
}

pub struct TransitionManager {
    events: Mutex<Events>,
}

impl TransitionManager {
    pub fn new() -> Self {
        TransitionManager {
            events: Mutex::new(Events {
                mqtt: Vec::new(),
                audio_end: Vec::new(),
                video_end: Vec::new(),
            }),
        }
    }

    pub fn register_mqtt_event(&self, topic: &str, message: &str) {
        self.events.lock().unwrap().mqtt.push(MqttEvent {
            topic: topic.to_string(),
            message: message.to_string(),
        });
    }

    pub fn register_audio_end(&self, file: &str) {
        self.events.lock().unwrap().audio_end.push(file.to_string());
    }

    pub fn register_video_end(&self, file: &str) {
        self.events.lock().unwrap().video_end.push(file.to_string());
    }

    pub fn clear_events(&self) {
        let mut events = self.events.lock().unwrap();
        events.mqtt.clear();
        events.audio_end.clear();
        events.video_end.clear();
    }

    #[cfg(test)]
    pub fn has_mqtt_event(&self, topic: &str, message: &str) -> bool {
        self.events.lock().unwrap().mqtt.iter().any(|e| e.topic == topic && e.message == message)
    }

    /// Evaluates `transitions` in order, consuming the first matching
    /// event (if any) and returning its `goto`. `always` fires
    /// unconditionally the moment it is evaluated.
    pub fn check_transitions(&self, transitions: &[Transition], state_elapsed: f64) -> Option<String> {
        for transition in transitions {
            let hit = match transition {
                Transition::Timeout { delay, goto } => {
                    if state_elapsed >= *delay {
                        log_info!("Timeout triggered ({delay}s) -> {goto}");
                        Some(goto.clone())
                    } else {
                        None
                    }
                }
                Transition::AudioEnd { target, goto } => self.consume_media_end(true, target).then(|| {
                    log_info!("AudioEnd triggered ({target}) -> {goto}");
                    goto.clone()
                }),
                Transition::VideoEnd { target, goto } => self.consume_media_end(false, target).then(|| {
                    log_info!("VideoEnd triggered ({target}) -> {goto}");
                    goto.clone()
                }),
                Transition::MqttMessage { topic, message, goto } => {
                    self.consume_mqtt_event(topic, message).then(|| {
                        log_info!("MQTT triggered ({topic}={message}) -> {goto}");
                        goto.clone()
                    })
                }
                Transition::Always { goto } => Some(goto.clone()),
            };
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    fn consume_media_end(&self, audio: bool, target: &str) -> bool {
        let mut events = self.events.lock().unwrap();
        let list = if audio { &mut events.audio_end } else { &mut events.video_end };
        if let Some(pos) = list.iter().position(|f| f == target) {
            list.remove(pos);
            true
        } else {
            false
        }
    }

    fn consume_mqtt_event(&self, topic: &str, message: &str) -> bool {
        let mut events = self.events.lock().unwrap();
        if let Some(pos) = events
            .mqtt
            .iter()
            .position(|e| e.topic == topic && e.message == message)
        {
            events.mqtt.remove(pos);
            true
        } else {
            false
        }
    }
}

impl Default for TransitionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_fires_once_elapsed_exceeds_delay() {
        let tm = TransitionManager::new();
        let transitions = vec![Transition::Timeout { delay: 2.0, goto: "s2".into() }];
        assert_eq!(tm.check_transitions(&transitions, 1.0), None);
        assert_eq!(tm.check_transitions(&transitions, 2.0), Some("s2".to_string()));
    }

    #[test]
    fn timeout_zero_fires_immediately() {
        let tm = TransitionManager::new();
        let transitions = vec![Transition::Timeout { delay: 0.0, goto: "s2".into() }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), Some("s2".to_string()));
    }

    #[test]
    fn audio_end_consumes_event_exactly_once() {
        let tm = TransitionManager::new();
        tm.register_audio_end("welcome.mp3");
        let transitions = vec![Transition::AudioEnd { target: "welcome.mp3".into(), goto: "s2".into() }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), Some("s2".to_string()));
        assert_eq!(tm.check_transitions(&transitions, 0.0), None);
    }

    #[test]
    fn mqtt_message_requires_exact_topic_and_payload_match() {
        let tm = TransitionManager::new();
        tm.register_mqtt_event("room1/emergency", "ON");
        let transitions = vec![Transition::MqttMessage {
            topic: "room1/emergency".into(),
            message: "OFF".into(),
            goto: "END".into(),
        }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), None);

        let transitions = vec![Transition::MqttMessage {
            topic: "room1/emergency".into(),
            message: "ON".into(),
            goto: "END".into(),
        }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), Some("END".to_string()));
    }

    #[test]
    fn always_fires_unconditionally() {
        let tm = TransitionManager::new();
        let transitions = vec![Transition::Always { goto: "END".into() }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), Some("END".to_string()));
    }

    #[test]
    fn first_match_wins_in_source_order() {
        let tm = TransitionManager::new();
        let transitions = vec![
            Transition::Timeout { delay: 0.0, goto: "first".into() },
            Transition::Always { goto: "second".into() },
        ];
        assert_eq!(tm.check_transitions(&transitions, 0.0), Some("first".to_string()));
    }

    #[test]
    fn clear_events_drops_all_queues() {
        let tm = TransitionManager::new();
        tm.register_mqtt_event("t", "m");
        tm.register_audio_end("a.mp3");
        tm.register_video_end("v.mp4");
        tm.clear_events();
        assert!(!tm.has_mqtt_event("t", "m"));
        let transitions = vec![Transition::AudioEnd { target: "a.mp3".into(), goto: "x".into() }];
        assert_eq!(tm.check_transitions(&transitions, 0.0), None);
    }
}
