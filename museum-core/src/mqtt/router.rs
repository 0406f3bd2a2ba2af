//! Single demux point for incoming MQTT messages: device presence,
//! feedback, the remote scene trigger, and everything else becomes a
//! transition-manager `mqttMessage` event.

use crate::log_debug;
use crate::mqtt::client::IncomingMessage;
use crate::mqtt::device_registry::DeviceRegistry;
use crate::mqtt::feedback_tracker::FeedbackTracker;
use crate::mqtt::topic_contract::scene_topic;
use crate::scene::transitions::TransitionManager;
use std::sync::Arc;

/// What the router decided to do with a message, useful for tests and for
/// the controller to log remote triggers distinctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    DeviceStatus,
    Feedback,
    SceneTrigger,
    TransitionEvent,
}

pub struct MessageRouter {
    device_registry: Arc<DeviceRegistry>,
    feedback_tracker: Arc<FeedbackTracker>,
    transitions: Arc<TransitionManager>,
    room_id: String,
}

impl MessageRouter {
    pub fn new(
        device_registry: Arc<DeviceRegistry>,
        feedback_tracker: Arc<FeedbackTracker>,
        transitions: Arc<TransitionManager>,
        room_id: impl Into<String>,
    ) -> Self {
        MessageRouter {
            device_registry,
            feedback_tracker,
            transitions,
            room_id: room_id.into(),
        }
    }

    /// Routes one incoming message, returning a callback request if the
    /// message is a remote scene trigger (the caller owns admission).
    pub fn route(&self, msg: &IncomingMessage) -> RouteOutcome {
        let parts: Vec<&str> = msg.topic.split('/').collect();

        if parts.len() == 3 && parts[0] == "devices" && parts[2] == "status" {
            self.device_registry
                .update_device_status(parts[1], &msg.payload, msg.retained);
            return RouteOutcome::DeviceStatus;
        }

        if msg.topic.ends_with("/feedback") {
            self.feedback_tracker.handle_incoming(&msg.topic, &msg.payload);
            return RouteOutcome::Feedback;
        }

        if msg.topic == scene_topic(&self.room_id) && msg.payload.eq_ignore_ascii_case("START") {
            return RouteOutcome::SceneTrigger;
        }

        self.transitions.register_mqtt_event(&msg.topic, &msg.payload);
        log_debug!("Unhandled message on {}: {}", msg.topic, msg.payload);
        RouteOutcome::TransitionEvent
    }
}
