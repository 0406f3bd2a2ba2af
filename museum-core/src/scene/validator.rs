//! Semantic + referential validation run once when a scene is loaded.
//! Structural validation (required fields, enum values, unknown keys) is
//! obtained for free from `serde`'s derived `Deserialize` plus
//! `#[serde(deny_unknown_fields)]`-equivalent strictness built into the
//! model's tagged enums; what remains here is the checks a type system
//! can't express: every `mqtt` action's topic/payload pair, and every
//! `goto` resolving to a real state.

use crate::error::{ControllerError, ControllerResult};
use crate::mqtt::topic_contract::{validate_publish, Payload};
use crate::scene::model::{Action, ActionValue, Scene, END_STATE};

fn validate_action_semantics(scene_id: &str, action: &Action) -> ControllerResult<()> {
    if let Action::Mqtt { topic, message, .. } = action {
        if topic.trim().is_empty() {
            return Err(ControllerError::SceneSchema {
                scene: scene_id.to_string(),
                reason: "mqtt action has an empty topic".to_string(),
            });
        }
        if message.is_empty_text() {
            return Err(ControllerError::SceneSchema {
                scene: scene_id.to_string(),
                reason: format!("mqtt action on '{topic}' has an empty message"),
            });
        }
        let payload = match message {
            ActionValue::Text(s) => Payload::Text(s),
            ActionValue::Number(n) => Payload::Number(*n),
            ActionValue::Bool(b) => Payload::Bool(*b),
        };
        validate_publish(topic, &payload).map_err(|reason| ControllerError::SceneSchema {
            scene: scene_id.to_string(),
            reason,
        })?;
    }
    Ok(())
}

/// Walks every action embedded anywhere in the scene (`onEnter`, `onExit`,
/// `timeline`) and validates `mqtt` actions against the topic contract.
fn validate_mqtt_actions(scene: &Scene) -> ControllerResult<()> {
    for state in scene.states.values() {
        for action in state.on_enter.iter().chain(state.on_exit.iter()) {
            validate_action_semantics(&scene.scene_id, action)?;
        }
        for item in &state.timeline {
            for action in item.actions() {
                validate_action_semantics(&scene.scene_id, action)?;
            }
        }
    }
    Ok(())
}

/// Every `transition.goto` / `globalEvents[*].goto` must be `"END"` or a
/// defined state name.
fn validate_referential_integrity(scene: &Scene) -> ControllerResult<()> {
    if !scene.states.contains_key(&scene.initial_state) {
        return Err(ControllerError::SceneReferential {
            scene: scene.scene_id.clone(),
            reason: format!("initial state '{}' is not defined", scene.initial_state),
        });
    }

    for (state_name, state) in &scene.states {
        for (idx, transition) in state.transitions.iter().enumerate() {
            let goto = transition.goto();
            if goto != END_STATE && !scene.states.contains_key(goto) {
                return Err(ControllerError::SceneReferential {
                    scene: scene.scene_id.clone(),
                    reason: format!(
                        "state '{state_name}': transition #{idx} targets unknown state '{goto}'"
                    ),
                });
            }
        }
    }

    for (idx, event) in scene.global_events.iter().enumerate() {
        let goto = event.goto();
        if goto != END_STATE && !scene.states.contains_key(goto) {
            return Err(ControllerError::SceneReferential {
                scene: scene.scene_id.clone(),
                reason: format!("globalEvent #{idx} targets unknown state '{goto}'"),
            });
        }
    }

    Ok(())
}

/// Parses and fully validates a scene from its JSON text.
pub fn load_scene_json(text: &str) -> ControllerResult<Scene> {
    let scene: Scene = serde_json::from_str(text)?;
    if scene.states.is_empty() {
        return Err(ControllerError::SceneSchema {
            scene: scene.scene_id,
            reason: "scene defines no states".to_string(),
        });
    }
    validate_mqtt_actions(&scene)?;
    validate_referential_integrity(&scene)?;
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scene() -> String {
        r#"{
            "sceneId": "intro",
            "initialState": "s1",
            "globalEvents": [
                {"type": "mqttMessage", "topic": "room1/emergency", "message": "ON", "goto": "END"}
            ],
            "states": {
                "s1": {
                    "onEnter": [
                        {"action": "mqtt", "topic": "room1/light", "message": "ON"},
                        {"action": "audio", "message": "PLAY:welcome.mp3:0.8"}
                    ],
                    "timeline": [
                        {"at": 3.0, "action": "mqtt", "topic": "room1/motor", "message": "ON:80:L"}
                    ],
                    "transitions": [
                        {"type": "audioEnd", "target": "welcome.mp3", "goto": "s2"},
                        {"type": "timeout", "delay": 15, "goto": "s2"}
                    ],
                    "onExit": [
                        {"action": "mqtt", "topic": "room1/motor", "message": "STOP"}
                    ]
                },
                "s2": {
                    "onEnter": [
                        {"action": "mqtt", "topic": "room1/light", "message": "OFF"}
                    ],
                    "transitions": [
                        {"type": "always", "goto": "END"}
                    ]
                }
            }
        }"#
        .to_string()
    }

    #[test]
    fn loads_a_well_formed_scene() {
        let scene = load_scene_json(&sample_scene()).unwrap();
        assert_eq!(scene.scene_id, "intro");
        assert_eq!(scene.states.len(), 2);

        let s1 = &scene.states["s1"];
        assert_eq!(s1.on_enter.len(), 2);
        assert_eq!(s1.on_exit.len(), 1);
        assert_eq!(s1.timeline.len(), 1);
        let timeline_item = &s1.timeline[0];
        assert_eq!(timeline_item.at, 3.0);
        assert!(matches!(timeline_item.actions().as_slice(), [Action::Mqtt { topic, .. }] if topic == "room1/motor"));
    }

    #[test]
    fn rejects_dangling_transition_target() {
        let mut broken = sample_scene();
        broken = broken.replace(r#""goto": "s2""#, r#""goto": "s99""#);
        let result = load_scene_json(&broken);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_mqtt_payload() {
        let broken = sample_scene().replace(r#""message": "ON""#, r#""message": "GARBAGE""#);
        let result = load_scene_json(&broken);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_initial_state() {
        let broken = sample_scene().replace(r#""initialState": "s1""#, r#""initialState": "nope""#);
        let result = load_scene_json(&broken);
        assert!(result.is_err());
    }
}
