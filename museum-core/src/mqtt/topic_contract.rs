//! Central place for MQTT topic classification and publish validation.
//! Keeps existing scene/message formats working while giving every other
//! component one place to ask "is this topic/payload combination legal".

use regex::Regex;
use std::sync::OnceLock;

/// Bucket a topic falls into. `Invalid`/`Unknown` topics fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Invalid,
    Unknown,
    DeviceStatus,
    Feedback,
    SceneStart,
    NamedScene,
    Motor,
    Light,
    Effects,
    Emergency,
    GlobalStop,
    RoomGeneric,
}

struct Patterns {
    room_prefix: Regex,
    device_status: Regex,
    room_feedback: Regex,
    room_scene: Regex,
    room_start_scene: Regex,
    room_light: Regex,
    room_motor: Regex,
    room_effects: Regex,
    room_emergency: Regex,
    on_off: Regex,
    speed: Regex,
    motor_on_complex: Regex,
}

const RESERVED_ROOM_NAMESPACES: &[&str] = &[
    "light",
    "motor",
    "effect",
    "effects",
    "scene",
    "start_scene",
    "emergency",
];

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        room_prefix: Regex::new(r"^room[\w-]+").unwrap(),
        device_status: Regex::new(r"^devices/[^/]+/status$").unwrap(),
        room_feedback: Regex::new(r"^room[\w-]+/[^/]+(?:/[^/]+)*/feedback$").unwrap(),
        room_scene: Regex::new(r"^room[\w-]+/scene$").unwrap(),
        room_start_scene: Regex::new(r"^room[\w-]+/start_scene$").unwrap(),
        room_light: Regex::new(r"^room[\w-]+/light(?:/[^/]+)?$").unwrap(),
        room_motor: Regex::new(r"^room[\w-]+/motor(?:\d+)?$").unwrap(),
        room_effects: Regex::new(r"^room[\w-]+/effects?(?:/[^/]+)?$").unwrap(),
        room_emergency: Regex::new(r"^room[\w-]+/emergency$").unwrap(),
        on_off: Regex::new(r"(?i)^(ON|OFF)$").unwrap(),
        speed: Regex::new(r"(?i)^SPEED:\d{1,3}$").unwrap(),
        motor_on_complex: Regex::new(r"(?i)^ON:\d{1,3}:[LR](?::\d+)?$").unwrap(),
    })
}

/// Classifies `topic` into a known bucket, or `Unknown`/`Invalid`.
pub fn classify_topic(topic: &str) -> TopicKind {
    if topic.is_empty() {
        return TopicKind::Invalid;
    }
    let p = patterns();
    if p.device_status.is_match(topic) {
        return TopicKind::DeviceStatus;
    }
    if p.room_feedback.is_match(topic) {
        return TopicKind::Feedback;
    }
    if p.room_scene.is_match(topic) {
        return TopicKind::SceneStart;
    }
    if p.room_start_scene.is_match(topic) {
        return TopicKind::NamedScene;
    }
    if p.room_motor.is_match(topic) {
        return TopicKind::Motor;
    }
    if p.room_light.is_match(topic) {
        return TopicKind::Light;
    }
    if p.room_effects.is_match(topic) {
        return TopicKind::Effects;
    }
    if p.room_emergency.is_match(topic) {
        return TopicKind::Emergency;
    }
    if topic.ends_with("/STOP") {
        return TopicKind::GlobalStop;
    }
    if p.room_prefix.is_match(topic) {
        return TopicKind::RoomGeneric;
    }
    TopicKind::Unknown
}

fn is_reserved_room_namespace_typo(topic: &str) -> bool {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 2 {
        return false;
    }
    if !patterns().room_prefix.is_match(parts[0]) {
        return false;
    }
    let namespace = parts[1];
    RESERVED_ROOM_NAMESPACES
        .iter()
        .any(|reserved| namespace != *reserved && namespace.starts_with(reserved))
}

/// Topic-only check: is this a known, non-malformed topic shape.
pub fn validate_topic(topic: &str) -> Result<(), String> {
    let kind = classify_topic(topic);
    if matches!(kind, TopicKind::Invalid | TopicKind::Unknown) {
        return Err(format!("Unsupported MQTT topic format: {topic}"));
    }
    if kind == TopicKind::RoomGeneric && is_reserved_room_namespace_typo(topic) {
        return Err(format!(
            "Malformed room topic namespace (possible typo): {topic}"
        ));
    }
    Ok(())
}

/// Payload shapes the topic contract can check. Numeric/bool payloads are
/// always accepted, matching the original's backwards-compatibility rule
/// for schema-sourced actions.
#[derive(Debug, Clone)]
pub enum Payload<'a> {
    Text(&'a str),
    Number(f64),
    Bool(bool),
}

impl<'a> Payload<'a> {
    fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub fn validate_payload_for_topic(topic: &str, message: &Payload) -> Result<(), String> {
    let kind = classify_topic(topic);

    let text = match message.as_text() {
        None => return Ok(()),
        Some(t) => t,
    };
    let normalized = text.trim();
    if normalized.is_empty() {
        return Err(format!(
            "MQTT payload must be a non-empty string/number/bool for topic {topic}"
        ));
    }

    let p = patterns();
    match kind {
        TopicKind::Motor => {
            if p.on_off.is_match(normalized)
                || normalized.eq_ignore_ascii_case("STOP")
                || p.speed.is_match(normalized)
                || p.motor_on_complex.is_match(normalized)
            {
                Ok(())
            } else {
                Err(format!("Invalid motor payload '{text}' for topic {topic}"))
            }
        }
        TopicKind::Light | TopicKind::Effects | TopicKind::Emergency | TopicKind::GlobalStop => {
            let upper = normalized.to_ascii_uppercase();
            if p.on_off.is_match(normalized) || matches!(upper.as_str(), "STOP" | "RESET" | "BLINK") {
                Ok(())
            } else {
                Err(format!("Invalid on/off payload '{text}' for topic {topic}"))
            }
        }
        TopicKind::SceneStart => {
            if normalized.eq_ignore_ascii_case("START") {
                Ok(())
            } else {
                Err(format!(
                    "Scene trigger topic expects START payload, got '{text}'"
                ))
            }
        }
        TopicKind::NamedScene => {
            if normalized.ends_with(".json") {
                Ok(())
            } else {
                Err(format!(
                    "Named scene topic expects '<name>.json', got '{text}'"
                ))
            }
        }
        // Status/feedback/generic topics stay permissive for compatibility.
        _ => Ok(()),
    }
}

/// Combined topic+payload check for every publish path.
pub fn validate_publish(topic: &str, message: &Payload) -> Result<(), String> {
    validate_topic(topic)?;
    validate_payload_for_topic(topic, message)
}

/// Derives the expected feedback topic for a command topic, if any.
/// Used where the topic contract's bucket classification already applies
/// (scene-authored `mqtt` actions).
pub fn expected_feedback_topic(topic: &str) -> Option<String> {
    match classify_topic(topic) {
        TopicKind::Motor | TopicKind::Light | TopicKind::Effects | TopicKind::RoomGeneric => {
            Some(format!("{topic}/feedback"))
        }
        _ => None,
    }
}

/// The room's standard subscription set: device presence, per-room
/// feedback, the scene trigger topic, and a catch-all for transition
/// events and ad-hoc feedback under the room namespace.
pub fn room_subscriptions(room_id: &str) -> Vec<String> {
    vec![
        "devices/+/status".to_string(),
        format!("{room_id}/+/feedback"),
        format!("{room_id}/scene"),
        format!("{room_id}/#"),
    ]
}

pub fn scene_topic(room_id: &str) -> String {
    format!("{room_id}/scene")
}

/// Derives the feedback topic the feedback tracker should expect for any
/// published command topic, independent of the narrower bucket
/// classification above. Commands whose last path segment is a stop-like
/// keyword never expect feedback.
pub fn feedback_topic_for_command(original_topic: &str) -> Option<String> {
    let parts: Vec<&str> = original_topic.split('/').collect();
    if let Some(last) = parts.last() {
        if matches!(last.to_ascii_uppercase().as_str(), "STOP" | "RESET" | "GLOBAL") {
            return None;
        }
    }
    if parts.len() >= 2 && parts[0].starts_with("room") {
        return Some(format!("{original_topic}/feedback"));
    }
    if parts.len() >= 3 && parts[0] == "devices" {
        return Some(format!("{original_topic}/feedback"));
    }
    None
}

/// Recovers the original command topic from a `/feedback` topic, if any.
pub fn original_topic_from_feedback(feedback_topic: &str) -> Option<&str> {
    feedback_topic.strip_suffix("/feedback")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_buckets() {
        assert_eq!(classify_topic("devices/esp32_07/status"), TopicKind::DeviceStatus);
        assert_eq!(classify_topic("room1/motor/feedback"), TopicKind::Feedback);
        assert_eq!(classify_topic("room1/scene"), TopicKind::SceneStart);
        assert_eq!(classify_topic("room1/start_scene"), TopicKind::NamedScene);
        assert_eq!(classify_topic("room1/motor"), TopicKind::Motor);
        assert_eq!(classify_topic("room1/motor2"), TopicKind::Motor);
        assert_eq!(classify_topic("room1/light"), TopicKind::Light);
        assert_eq!(classify_topic("room1/light/strip1"), TopicKind::Light);
        assert_eq!(classify_topic("room1/effects"), TopicKind::Effects);
        assert_eq!(classify_topic("room1/emergency"), TopicKind::Emergency);
        assert_eq!(classify_topic("room1/STOP"), TopicKind::GlobalStop);
        assert_eq!(classify_topic("room1/fog"), TopicKind::RoomGeneric);
        assert_eq!(classify_topic("garbage"), TopicKind::Unknown);
        assert_eq!(classify_topic(""), TopicKind::Invalid);
    }

    #[test]
    fn rejects_reserved_namespace_typos() {
        assert!(validate_topic("room1/lightasdf/fire").is_err());
        assert!(validate_topic("room1/light").is_ok());
        assert!(validate_topic("room1/fog").is_ok());
    }

    #[test]
    fn validates_motor_payloads() {
        let ok = ["ON", "off", "STOP", "SPEED:80", "ON:80:L", "ON:80:R:500"];
        for payload in ok {
            assert!(
                validate_payload_for_topic("room1/motor", &Payload::Text(payload)).is_ok(),
                "expected {payload} to be valid"
            );
        }
        assert!(validate_payload_for_topic("room1/motor", &Payload::Text("FAST")).is_err());
    }

    #[test]
    fn validates_light_effects_emergency_payloads() {
        for topic in ["room1/light", "room1/effects", "room1/emergency", "room1/STOP"] {
            assert!(validate_payload_for_topic(topic, &Payload::Text("BLINK")).is_ok());
            assert!(validate_payload_for_topic(topic, &Payload::Text("GARBAGE")).is_err());
        }
    }

    #[test]
    fn validates_scene_and_named_scene_payloads() {
        assert!(validate_payload_for_topic("room1/scene", &Payload::Text("START")).is_ok());
        assert!(validate_payload_for_topic("room1/scene", &Payload::Text("GO")).is_err());
        assert!(
            validate_payload_for_topic("room1/start_scene", &Payload::Text("intro.json")).is_ok()
        );
        assert!(
            validate_payload_for_topic("room1/start_scene", &Payload::Text("intro")).is_err()
        );
    }

    #[test]
    fn numeric_and_bool_payloads_always_accepted() {
        assert!(validate_payload_for_topic("room1/motor", &Payload::Number(1.0)).is_ok());
        assert!(validate_payload_for_topic("room1/light", &Payload::Bool(true)).is_ok());
    }

    #[test]
    fn derives_expected_feedback_topic() {
        assert_eq!(
            expected_feedback_topic("room1/motor"),
            Some("room1/motor/feedback".to_string())
        );
        assert_eq!(expected_feedback_topic("room1/STOP"), None);
        assert_eq!(expected_feedback_topic("room1/scene"), None);
    }

    #[test]
    fn derives_feedback_topic_for_tracked_commands() {
        assert_eq!(
            feedback_topic_for_command("room1/motor"),
            Some("room1/motor/feedback".to_string())
        );
        assert_eq!(
            feedback_topic_for_command("devices/esp32_07/relay"),
            Some("devices/esp32_07/relay/feedback".to_string())
        );
        assert_eq!(feedback_topic_for_command("room1/STOP"), None);
        assert_eq!(feedback_topic_for_command("room1/motor/reset"), None);
    }

    #[test]
    fn recovers_original_topic_from_feedback() {
        assert_eq!(
            original_topic_from_feedback("room1/motor/feedback"),
            Some("room1/motor")
        );
        assert_eq!(original_topic_from_feedback("room1/motor"), None);
    }

    #[test]
    fn builds_room_subscriptions() {
        let subs = room_subscriptions("room1");
        assert_eq!(
            subs,
            vec![
                "devices/+/status".to_string(),
                "room1/+/feedback".to_string(),
                "room1/scene".to_string(),
                "room1/#".to_string(),
            ]
        );
    }
}
