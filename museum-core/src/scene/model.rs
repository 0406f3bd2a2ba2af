//! Declarative scene data types, deserialized directly from the scene JSON
//! format (see the canonical example in the external-interfaces section of
//! the project's specification documents).

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Mqtt {
        topic: String,
        message: ActionValue,
        #[serde(default)]
        retain: bool,
    },
    Audio {
        message: ActionValue,
    },
    Video {
        message: ActionValue,
    },
}

/// A scene-authored payload value: string, number, or boolean. Canonicalized
/// to a string at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl ActionValue {
    pub fn as_text(&self) -> String {
        match self {
            ActionValue::Text(s) => s.clone(),
            ActionValue::Number(n) => n.to_string(),
            ActionValue::Bool(b) => b.to_string(),
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, ActionValue::Text(s) if s.trim().is_empty())
    }
}

/// A timeline entry. Authored either with a single action inlined directly
/// into the item (`{"at":3.0,"action":"mqtt","topic":"...","message":"..."}`)
/// or with a grouped list (`{"at":2.0,"actions":[{...},{...}]}`). The two
/// forms can't share one derived `Deserialize` impl: `action` here is the
/// flattened tag of an internally-tagged [`Action`], not a nested object, so
/// `TimelineItem` deserializes by hand instead.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TimelineItem {
    pub at: f64,
    #[serde(flatten)]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
}

impl<'de> Deserialize<'de> for TimelineItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let at = value.get("at").and_then(serde_json::Value::as_f64).unwrap_or(0.0);

        if let Some(actions_value) = value.get("actions") {
            let actions: Vec<Action> =
                serde_json::from_value(actions_value.clone()).map_err(DeError::custom)?;
            return Ok(TimelineItem { at, action: None, actions: Some(actions) });
        }

        if value.get("action").is_some() {
            let action: Action = serde_json::from_value(value).map_err(DeError::custom)?;
            return Ok(TimelineItem { at, action: Some(action), actions: None });
        }

        Ok(TimelineItem { at, action: None, actions: None })
    }
}

impl TimelineItem {
    /// The actions this item fires, whether authored as a single `action`
    /// or a grouped `actions` list.
    pub fn actions(&self) -> Vec<&Action> {
        match (&self.action, &self.actions) {
            (Some(single), _) => vec![single],
            (None, Some(group)) => group.iter().collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Transition {
    Timeout {
        #[serde(default)]
        delay: f64,
        goto: String,
    },
    AudioEnd {
        target: String,
        goto: String,
    },
    VideoEnd {
        target: String,
        goto: String,
    },
    MqttMessage {
        topic: String,
        message: String,
        goto: String,
    },
    Always {
        goto: String,
    },
}

impl Transition {
    pub fn goto(&self) -> &str {
        match self {
            Transition::Timeout { goto, .. }
            | Transition::AudioEnd { goto, .. }
            | Transition::VideoEnd { goto, .. }
            | Transition::MqttMessage { goto, .. }
            | Transition::Always { goto } => goto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub on_enter: Vec<Action>,
    #[serde(default)]
    pub on_exit: Vec<Action>,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "sceneId")]
    pub scene_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "initialState")]
    pub initial_state: String,
    #[serde(rename = "globalEvents", default)]
    pub global_events: Vec<Transition>,
    pub states: HashMap<String, State>,
}

pub const END_STATE: &str = "END";
