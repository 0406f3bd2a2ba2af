//! Tracks published commands that expect an asynchronous confirmation on a
//! `/feedback` topic, and warns when none arrives in time. Active only
//! while a scene is running.
//!
//! Supersession (publishing twice to the same topic before feedback
//! arrives) is made race-free with a per-topic generation counter instead
//! of cancelling the previous timeout task: a superseded timer simply finds
//! its captured generation stale when it wakes up and does nothing.

use crate::mqtt::topic_contract::feedback_topic_for_command;
use crate::{log_debug, log_info, log_warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct PendingEntry {
    status_topic: String,
    issued_at: Instant,
    generation: u64,
}

struct Inner {
    enabled: bool,
    pending: HashMap<String, PendingEntry>,
    generations: HashMap<String, u64>,
}

pub struct FeedbackTracker {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl FeedbackTracker {
    pub fn new(timeout_secs: f64) -> Arc<Self> {
        Arc::new(FeedbackTracker {
            inner: Mutex::new(Inner {
                enabled: false,
                pending: HashMap::new(),
                generations: HashMap::new(),
            }),
            timeout: Duration::from_secs_f64(timeout_secs.max(0.0)),
        })
    }

    /// Enables tracking for a new scene, clearing any stale state.
    pub fn enable(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.enabled {
            inner.enabled = true;
            inner.pending.clear();
            inner.generations.clear();
            log_debug!("MQTT feedback tracking enabled");
        }
    }

    /// Disables tracking, logging every still-pending command once.
    pub fn disable(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.enabled {
            inner.enabled = false;
            for topic in inner.pending.keys() {
                log_warn!("Scene ended with pending feedback: {topic}");
            }
            inner.pending.clear();
            inner.generations.clear();
            log_debug!("MQTT feedback tracking disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap().enabled
    }

    fn should_expect_feedback(&self, topic: &str) -> bool {
        if topic.ends_with("/audio") || topic.ends_with("/video") {
            return false;
        }
        if topic.ends_with("/status") || topic.contains("/status") {
            return false;
        }
        true
    }

    /// Records that `topic` was just published and arms a timeout. Spawns
    /// a short-lived timer task; the caller must be on a tokio runtime.
    pub fn track_published(self: &Arc<Self>, topic: &str) {
        if !self.should_expect_feedback(topic) {
            return;
        }
        let status_topic = match feedback_topic_for_command(topic) {
            Some(t) => t,
            None => return,
        };

        let generation = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.enabled {
                return;
            }
            let gen = inner.generations.entry(topic.to_string()).or_insert(0);
            *gen += 1;
            let generation = *gen;
            inner.pending.insert(
                topic.to_string(),
                PendingEntry {
                    status_topic: status_topic.clone(),
                    issued_at: Instant::now(),
                    generation,
                },
            );
            generation
        };

        log_debug!("Sent: {topic} -> expecting feedback on: {status_topic}");

        let tracker = self.clone();
        let topic = topic.to_string();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout + Duration::from_millis(100)).await;
            tracker.fire_timeout(&topic, generation);
        });
    }

    fn fire_timeout(&self, topic: &str, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.enabled {
            return;
        }
        let still_current = inner
            .pending
            .get(topic)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false);
        if still_current {
            if let Some(entry) = inner.pending.remove(topic) {
                let elapsed = entry.issued_at.elapsed().as_secs_f64();
                log_warn!("Feedback TIMEOUT: {topic} (>{elapsed:.3}s)");
            }
        }
    }

    /// Processes an incoming message on a `/feedback` topic, resolving any
    /// pending command whose expected feedback topic matches.
    pub fn handle_incoming(&self, topic: &str, payload: &str) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.enabled {
            return;
        }
        let matched_topic = inner
            .pending
            .iter()
            .find(|(_, entry)| entry.status_topic == topic)
            .map(|(t, _)| t.clone());

        match matched_topic {
            Some(t) => {
                let entry = inner.pending.remove(&t).unwrap();
                let elapsed = entry.issued_at.elapsed().as_secs_f64();
                if payload.eq_ignore_ascii_case("OK") {
                    log_info!("Feedback OK: {t} ({elapsed:.3}s)");
                } else {
                    log_warn!("Feedback ERROR: {t} -> '{payload}' ({elapsed:.3}s)");
                }
            }
            None => log_debug!("Unexpected feedback on {topic}: {payload}"),
        }
    }
}
