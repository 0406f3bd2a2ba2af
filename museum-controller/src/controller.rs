//! Wires every subsystem together: config, MQTT session, device registry,
//! feedback tracking, the scene runner, and the button driver. Runs the
//! ~1 Hz health loop and forwards both trigger sources (button, remote
//! `<room>/scene = START`) into the same `start_scene` path.

use crate::button::ButtonDriver;
use museum_core::config::RoomConfig;
use museum_core::error::ControllerResult;
use museum_core::mqtt::client::{MqttClient, MqttSettings};
use museum_core::mqtt::device_registry::DeviceRegistry;
use museum_core::mqtt::feedback_tracker::FeedbackTracker;
use museum_core::mqtt::router::{MessageRouter, RouteOutcome};
use museum_core::scene::runner::SceneRunner;
use museum_core::scene::transitions::TransitionManager;
use museum_core::video::engine::VideoEngine;
use museum_core::{log_error, log_info, log_warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Controller {
    config: RoomConfig,
    mqtt_client: Option<Arc<MqttClient>>,
    device_registry: Arc<DeviceRegistry>,
    router: MessageRouter,
    scene_runner: Arc<SceneRunner>,
    button: Box<dyn ButtonDriver>,
    shutdown: Arc<AtomicBool>,
}

impl Controller {
    pub async fn start(config: RoomConfig, button: Box<dyn ButtonDriver>) -> ControllerResult<Arc<Self>> {
        let room_id = config.room.id.clone();
        let shutdown = Arc::new(AtomicBool::new(false));

        let feedback_tracker = FeedbackTracker::new(config.mqtt.feedback_timeout_secs);
        let device_registry = Arc::new(DeviceRegistry::new(config.mqtt.device_timeout_secs));
        let transitions = Arc::new(TransitionManager::new());

        let settings = MqttSettings {
            broker_host: config.mqtt.broker_host.clone(),
            broker_port: config.mqtt.broker_port,
            room_id: room_id.clone(),
            retry_attempts: config.mqtt.retry_attempts,
            retry_sleep: Duration::from_secs_f64(config.mqtt.retry_sleep_secs),
            connect_timeout: Duration::from_secs_f64(config.mqtt.connect_timeout_secs),
            check_interval: Duration::from_secs_f64(config.mqtt.check_interval_secs),
        };
        let (mqtt_client, mut incoming) = MqttClient::new(settings, feedback_tracker.clone());

        if !mqtt_client.establish_initial_connection(&shutdown).await {
            log_error!("Starting with MQTT unavailable; scenes will run in simulation mode");
        }

        let router = MessageRouter::new(
            device_registry.clone(),
            feedback_tracker.clone(),
            transitions.clone(),
            room_id.clone(),
        );

        let audio_engine = Some(Arc::new(museum_core::audio::engine::AudioEngine::new(
            config.paths.audio_dir.clone(),
            &config.audio,
        )));
        let video_engine = Some(Arc::new(VideoEngine::new(
            config.paths.videos_dir.clone(),
            &config.video,
        )));

        let scene_runner = Arc::new(SceneRunner::new(
            room_id.clone(),
            config.paths.scenes_dir.clone(),
            config.system.tick_hz,
            transitions.clone(),
            feedback_tracker.clone(),
            Some(mqtt_client.clone()),
            audio_engine,
            video_engine,
        ));

        let controller = Arc::new(Controller {
            config,
            mqtt_client: Some(mqtt_client),
            device_registry,
            router,
            scene_runner,
            button,
            shutdown,
        });

        let trigger_runner = controller.scene_runner.clone();
        let trigger_default_scene = controller.config.room.default_scene.clone();
        controller.button.set_callback(Box::new(move || {
            log_info!("Button pressed, starting default scene");
            if let Err(e) = trigger_runner.start_scene(&strip_json_suffix(&trigger_default_scene)) {
                log_warn!("Button trigger ignored: {e}");
            }
        }));

        let incoming_runner = controller.clone();
        tokio::spawn(async move {
            while let Some(msg) = incoming.recv().await {
                incoming_runner.handle_incoming(msg).await;
            }
        });

        Ok(controller)
    }

    async fn handle_incoming(&self, msg: museum_core::mqtt::client::IncomingMessage) {
        match self.router.route(&msg) {
            RouteOutcome::SceneTrigger => {
                let default_scene = strip_json_suffix(&self.config.room.default_scene);
                if let Err(e) = self.scene_runner.start_scene(&default_scene) {
                    log_warn!("Remote scene trigger dropped: {e}");
                }
            }
            RouteOutcome::DeviceStatus | RouteOutcome::Feedback | RouteOutcome::TransitionEvent => {}
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn scene_runner(&self) -> &Arc<SceneRunner> {
        &self.scene_runner
    }

    /// The ~1 Hz loop: MQTT reconnect probing and device staleness cleanup.
    /// Runs until a shutdown is requested, then disconnects cleanly.
    pub async fn run_health_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(
            self.config.system.health_check_interval_secs,
        ));
        while !self.is_shutdown_requested() {
            ticker.tick().await;
            if let Some(client) = &self.mqtt_client {
                client.check_and_reconnect(&self.shutdown).await;
            }
            self.device_registry.cleanup_stale_devices();
        }
        log_info!("Health loop stopped, shutting down controller");
    }
}

fn strip_json_suffix(name: &str) -> String {
    name.strip_suffix(".json").unwrap_or(name).to_string()
}
