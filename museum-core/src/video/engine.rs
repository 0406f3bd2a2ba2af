//! Drives an external `mpv` process over its JSON IPC socket: one fullscreen
//! window looping an idle image between videos, restarted with a bounded
//! attempt count and cooldown if the socket goes unresponsive. All I/O here
//! is synchronous (plain `std::process`/`std::os::unix::net`) so the engine
//! can be called from the Scene Executor's non-async action dispatch without
//! a runtime handle.

use crate::config::VideoConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::scene::transitions::TransitionManager;
use crate::{log_debug, log_error, log_info, log_warn};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SUPPORTED_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mkv", "mov", "webm"];
const SOCKET_CONNECT_RETRIES: u32 = 5;
const IO_TIMEOUT: Duration = Duration::from_secs(2);

struct State {
    process: Option<Child>,
    currently_playing: Option<String>,
    was_playing: bool,
    last_health_check: Instant,
    restart_count: u32,
    last_restart_time: Option<Instant>,
}

pub struct VideoEngine {
    video_dir: PathBuf,
    ipc_socket: PathBuf,
    idle_image: PathBuf,
    health_check_interval: Duration,
    max_restart_attempts: u32,
    restart_cooldown: Duration,
    state: Mutex<State>,
}

impl VideoEngine {
    pub fn new(video_dir: impl Into<PathBuf>, config: &VideoConfig) -> Self {
        let video_dir = video_dir.into();
        let idle_image = video_dir.join(&config.idle_image);
        let engine = VideoEngine {
            video_dir,
            ipc_socket: PathBuf::from(&config.ipc_socket),
            idle_image,
            health_check_interval: Duration::from_secs_f64(config.health_check_interval_secs),
            max_restart_attempts: config.max_restart_attempts,
            restart_cooldown: Duration::from_secs_f64(config.restart_cooldown_secs),
            state: Mutex::new(State {
                process: None,
                currently_playing: None,
                was_playing: false,
                last_health_check: Instant::now(),
                restart_count: 0,
                last_restart_time: None,
            }),
        };
        engine.ensure_idle_image();
        let mut state = engine.state.lock().unwrap();
        engine.start_mpv(&mut state);
        drop(state);
        log_info!("Video handler initialized");
        engine
    }

    fn ensure_idle_image(&self) {
        if self.idle_image.exists() {
            return;
        }
        if let Some(parent) = self.idle_image.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // A 1x1 transparent PNG stands in for a generated black frame; mpv
        // scales any still image to fill the window.
        const BLANK_PNG: &[u8] = &[
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
            0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78,
            0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
            0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
        ];
        match std::fs::write(&self.idle_image, BLANK_PNG) {
            Ok(()) => log_info!("Created idle image at {}", self.idle_image.display()),
            Err(e) => log_error!("Failed to create idle image: {e}"),
        }
    }

    fn stop_current_process(&self, state: &mut State) {
        if let Some(mut child) = state.process.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        state.currently_playing = None;
        let _ = std::fs::remove_file(&self.ipc_socket);
    }

    fn start_mpv(&self, state: &mut State) -> bool {
        if !self.idle_image.exists() {
            log_error!("Idle image missing: {}", self.idle_image.display());
            return false;
        }
        self.stop_current_process(state);
        std::thread::sleep(Duration::from_millis(500));

        let cmd = Command::new("mpv")
            .args([
                "--fs",
                "--no-osc",
                "--no-osd-bar",
                "--vo=gpu",
                "--cache=no",
                "--demuxer-max-bytes=3M",
                "--profile=low-latency",
                "--loop-file=inf",
                "--idle=yes",
                "--no-input-default-bindings",
                "--input-conf=/dev/null",
                "--quiet",
                "--no-terminal",
            ])
            .arg(format!("--input-ipc-server={}", self.ipc_socket.display()))
            .arg(&self.idle_image)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let child = match cmd {
            Ok(child) => child,
            Err(e) => {
                log_error!("mpv start error: {e}");
                return false;
            }
        };
        state.process = Some(child);

        for _ in 0..SOCKET_CONNECT_RETRIES {
            std::thread::sleep(Duration::from_secs(1));
            if self.ipc_socket.exists() {
                state.currently_playing =
                    self.idle_image.file_name().map(|n| n.to_string_lossy().to_string());
                state.restart_count = 0;
                log_info!("mpv process started and IPC socket created");
                return true;
            }
        }
        log_error!("IPC socket not created after retries");
        self.stop_current_process(state);
        false
    }

    fn restart_mpv(&self, state: &mut State) -> bool {
        let in_cooldown = state
            .last_restart_time
            .is_some_and(|t| t.elapsed() < self.restart_cooldown);
        if in_cooldown || state.restart_count >= self.max_restart_attempts {
            log_error!(
                "Cannot restart mpv: exceeded {} attempts or in cooldown",
                self.max_restart_attempts
            );
            return false;
        }
        state.restart_count += 1;
        state.last_restart_time = Some(Instant::now());
        self.stop_current_process(state);
        std::thread::sleep(Duration::from_secs(2));
        self.start_mpv(state)
    }

    fn check_process_health(&self, state: &mut State) -> bool {
        if state.last_health_check.elapsed() < self.health_check_interval {
            return true;
        }
        state.last_health_check = Instant::now();

        let process_alive = state
            .process
            .as_mut()
            .map(|c| matches!(c.try_wait(), Ok(None)))
            .unwrap_or(false);
        if !process_alive || !self.ipc_socket.exists() {
            return self.restart_mpv(state);
        }

        match self.raw_ipc_command(&json!(["get_property", "pause"]), false) {
            Ok(_) => true,
            Err(_) => self.restart_mpv(state),
        }
    }

    fn raw_ipc_command(&self, command: &Value, want_response: bool) -> ControllerResult<Option<Value>> {
        let mut stream = UnixStream::connect(&self.ipc_socket)
            .map_err(|e| ControllerError::Video(format!("ipc connect failed: {e}")))?;
        stream.set_read_timeout(Some(IO_TIMEOUT)).ok();
        stream.set_write_timeout(Some(IO_TIMEOUT)).ok();

        let request = json!({ "command": command });
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| ControllerError::Video(format!("encode failed: {e}")))?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .map_err(|e| ControllerError::Video(format!("ipc write failed: {e}")))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|e| ControllerError::Video(format!("ipc read failed: {e}")))?;
        if response_line.is_empty() {
            return Err(ControllerError::Video("mpv closed the connection".to_string()));
        }

        if want_response {
            let value: Value = serde_json::from_str(&response_line)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    fn send_ipc_command(&self, command: &Value, want_response: bool) -> Option<Value> {
        let mut state = self.state.lock().unwrap();
        if !self.check_process_health(&mut state) {
            return None;
        }
        drop(state);

        match self.raw_ipc_command(command, want_response) {
            Ok(value) => value.or(Some(Value::Null)),
            Err(e) => {
                log_error!("IPC command failed: {e} for command {command}");
                let mut state = self.state.lock().unwrap();
                self.restart_mpv(&mut state);
                None
            }
        }
    }

    pub fn handle_command(&self, message: &str) -> ControllerResult<()> {
        let message = message.trim();
        if let Some(filename) = message.strip_prefix("PLAY_VIDEO:") {
            return self.play_video(filename);
        }
        if message == "STOP_VIDEO" {
            return self.stop_video();
        }
        if message == "PAUSE" {
            return self.pause_video();
        }
        if message == "RESUME" {
            return self.resume_video();
        }
        if let Some(rest) = message.strip_prefix("SEEK:") {
            let seconds: f64 = rest
                .parse()
                .map_err(|_| ControllerError::Video(format!("invalid seek value: {rest}")))?;
            return self.seek_video(seconds);
        }
        self.play_video(message)
    }

    pub fn play_video(&self, video_file: &str) -> ControllerResult<()> {
        let full_path = self.video_dir.join(video_file);
        if !full_path.exists() {
            return Err(ControllerError::Video(format!("video not found: {}", full_path.display())));
        }
        let ext_ok = Path::new(video_file)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if !ext_ok {
            return Err(ControllerError::Video(format!("unsupported format: {video_file}")));
        }

        self.send_ipc_command(&json!(["set_property", "loop-file", "no"]), false);
        let loaded = self.send_ipc_command(&json!(["loadfile", full_path.to_string_lossy()]), false);
        if loaded.is_none() {
            return Err(ControllerError::Video(format!("failed to load {video_file}")));
        }
        self.state.lock().unwrap().currently_playing = Some(video_file.to_string());
        log_info!("Playing: {video_file}");
        Ok(())
    }

    pub fn stop_video(&self) -> ControllerResult<()> {
        self.send_ipc_command(&json!(["set_property", "loop-file", "inf"]), false);
        let loaded = self.send_ipc_command(
            &json!(["loadfile", self.idle_image.to_string_lossy(), "replace"]),
            false,
        );
        if loaded.is_none() {
            return Err(ControllerError::Video("failed to return to idle image".to_string()));
        }
        self.state.lock().unwrap().currently_playing =
            self.idle_image.file_name().map(|n| n.to_string_lossy().to_string());
        Ok(())
    }

    pub fn pause_video(&self) -> ControllerResult<()> {
        self.send_ipc_command(&json!(["set_property", "pause", true]), false)
            .map(|_| ())
            .ok_or_else(|| ControllerError::Video("pause failed".to_string()))
    }

    pub fn resume_video(&self) -> ControllerResult<()> {
        self.send_ipc_command(&json!(["set_property", "pause", false]), false)
            .map(|_| ())
            .ok_or_else(|| ControllerError::Video("resume failed".to_string()))
    }

    pub fn seek_video(&self, seconds: f64) -> ControllerResult<()> {
        self.send_ipc_command(&json!(["seek", seconds, "absolute"]), false)
            .map(|_| ())
            .ok_or_else(|| ControllerError::Video("seek failed".to_string()))
    }

    pub fn is_playing(&self) -> bool {
        let idle_name = self.idle_image.file_name().map(|n| n.to_string_lossy().to_string());
        if self.state.lock().unwrap().currently_playing == idle_name {
            return false;
        }
        match self.send_ipc_command(&json!(["get_property", "idle-active"]), true) {
            Some(response) => {
                let is_idle = response.get("data").and_then(Value::as_bool).unwrap_or(true);
                !is_idle
            }
            None => false,
        }
    }

    /// Called on every Scene Runner tick: detects a video that stopped
    /// playing since the last call and registers a falling-edge `videoEnd`
    /// event, then returns the player to the idle image.
    pub fn poll_end_events(&self, transitions: &TransitionManager) {
        let is_playing_now = self.is_playing();
        let mut state = self.state.lock().unwrap();
        if state.was_playing && !is_playing_now {
            if let Some(finished) = state.currently_playing.clone() {
                log_info!("Video ended: {finished}");
                drop(state);
                let _ = self.stop_video();
                transitions.register_video_end(&finished);
                state = self.state.lock().unwrap();
            }
        }
        state.was_playing = is_playing_now;
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        self.stop_current_process(&mut state);
        log_info!("Video handler cleaned up");
    }
}

impl Drop for VideoEngine {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        self.stop_current_process(&mut state);
    }
}
