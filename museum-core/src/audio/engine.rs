//! Two-tier audio playback: short `sfx_`-prefixed files are preloaded into
//! RAM and played polyphonically, everything else is streamed from disk as
//! background music (only one stream at a time). Falling-edge end detection
//! is driven by the Scene Runner calling [`AudioEngine::poll_end_events`] on
//! every tick.

use crate::config::AudioConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::scene::transitions::TransitionManager;
use crate::{log_debug, log_error, log_info, log_warn};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SFX_PREFIX: &str = "sfx_";
const FALLBACK_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];

struct Output {
    // Held only to keep the audio device stream alive for as long as the
    // sinks attached to its handle exist.
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

struct State {
    output: Option<Output>,
    init_attempts: u32,
    last_init_attempt: Instant,
    sound_cache: HashMap<String, Vec<u8>>,
    active_effects: HashMap<String, Vec<Sink>>,
    music_sink: Option<Sink>,
    current_music_file: Option<String>,
    music_was_playing: bool,
}

impl State {
    fn available(&self) -> bool {
        self.output.is_some()
    }
}

pub struct AudioEngine {
    audio_dir: PathBuf,
    max_init_attempts: u32,
    init_retry_delay: Duration,
    state: Mutex<State>,
}

impl AudioEngine {
    pub fn new(audio_dir: impl Into<PathBuf>, config: &AudioConfig) -> Self {
        let mut state = State {
            output: None,
            init_attempts: 0,
            last_init_attempt: Instant::now(),
            sound_cache: HashMap::new(),
            active_effects: HashMap::new(),
            music_sink: None,
            current_music_file: None,
            music_was_playing: false,
        };
        Self::initialize(&mut state);
        AudioEngine {
            audio_dir: audio_dir.into(),
            max_init_attempts: config.max_init_attempts,
            init_retry_delay: Duration::from_secs_f64(config.init_retry_delay_secs),
            state: Mutex::new(state),
        }
    }

    fn initialize(state: &mut State) {
        state.init_attempts += 1;
        state.last_init_attempt = Instant::now();
        match OutputStream::try_default() {
            Ok((stream, handle)) => {
                state.output = Some(Output { _stream: stream, handle });
                log_info!("Audio initialized successfully");
            }
            Err(e) => {
                state.output = None;
                log_error!("Audio initialization failed completely: {e}");
            }
        }
    }

    fn can_retry_init(&self, state: &State) -> bool {
        if state.available() {
            return false;
        }
        if state.init_attempts >= self.max_init_attempts {
            return false;
        }
        state.last_init_attempt.elapsed() >= self.init_retry_delay
    }

    fn retry_init_if_due(&self, state: &mut State) {
        if self.can_retry_init(state) {
            log_info!("Retrying audio initialization...");
            Self::initialize(state);
        }
    }

    /// Clears the RAM cache and active effects, then loads every `sfx_`
    /// prefixed file in `files` into memory ahead of a scene run.
    pub fn preload_files_for_scene(&self, files: &[String]) {
        let mut state = self.state.lock().unwrap();
        if !state.available() {
            return;
        }
        log_info!("Starting dynamic preload for scene...");
        Self::stop_all_locked(&mut state);

        let cleared = state.sound_cache.len();
        state.sound_cache.clear();

        let mut loaded = 0;
        for filename in files {
            if !filename.to_lowercase().starts_with(SFX_PREFIX) {
                continue;
            }
            if let Some((resolved, full_path)) = self.resolve_audio_file(filename) {
                match std::fs::read(&full_path) {
                    Ok(bytes) => {
                        state.sound_cache.insert(resolved.clone(), bytes);
                        loaded += 1;
                        log_debug!("Loaded to RAM: {resolved}");
                    }
                    Err(e) => log_error!("Failed to preload {filename}: {e}"),
                }
            }
        }
        log_info!("Preload complete. {loaded} SFX files ready in RAM. (cleared {cleared})");
    }

    pub fn handle_command(&self, message: &str) -> ControllerResult<()> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ControllerError::Audio("empty audio command".to_string()));
        }

        if let Some(rest) = message.strip_prefix("PLAY:") {
            let mut parts = rest.splitn(2, ':');
            let filename = parts.next().unwrap_or_default();
            let volume: f32 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0);
            return self.play_audio_file(filename, volume.clamp(0.0, 1.0));
        }
        if message == "STOP" {
            return self.stop_all();
        }
        if let Some(target) = message.strip_prefix("STOP:") {
            return self.stop_specific(target);
        }
        if message == "PAUSE" {
            return self.pause();
        }
        if message == "RESUME" {
            return self.resume();
        }
        if let Some(rest) = message.strip_prefix("VOLUME:") {
            let vol: f32 = rest
                .parse()
                .map_err(|_| ControllerError::Audio(format!("invalid volume: {rest}")))?;
            return self.set_volume(vol.clamp(0.0, 1.0));
        }
        self.play_audio_file(message, 1.0)
    }

    pub fn play_audio_file(&self, filename: &str, volume: f32) -> ControllerResult<()> {
        let mut state = self.state.lock().unwrap();
        self.retry_init_if_due(&mut state);
        let Some(handle) = state.output.as_ref().map(|o| o.handle.clone()) else {
            return Err(ControllerError::Audio("audio device unavailable".to_string()));
        };

        let Some((resolved, full_path)) = self.resolve_audio_file(filename) else {
            return Err(ControllerError::Audio(format!("audio file not found: {filename}")));
        };

        if let Some(bytes) = state.sound_cache.get(&resolved).cloned() {
            let sink = Sink::try_new(&handle)
                .map_err(|e| ControllerError::Audio(format!("no free channel: {e}")))?;
            sink.set_volume(volume);
            let source = Decoder::new(Cursor::new(bytes))
                .map_err(|e| ControllerError::Audio(format!("decode failed: {e}")))?;
            sink.append(source);
            state.active_effects.entry(resolved.clone()).or_default().push(sink);
            log_info!("Playing SFX (RAM): {resolved} (vol: {volume})");
            return Ok(());
        }

        if state.current_music_file.is_some() {
            if let Some(sink) = state.music_sink.take() {
                sink.stop();
            }
        }

        let file = File::open(&full_path)
            .map_err(|e| ControllerError::Audio(format!("failed to open {}: {e}", full_path.display())))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| ControllerError::Audio(format!("decode failed: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| ControllerError::Audio(format!("no free channel: {e}")))?;
        sink.set_volume(volume);
        sink.append(source);
        state.music_sink = Some(sink);
        state.current_music_file = Some(resolved.clone());
        state.music_was_playing = true;
        log_info!("Playing music (stream): {resolved} (vol: {volume})");
        Ok(())
    }

    pub fn stop_all(&self) -> ControllerResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::stop_all_locked(&mut state);
        Ok(())
    }

    fn stop_all_locked(state: &mut State) {
        if let Some(sink) = state.music_sink.take() {
            sink.stop();
        }
        state.current_music_file = None;
        for sinks in state.active_effects.values() {
            for sink in sinks {
                sink.stop();
            }
        }
        state.active_effects.clear();
        log_info!("Stopped ALL audio");
    }

    pub fn stop_specific(&self, filename: &str) -> ControllerResult<()> {
        let mut state = self.state.lock().unwrap();
        let resolved = self
            .resolve_audio_file(filename)
            .map(|(name, _)| name)
            .unwrap_or_else(|| filename.to_string());

        if state.current_music_file.as_deref() == Some(resolved.as_str()) {
            if let Some(sink) = state.music_sink.take() {
                sink.stop();
            }
            state.current_music_file = None;
            log_info!("Stopped specific music: {resolved}");
        }

        if let Some(sinks) = state.active_effects.remove(&resolved) {
            for sink in sinks {
                sink.stop();
            }
            log_info!("Stopped specific SFX: {resolved}");
        }
        Ok(())
    }

    pub fn pause(&self) -> ControllerResult<()> {
        let state = self.state.lock().unwrap();
        if !state.available() {
            return Err(ControllerError::Audio("audio device unavailable".to_string()));
        }
        if let Some(sink) = &state.music_sink {
            sink.pause();
        }
        for sinks in state.active_effects.values() {
            for sink in sinks {
                sink.pause();
            }
        }
        Ok(())
    }

    pub fn resume(&self) -> ControllerResult<()> {
        let state = self.state.lock().unwrap();
        if !state.available() {
            return Err(ControllerError::Audio("audio device unavailable".to_string()));
        }
        if let Some(sink) = &state.music_sink {
            sink.play();
        }
        for sinks in state.active_effects.values() {
            for sink in sinks {
                sink.play();
            }
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: f32) -> ControllerResult<()> {
        let state = self.state.lock().unwrap();
        if !state.available() {
            return Err(ControllerError::Audio("audio device unavailable".to_string()));
        }
        if let Some(sink) = &state.music_sink {
            sink.set_volume(volume);
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        let state = self.state.lock().unwrap();
        let music_busy = state.music_sink.as_ref().is_some_and(|s| !s.empty());
        music_busy || !state.active_effects.is_empty()
    }

    /// Called on every Scene Runner tick: detects music/SFX that finished
    /// since the last call and registers a falling-edge `audioEnd` event for
    /// each one.
    pub fn poll_end_events(&self, transitions: &TransitionManager) {
        let mut state = self.state.lock().unwrap();

        let music_busy = state.music_sink.as_ref().is_some_and(|s| !s.empty());
        if state.music_was_playing && !music_busy {
            if let Some(finished) = state.current_music_file.take() {
                log_info!("Music finished: {finished}");
                transitions.register_audio_end(&finished);
            }
            state.music_sink = None;
        }
        state.music_was_playing = music_busy;

        let ended: Vec<String> = state
            .active_effects
            .iter_mut()
            .filter_map(|(name, sinks)| {
                sinks.retain(|s| !s.empty());
                sinks.is_empty().then(|| name.clone())
            })
            .collect();
        for name in ended {
            state.active_effects.remove(&name);
            transitions.register_audio_end(&name);
        }
    }

    fn resolve_audio_file(&self, audio_file: &str) -> Option<(String, PathBuf)> {
        let clean_name = audio_file.replace("PLAY_", "");
        let full_path = self.audio_dir.join(&clean_name);
        if full_path.exists() {
            return Some((clean_name, full_path));
        }

        let stem_has_ext = Path::new(&clean_name).extension().is_some();
        if !stem_has_ext {
            for ext in FALLBACK_EXTENSIONS {
                let candidate_name = format!("{clean_name}.{ext}");
                let candidate_path = self.audio_dir.join(&candidate_name);
                if candidate_path.exists() {
                    return Some((candidate_name, candidate_path));
                }
            }
        }
        log_warn!("Audio file not found: {}", full_path.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &Path) -> AudioEngine {
        AudioEngine::new(dir.to_path_buf(), &AudioConfig::default())
    }

    #[test]
    fn unresolved_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert!(e.resolve_audio_file("missing.mp3").is_none());
    }

    #[test]
    fn resolves_extension_by_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chime.wav"), b"not-real-audio").unwrap();
        let e = engine(dir.path());
        let (resolved, path) = e.resolve_audio_file("chime").unwrap();
        assert_eq!(resolved, "chime.wav");
        assert!(path.ends_with("chime.wav"));
    }

    #[test]
    fn unknown_command_is_rejected_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert!(e.handle_command("does-not-exist.mp3").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert!(e.handle_command("   ").is_err());
    }

    #[test]
    fn stop_all_is_a_no_op_when_nothing_playing() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert!(e.stop_all().is_ok());
        assert!(!e.is_playing());
    }
}
