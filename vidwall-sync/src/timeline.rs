//! Authoritative playback timeline.
//!
//! Holds the single shared [`PlaybackState`] and applies admin transitions
//! and node reports to it. The timeline is not a clock: `current_time`
//! only moves when a command or a node report says so.
//!
//! Every mutating call returns the changed fields as a [`ConfigPatch`] so
//! the caller can fan out just the delta, or `None` when nothing changed
//! and nothing should be published.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::{ConfigPatch, PlaybackPatch};
use crate::registry::NodeId;

/// Duration reports closer than this to the stored value are ignored.
pub const DURATION_TOLERANCE_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMode {
    /// Every node plays audio.
    #[default]
    Broadcast,
    /// Only the admin console plays audio.
    AdminOnly,
    /// Only `audio_target` plays audio.
    Single,
}

impl AudioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMode::Broadcast => "broadcast",
            AudioMode::AdminOnly => "adminOnly",
            AudioMode::Single => "single",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub video_url: String,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub is_muted: bool,
    pub audio_mode: AudioMode,
    pub audio_target: Option<NodeId>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            video_url: String::new(),
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            is_muted: false,
            audio_mode: AudioMode::Broadcast,
            audio_target: None,
        }
    }
}

/// Admin-driven transitions of the timeline state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    SetUrl(String),
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetVolume(f64),
    ToggleMute,
    SetAudioMode {
        mode: AudioMode,
        target: Option<NodeId>,
    },
}

/// A usable time value: finite and not negative.
pub(crate) fn is_valid_time(t: f64) -> bool {
    t.is_finite() && t >= 0.0
}

#[derive(Debug, Default)]
pub struct PlaybackTimeline {
    state: PlaybackState,
}

impl PlaybackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Apply one transition. Returns the changed fields, or `None` if the
    /// transition was rejected.
    pub fn apply(&mut self, transition: Transition) -> Option<ConfigPatch> {
        let mut delta = ConfigPatch::new();
        let s = &mut self.state;

        match transition {
            Transition::SetUrl(url) => {
                // A new source always restarts from a paused zero.
                s.video_url = url;
                s.current_time = 0.0;
                s.is_playing = false;
                delta.insert("videoUrl".into(), Value::from(s.video_url.clone()));
                delta.insert("currentTime".into(), Value::from(0.0));
                delta.insert("isPlaying".into(), Value::from(false));
            }
            Transition::Play => {
                s.is_playing = true;
                delta.insert("isPlaying".into(), Value::from(true));
            }
            Transition::Pause => {
                s.is_playing = false;
                delta.insert("isPlaying".into(), Value::from(false));
            }
            Transition::Stop => {
                s.is_playing = false;
                s.current_time = 0.0;
                delta.insert("isPlaying".into(), Value::from(false));
                delta.insert("currentTime".into(), Value::from(0.0));
            }
            Transition::Seek(time) => {
                if !is_valid_time(time) {
                    return None;
                }
                s.current_time = time;
                delta.insert("currentTime".into(), Value::from(time));
            }
            Transition::SetVolume(volume) => {
                if volume.is_nan() {
                    return None;
                }
                s.volume = volume.clamp(0.0, 1.0);
                delta.insert("volume".into(), Value::from(s.volume));
            }
            Transition::ToggleMute => {
                s.is_muted = !s.is_muted;
                delta.insert("isMuted".into(), Value::from(s.is_muted));
            }
            Transition::SetAudioMode { mode, target } => {
                s.audio_mode = mode;
                s.audio_target = target;
                delta.insert("audioMode".into(), Value::from(mode.as_str()));
                delta.insert("audioTarget".into(), Value::from(target.map(String::from)));
            }
        }

        Some(delta)
    }

    /// Drift correction: the latest node report always wins.
    pub fn report_time(&mut self, time: f64) -> Option<ConfigPatch> {
        if !is_valid_time(time) {
            return None;
        }
        self.state.current_time = time;

        let mut delta = ConfigPatch::new();
        delta.insert("currentTime".into(), Value::from(time));
        Some(delta)
    }

    /// Accept a decoder's duration only if it differs from the stored value
    /// by more than [`DURATION_TOLERANCE_SECS`].
    pub fn report_duration(&mut self, duration: f64) -> Option<ConfigPatch> {
        if !is_valid_time(duration) {
            return None;
        }
        if (duration - self.state.duration).abs() <= DURATION_TOLERANCE_SECS {
            return None;
        }
        self.state.duration = duration;

        let mut delta = ConfigPatch::new();
        delta.insert("duration".into(), Value::from(duration));
        Some(delta)
    }

    /// Drop a departed node as the audio target. Mode is left untouched.
    pub fn clear_audio_target(&mut self, node: &NodeId) -> Option<ConfigPatch> {
        if self.state.audio_target.as_ref() != Some(node) {
            return None;
        }
        self.state.audio_target = None;

        let mut delta = ConfigPatch::new();
        delta.insert("audioTarget".into(), Value::Null);
        Some(delta)
    }

    /// Field-wise merge of an already-validated patch.
    pub fn merge(&mut self, patch: PlaybackPatch) {
        patch.apply_to(&mut self.state);
    }
}
