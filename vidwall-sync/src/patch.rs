//! Generic config channel: partial updates over `PlaybackState ⊕ GridConfig`.
//!
//! A patch is a flat JSON object. Known keys are type-checked and routed to
//! the grid or the playback state; any other key is kept verbatim as an
//! opaque extra and echoed back in the merged view. Merging is
//! last-write-wins per key with no ordering token.
//!
//! ```text
//! {"rows": 2, "isPlaying": true, "theme": "dark"}
//!       │            │                  │
//!       ▼            ▼                  ▼
//!   GridPatch   PlaybackPatch        extras
//! ```

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::NodeId;
use crate::timeline::{is_valid_time, AudioMode, PlaybackState};
use crate::topology::{DisplayMode, GridConfig};

/// A flat, partial config object.
pub type ConfigPatch = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("Patch must be a JSON object")]
    NotAnObject,
    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Unknown audio target {0}")]
    UnknownAudioTarget(NodeId),
}

impl PatchError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridPatch {
    pub rows: Option<u32>,
    pub cols: Option<u32>,
    pub display_mode: Option<DisplayMode>,
}

impl GridPatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_none() && self.cols.is_none() && self.display_mode.is_none()
    }

    pub fn apply_to(&self, grid: GridConfig) -> GridConfig {
        GridConfig {
            rows: self.rows.unwrap_or(grid.rows),
            cols: self.cols.unwrap_or(grid.cols),
            display_mode: self.display_mode.unwrap_or(grid.display_mode),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackPatch {
    pub video_url: Option<String>,
    pub is_playing: Option<bool>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub volume: Option<f64>,
    pub is_muted: Option<bool>,
    pub audio_mode: Option<AudioMode>,
    /// `Some(None)` clears the target.
    pub audio_target: Option<Option<NodeId>>,
}

impl PlaybackPatch {
    pub fn apply_to(self, state: &mut PlaybackState) {
        if let Some(v) = self.video_url {
            state.video_url = v;
        }
        if let Some(v) = self.is_playing {
            state.is_playing = v;
        }
        if let Some(v) = self.current_time {
            state.current_time = v;
        }
        if let Some(v) = self.duration {
            state.duration = v;
        }
        if let Some(v) = self.volume {
            state.volume = v.clamp(0.0, 1.0);
        }
        if let Some(v) = self.is_muted {
            state.is_muted = v;
        }
        if let Some(v) = self.audio_mode {
            state.audio_mode = v;
        }
        if let Some(v) = self.audio_target {
            state.audio_target = v;
        }
    }
}

/// A patch split by owner, fully validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPatch {
    pub grid: GridPatch,
    pub playback: PlaybackPatch,
    pub extras: ConfigPatch,
}

fn field<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, PatchError> {
    serde_json::from_value(value).map_err(|e| PatchError::invalid(name, e.to_string()))
}

fn dimension(name: &str, value: Value) -> Result<u32, PatchError> {
    let n: u32 = field(name, value)?;
    if n == 0 {
        return Err(PatchError::invalid(name, "must be at least 1"));
    }
    Ok(n)
}

fn time(name: &str, value: Value) -> Result<f64, PatchError> {
    let t: f64 = field(name, value)?;
    if !is_valid_time(t) {
        return Err(PatchError::invalid(name, "must be a finite, non-negative number"));
    }
    Ok(t)
}

/// Validate a raw patch value. Any bad known key rejects the whole patch.
pub fn parse(value: Value) -> Result<ParsedPatch, PatchError> {
    let Value::Object(map) = value else {
        return Err(PatchError::NotAnObject);
    };
    parse_map(map)
}

fn parse_map(map: ConfigPatch) -> Result<ParsedPatch, PatchError> {
    let mut out = ParsedPatch::default();

    for (key, value) in map {
        match key.as_str() {
            "rows" => out.grid.rows = Some(dimension(&key, value)?),
            "cols" => out.grid.cols = Some(dimension(&key, value)?),
            "displayMode" => out.grid.display_mode = Some(field(&key, value)?),
            "videoUrl" => out.playback.video_url = Some(field(&key, value)?),
            "isPlaying" => out.playback.is_playing = Some(field(&key, value)?),
            "currentTime" => out.playback.current_time = Some(time(&key, value)?),
            "duration" => out.playback.duration = Some(time(&key, value)?),
            "volume" => {
                let v: f64 = field(&key, value)?;
                if v.is_nan() {
                    return Err(PatchError::invalid(&key, "must be a number"));
                }
                out.playback.volume = Some(v);
            }
            "isMuted" => out.playback.is_muted = Some(field(&key, value)?),
            "audioMode" => out.playback.audio_mode = Some(field(&key, value)?),
            "audioTarget" => out.playback.audio_target = Some(field(&key, value)?),
            _ => {
                out.extras.insert(key, value);
            }
        }
    }

    Ok(out)
}

/// Flatten grid, playback and extras into one config object.
///
/// Typed fields win over same-named extras, which can only arise if an
/// extra was stored before that key became known.
pub fn merged_view(grid: &GridConfig, playback: &PlaybackState, extras: &ConfigPatch) -> ConfigPatch {
    let mut view = extras.clone();
    for part in [serde_json::to_value(grid), serde_json::to_value(playback)] {
        if let Ok(Value::Object(fields)) = part {
            view.extend(fields);
        }
    }
    view
}
