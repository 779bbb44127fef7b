/*
[INPUT]:  Engine task snapshots, preset records, footer/preview state
[OUTPUT]: Typed domain models shared by every flow
[POS]:    Data layer - type definitions for engine communication
[UPDATE]: When task payload fields change
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::enums::{FooterColor, TaskStatus};

/// Render options of a task. Only `frame_count` is interpreted; every other
/// key is carried through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One task entry from the engine's task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    pub status: TaskStatus,
    /// Completion ratio in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f64,
    /// Seconds spent computing so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Start timestamp in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TaskOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Task {
    pub fn frame_count(&self) -> Option<u32> {
        self.options.as_ref().and_then(|options| options.frame_count)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.time_started?;
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.trunc() as i64;
        let nanos = (secs.fract() * 1_000_000_000.0) as u32;
        DateTime::from_timestamp(whole, nanos)
    }
}

/// Saved build settings for a task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPreset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Summary line shown in the footer bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterInfo {
    pub status: TaskStatus,
    pub message: String,
    pub color: FooterColor,
}

/// Permission for the engine to stream live previews of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewLock {
    pub id: Option<String>,
    pub frame_count: Option<u32>,
    pub enabled: bool,
}

impl PreviewLock {
    /// The lock command issued when a task is deleted.
    pub fn disabled() -> Self {
        Self {
            id: None,
            frame_count: None,
            enabled: false,
        }
    }
}
