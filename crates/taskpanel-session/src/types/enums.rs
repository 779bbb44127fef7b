/*
[INPUT]:  Engine status strings and footer colour names
[OUTPUT]: Closed enums with serde wire names
[POS]:    Data layer - type definitions for engine communication
[UPDATE]: When the engine adds a task status
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status as published by the engine.
///
/// The wire form is the engine's display text, so `"Waiting for peer"` and
/// `"Not started"` carry spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "Waiting for peer")]
    WaitingForPeer,
    #[serde(rename = "Not started")]
    NotStarted,
    Ready,
    Waiting,
    Computing,
    Finished,
    Timeout,
    Restart,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::WaitingForPeer => "Waiting for peer",
            TaskStatus::NotStarted => "Not started",
            TaskStatus::Ready => "Ready",
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Computing => "Computing",
            TaskStatus::Finished => "Finished",
            TaskStatus::Timeout => "Timeout",
            TaskStatus::Restart => "Restart",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FooterColor {
    Green,
    Yellow,
    Red,
}
