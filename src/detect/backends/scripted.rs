use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that replays configured detections. Used by tests and the demo daemon.
///
/// Each call pops the next scripted batch; once the script is exhausted the
/// fallback batch is returned forever.
pub struct ScriptedBackend {
    script: VecDeque<Vec<Detection>>,
    fallback: Vec<Detection>,
    failure: Option<String>,
    calls: u64,
}

impl ScriptedBackend {
    /// Returns the same detections on every call.
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: detections,
            failure: None,
            calls: 0,
        }
    }

    /// Returns each batch once, in order, then nothing.
    pub fn sequence(batches: Vec<Vec<Detection>>) -> Self {
        Self {
            script: batches.into(),
            fallback: Vec::new(),
            failure: None,
            calls: 0,
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Vec::new(),
            failure: Some(message.into()),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
