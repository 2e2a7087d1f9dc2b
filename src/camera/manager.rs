//! Multi-zone camera manager.
//!
//! Every zone owns one `FrameSource` behind its own mutex. `capture_all` fans out
//! one worker thread per zone and waits on each result independently, so a slow
//! or broken camera only costs its own zone.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use super::snapshot::{SnapshotStage, SnapshotWriter};
use super::source::{open_source, FrameSource};
use super::CaptureError;
use crate::frame::Frame;
use crate::{now_s, validate_zone_name};

/// Per-zone wait used when no explicit timeout was configured.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of one zone's camera for status reporting.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CameraInfo {
    pub zone: String,
    pub source: String,
    pub resolution: (u32, u32),
    pub is_open: bool,
    /// Epoch seconds of the last successful capture.
    pub last_capture_at: Option<u64>,
    pub is_face_zone: bool,
}

struct SourceState {
    source: Box<dyn FrameSource>,
    last_capture_at: Option<u64>,
}

struct CameraSlot {
    source: String,
    resolution: (u32, u32),
    timeout: Duration,
    state: Arc<Mutex<SourceState>>,
}

pub struct CameraManager {
    slots: BTreeMap<String, CameraSlot>,
    face_zone: Option<String>,
    snapshots: Option<SnapshotWriter>,
    default_timeout: Duration,
}

impl Default for CameraManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraManager {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            face_zone: None,
            snapshots: None,
            default_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn snapshots(&self) -> Option<&SnapshotWriter> {
        self.snapshots.as_ref()
    }

    /// Register a camera from its configured source string.
    ///
    /// Returns `Ok(false)` when the zone already has a camera; the existing camera
    /// is kept.
    pub fn add_camera(&mut self, zone: &str, source: &str, resolution: (u32, u32)) -> Result<bool> {
        validate_zone_name(zone)?;
        if self.slots.contains_key(zone) {
            log::warn!("camera zone {} already registered; ignoring {}", zone, source);
            return Ok(false);
        }
        let source = open_source(source, resolution.0, resolution.1)?;
        Ok(self.add_source(zone, source, resolution))
    }

    /// Register an already constructed source.
    pub fn add_source(
        &mut self,
        zone: &str,
        source: Box<dyn FrameSource>,
        resolution: (u32, u32),
    ) -> bool {
        if self.slots.contains_key(zone) {
            log::warn!("camera zone {} already registered", zone);
            return false;
        }
        log::info!("camera zone {} -> {}", zone, source.describe());
        self.slots.insert(
            zone.to_string(),
            CameraSlot {
                source: source.describe(),
                resolution,
                timeout: self.default_timeout,
                state: Arc::new(Mutex::new(SourceState {
                    source,
                    last_capture_at: None,
                })),
            },
        );
        true
    }

    /// Mark `zone` as the external face camera. It is excluded from before/after captures.
    pub fn set_face_zone(&mut self, zone: &str) -> Result<()> {
        if !self.slots.contains_key(zone) {
            return Err(anyhow!("face zone {} is not a registered camera", zone));
        }
        self.face_zone = Some(zone.to_string());
        Ok(())
    }

    pub fn face_zone(&self) -> Option<&str> {
        self.face_zone.as_deref()
    }

    pub fn set_timeout(&mut self, zone: &str, timeout: Duration) -> Result<()> {
        let slot = self
            .slots
            .get_mut(zone)
            .ok_or_else(|| anyhow!("camera zone {} is not registered", zone))?;
        slot.timeout = timeout;
        Ok(())
    }

    pub fn zones(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Capture one zone on the caller's thread. Opens the source on first use.
    pub fn capture_zone(&self, zone: &str) -> Result<Frame, CaptureError> {
        let slot = self
            .slots
            .get(zone)
            .ok_or_else(|| CaptureError::NotRegistered(zone.to_string()))?;
        capture_locked(zone, &slot.state)
    }

    /// Capture every registered zone not named in `exclude`, concurrently.
    ///
    /// The result holds exactly the zones that produced a frame within their own
    /// timeout. Failures are logged and the zone is left out.
    pub fn capture_all(&self, exclude: &[&str]) -> BTreeMap<String, Frame> {
        let started = Instant::now();
        let mut pending = Vec::new();
        for (zone, slot) in &self.slots {
            if exclude.contains(&zone.as_str()) {
                continue;
            }
            match spawn_capture(zone, slot) {
                Ok(rx) => pending.push((zone.clone(), slot.timeout, rx)),
                Err(e) => log::error!("capture worker for zone {} not started: {}", zone, e),
            }
        }

        let mut frames = BTreeMap::new();
        for (zone, timeout, rx) in pending {
            match await_capture(&zone, &rx, started + timeout) {
                Ok(frame) => {
                    frames.insert(zone, frame);
                }
                Err(e) => log::warn!("{}", e),
            }
        }
        log::debug!(
            "captured {} zone(s) in {:?}",
            frames.len(),
            started.elapsed()
        );
        frames
    }

    /// Capture every interior zone and persist the frames under `before/`.
    pub fn capture_before(&self) -> BTreeMap<String, Frame> {
        self.capture_stage(SnapshotStage::Before)
    }

    /// Capture every interior zone and persist the frames under `after/`.
    pub fn capture_after(&self) -> BTreeMap<String, Frame> {
        self.capture_stage(SnapshotStage::After)
    }

    /// Capture the face zone (bounded by its timeout) and persist it under `faces/`.
    pub fn capture_face(&self) -> Option<Frame> {
        let zone = self.face_zone.as_deref()?;
        let slot = self.slots.get(zone)?;
        let result = spawn_capture(zone, slot)
            .map_err(|e| CaptureError::ReadError(zone.to_string(), e.to_string()))
            .and_then(|rx| await_capture(zone, &rx, Instant::now() + slot.timeout));
        match result {
            Ok(frame) => {
                if let Some(writer) = &self.snapshots {
                    writer.write_all(SnapshotStage::Faces, [&frame]);
                }
                Some(frame)
            }
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    pub fn camera_info(&self) -> Vec<CameraInfo> {
        self.slots
            .iter()
            .map(|(zone, slot)| {
                let (is_open, last_capture_at) = match slot.state.try_lock() {
                    Ok(state) => (state.source.is_open(), state.last_capture_at),
                    // a capture is in flight
                    Err(TryLockError::WouldBlock) => (true, None),
                    Err(TryLockError::Poisoned(p)) => {
                        let state = p.into_inner();
                        (state.source.is_open(), state.last_capture_at)
                    }
                };
                CameraInfo {
                    zone: zone.clone(),
                    source: slot.source.clone(),
                    resolution: slot.resolution,
                    is_open,
                    last_capture_at,
                    is_face_zone: self.face_zone.as_deref() == Some(zone.as_str()),
                }
            })
            .collect()
    }

    /// Release one camera. A camera busy in a capture is skipped.
    pub fn release(&self, zone: &str) -> bool {
        let Some(slot) = self.slots.get(zone) else {
            return false;
        };
        match slot.state.try_lock() {
            Ok(mut state) => {
                state.source.release();
                true
            }
            Err(TryLockError::Poisoned(p)) => {
                p.into_inner().source.release();
                true
            }
            Err(TryLockError::WouldBlock) => {
                log::warn!("camera zone {} busy; not released", zone);
                false
            }
        }
    }

    pub fn release_all(&self) {
        for zone in self.slots.keys() {
            self.release(zone);
        }
    }

    fn capture_stage(&self, stage: SnapshotStage) -> BTreeMap<String, Frame> {
        let exclude: Vec<&str> = self.face_zone.as_deref().into_iter().collect();
        let frames = self.capture_all(&exclude);
        if let Some(writer) = &self.snapshots {
            writer.write_all(stage, frames.values());
        }
        log::info!(
            "{} capture: {}/{} zone(s)",
            stage.as_str(),
            frames.len(),
            self.slots.len() - exclude.len()
        );
        frames
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn capture_locked(zone: &str, state: &Mutex<SourceState>) -> Result<Frame, CaptureError> {
    let mut state = state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !state.source.is_open() {
        state
            .source
            .connect()
            .map_err(|e| CaptureError::NotOpen(zone.to_string(), format!("{:#}", e)))?;
    }
    let frame = state
        .source
        .capture(zone)
        .map_err(|e| CaptureError::ReadError(zone.to_string(), format!("{:#}", e)))?;
    state.last_capture_at = Some(now_s());
    Ok(frame)
}

fn spawn_capture(zone: &str, slot: &CameraSlot) -> std::io::Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = mpsc::channel();
    let state = Arc::clone(&slot.state);
    let zone = zone.to_string();
    // Detached: a worker that outlives its wait finishes on its own and the
    // send into the dropped receiver is ignored.
    thread::Builder::new()
        .name(format!("capture-{}", zone))
        .spawn(move || {
            let _ = tx.send(capture_locked(&zone, &state));
        })?;
    Ok(rx)
}

fn await_capture(
    zone: &str,
    rx: &Receiver<Result<Frame, CaptureError>>,
    deadline: Instant,
) -> Result<Frame, CaptureError> {
    let wait = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(wait) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(zone.to_string())),
        Err(RecvTimeoutError::Disconnected) => Err(CaptureError::ReadError(
            zone.to_string(),
            "capture worker exited without a result".to_string(),
        )),
    }
}
