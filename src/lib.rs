//! Fridge Kernel
//!
//! This crate implements the change-detection core of a camera-equipped fridge.
//!
//! # Architecture
//!
//! A door cycle drives the pipeline:
//!
//! 1. **Door open**: every interior zone is captured ("before").
//! 2. **Door close**: every interior zone is captured again ("after").
//! 3. **Compare**: before/after pairs are diffed per zone into change regions.
//! 4. **Detect**: zones with significant change are run through the object detector.
//! 5. **Reconcile**: detected labels are merged into the user's inventory.
//!
//! The external face camera runs independently of the cycle and attributes the
//! session to an enrolled user.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames and grayscale planes
//! - `camera`: frame sources, multi-zone capture, snapshot persistence
//! - `compare`: before/after image comparison
//! - `detect`: object detection backends, confidence filtering, NMS
//! - `face`: face profile store and matching
//! - `inventory`: item records, shelf-life table, reconciliation
//! - `door`: door sensor callbacks and debounce
//! - `controller`: composition root that wires the components together
//! - `config`: file and environment configuration

use anyhow::{anyhow, Result};
use rusqlite::{Connection, OpenFlags};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod camera;
pub mod compare;
pub mod config;
pub mod controller;
pub mod detect;
pub mod door;
pub mod face;
pub mod frame;
pub mod inventory;

pub use camera::{
    CameraInfo, CameraManager, CaptureError, FrameSource, SnapshotStage, SnapshotWriter,
    SyntheticSource,
};
pub use compare::{ChangeRegion, ChangeType, ComparatorConfig, ImageComparator, ZoneComparison};
pub use config::FridgeConfig;
pub use controller::{ControllerStatus, CycleReport, CycleSettings, FridgeController};
pub use detect::{BoundingBox, Detection, DetectorBackend, DetectorConfig, ObjectDetector};
pub use door::{DoorEvent, DoorSensor};
pub use face::{
    FaceBox, FaceError, FaceMatch, FaceProfile, FacialIdentifier, InMemoryProfileStore,
    JsonProfileStore, ProfileStore,
};
pub use frame::{Frame, GrayPlane};
pub use inventory::{
    InMemoryInventoryStore, InventoryRecord, InventoryReconciler, InventoryStore,
    ReconcileReport, ShelfLife, SqliteInventoryStore, WasteReport,
};

/// User id assigned to door cycles nobody could be identified for.
pub const GUEST_USER_ID: u64 = 0;

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Seconds since the Unix epoch.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Zone names are used in snapshot file names, so they stay filesystem-safe.
pub fn validate_zone_name(zone: &str) -> Result<()> {
    static ZONE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_-]{1,64}$").expect("zone name pattern is valid")
    });

    if !re.is_match(zone) {
        return Err(anyhow!(
            "zone name '{}' must match ^[a-z0-9_-]{{1,64}}$",
            zone
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_names_are_filesystem_safe() {
        assert!(validate_zone_name("shelf_1_left").is_ok());
        assert!(validate_zone_name("door-shelf-2").is_ok());
        assert!(validate_zone_name("").is_err());
        assert!(validate_zone_name("Shelf 1").is_err());
        assert!(validate_zone_name("../etc").is_err());
    }

    #[test]
    fn clock_is_monotone_enough() {
        let s = now_s();
        let ms = now_ms();
        assert!(ms / 1000 >= s.saturating_sub(1));
    }
}
