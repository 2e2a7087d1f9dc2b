//! Door-cycle controller.
//!
//! `FridgeController` owns one of each component and runs the cycle:
//! door open captures the "before" set, door close captures "after", compares
//! every zone, keeps the significant regions, runs detection on the zones that
//! changed and reconciles the detections into the current user's inventory.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::camera::{CameraInfo, CameraManager, SnapshotStage, SnapshotWriter};
use crate::compare::{
    filter_by_confidence, merge_overlapping, ChangeRegion, ImageComparator,
    DEFAULT_OVERLAP_THRESHOLD,
};
use crate::config::FridgeConfig;
use crate::detect::{Detection, ObjectDetector};
use crate::face::{FaceMatch, FaceProfile, FacialIdentifier};
use crate::frame::Frame;
use crate::inventory::{InventoryReconciler, ReconcileReport, ShelfLife, SqliteInventoryStore};
use crate::GUEST_USER_ID;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleSettings {
    /// Regions below this confidence do not trigger detection.
    pub min_change_confidence: f32,
    pub overlap_threshold: f32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            min_change_confidence: 0.6,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// Outcome of one door close.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    pub opened_at_ms: Option<u64>,
    pub closed_at_ms: u64,
    pub user_id: u64,
    pub zones_compared: usize,
    /// Significant regions after confidence filtering and merging.
    pub regions: Vec<ChangeRegion>,
    /// Detections per zone, for zones with at least one significant region.
    pub detections: BTreeMap<String, Vec<Detection>>,
    /// `None` when nothing was detected and the inventory was left alone.
    pub inventory: Option<ReconcileReport>,
    pub annotated: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ControllerStatus {
    pub door_open: bool,
    pub user_id: u64,
    pub user_name: String,
    pub cameras: Vec<CameraInfo>,
    pub enrolled_users: usize,
    pub inventory_items: usize,
    pub detector_loaded: bool,
    pub cycles_completed: u64,
}

struct DoorSession {
    opened_at_ms: u64,
    before: BTreeMap<String, Frame>,
}

#[derive(Clone, Debug)]
struct CurrentUser {
    user_id: u64,
    display_name: String,
}

pub struct FridgeController {
    cameras: CameraManager,
    comparator: ImageComparator,
    detector: ObjectDetector,
    faces: FacialIdentifier,
    inventory: InventoryReconciler,
    settings: CycleSettings,
    session: Option<DoorSession>,
    current_user: Option<CurrentUser>,
    cycles_completed: u64,
}

impl FridgeController {
    pub fn new(
        cameras: CameraManager,
        comparator: ImageComparator,
        detector: ObjectDetector,
        faces: FacialIdentifier,
        inventory: InventoryReconciler,
        settings: CycleSettings,
    ) -> Self {
        Self {
            cameras,
            comparator,
            detector,
            faces,
            inventory,
            settings,
            session: None,
            current_user: None,
            cycles_completed: 0,
        }
    }

    /// Build every component from configuration.
    ///
    /// Cameras are registered but not opened; a missing detection or face model
    /// degrades instead of failing. The inventory database must open.
    pub fn from_config(cfg: &FridgeConfig) -> Result<Self> {
        let mut cameras = CameraManager::new()
            .with_snapshots(SnapshotWriter::new(&cfg.capture.snapshot_dir))
            .with_default_timeout(cfg.capture.timeout);
        let resolution = (cfg.capture.width, cfg.capture.height);
        for camera in &cfg.cameras {
            let added = cameras
                .add_camera(&camera.zone, &camera.source, resolution)
                .with_context(|| format!("camera zone {}", camera.zone))?;
            if !added {
                return Err(anyhow!("camera zone {} configured twice", camera.zone));
            }
        }
        if let Some(face_zone) = &cfg.face_zone {
            cameras.set_face_zone(face_zone)?;
        }

        let mut detector = ObjectDetector::from_config(cfg.detector.clone());
        detector.warm_up();

        let faces = FacialIdentifier::from_config(&cfg.face);

        let store = SqliteInventoryStore::open(&cfg.inventory.db_path)
            .with_context(|| format!("open inventory database {}", cfg.inventory.db_path))?;
        let inventory = InventoryReconciler::new(
            Box::new(store),
            ShelfLife::with_overrides(&cfg.inventory.shelf_life),
            cfg.inventory.removal_miss_threshold,
        );

        Ok(Self::new(
            cameras,
            ImageComparator::new(cfg.comparator.clone()),
            detector,
            faces,
            inventory,
            CycleSettings {
                min_change_confidence: cfg.min_change_confidence,
                overlap_threshold: cfg.overlap_threshold,
            },
        ))
    }

    pub fn cameras(&self) -> &CameraManager {
        &self.cameras
    }

    pub fn faces(&self) -> &FacialIdentifier {
        &self.faces
    }

    pub fn faces_mut(&mut self) -> &mut FacialIdentifier {
        &mut self.faces
    }

    pub fn inventory_mut(&mut self) -> &mut InventoryReconciler {
        &mut self.inventory
    }

    pub fn is_door_open(&self) -> bool {
        self.session.is_some()
    }

    /// User the next cycle is attributed to; the guest id when nobody was identified.
    pub fn current_user_id(&self) -> u64 {
        self.current_user
            .as_ref()
            .map(|u| u.user_id)
            .unwrap_or(GUEST_USER_ID)
    }

    /// Capture the "before" set and open a session. A second open replaces the
    /// previous session's frames.
    pub fn on_door_open(&mut self, ts_ms: u64) {
        if self.session.is_some() {
            log::warn!("door opened while a session was already open; restarting session");
        }
        let before = self.cameras.capture_before();
        log::info!("door open at {}: {} before frame(s)", ts_ms, before.len());
        self.session = Some(DoorSession {
            opened_at_ms: ts_ms,
            before,
        });
    }

    /// Capture the "after" set and run the cycle. Without an open session the
    /// cycle has nothing to compare against and reports no changes.
    pub fn on_door_close(&mut self, ts_ms: u64) -> CycleReport {
        let user_id = self.current_user_id();
        let mut report = CycleReport {
            closed_at_ms: ts_ms,
            user_id,
            ..CycleReport::default()
        };
        let Some(session) = self.session.take() else {
            log::warn!("door closed without an open session; nothing to compare");
            return report;
        };
        report.opened_at_ms = Some(session.opened_at_ms);

        let after = self.cameras.capture_after();
        let comparisons = self.comparator.compare_all_zones(&session.before, &after);
        report.zones_compared = comparisons.len();

        let all_regions: Vec<ChangeRegion> = comparisons
            .values()
            .flat_map(|c| c.regions.iter().cloned())
            .collect();
        let significant = filter_by_confidence(&all_regions, self.settings.min_change_confidence);
        report.regions = merge_overlapping(&significant, self.settings.overlap_threshold);
        log::info!(
            "{} change region(s), {} significant",
            all_regions.len(),
            report.regions.len()
        );

        // merging crosses zones, so zones come from the unmerged regions
        let changed_zones: BTreeSet<&str> = significant.iter().map(|r| r.zone.as_str()).collect();

        for zone in &changed_zones {
            if let Some(frame) = after.get(*zone) {
                report
                    .detections
                    .insert(zone.to_string(), self.detector.detect(frame));
            }
            if let (Some(writer), Some(comparison)) = (self.cameras.snapshots(), comparisons.get(*zone)) {
                match writer.write(SnapshotStage::Annotated, &comparison.annotated) {
                    Ok(path) => report.annotated.push(path),
                    Err(e) => log::warn!("annotated frame for zone {} not saved: {:#}", zone, e),
                }
            }
        }

        let detections: Vec<Detection> = report.detections.values().flatten().cloned().collect();
        if detections.is_empty() {
            if !changed_zones.is_empty() {
                log::info!("changes seen but no items recognised; inventory unchanged");
            }
        } else {
            report.inventory = Some(self.inventory.reconcile_at(user_id, &detections, ts_ms / 1000));
        }

        self.cycles_completed += 1;
        log::info!(
            "cycle complete for user {} ({} ms door open)",
            user_id,
            ts_ms.saturating_sub(session.opened_at_ms)
        );
        report
    }

    /// Identify whoever is in front of the face camera and make them the
    /// current user. No match makes the guest current.
    pub fn detect_user(&mut self) -> Option<FaceMatch> {
        let Some(frame) = self.cameras.capture_face() else {
            log::warn!("no frame from the face camera");
            return None;
        };
        let found = self.faces.identify(&frame);
        self.current_user = found.as_ref().map(|m| CurrentUser {
            user_id: m.user_id,
            display_name: m.display_name.clone(),
        });
        if found.is_none() {
            log::info!("no enrolled user recognised; continuing as guest");
        }
        found
    }

    /// Enroll whoever is in front of the face camera under the next free user id.
    pub fn enroll_user(&mut self, display_name: &str, preferences: Map<String, Value>) -> Result<FaceProfile> {
        let frame = self
            .cameras
            .capture_face()
            .ok_or_else(|| anyhow!("no frame from the face camera"))?;
        let user_id = self.faces.next_user_id();
        let profile = self.faces.enroll(user_id, display_name, &frame, preferences)?;
        Ok(profile)
    }

    pub fn status(&mut self) -> ControllerStatus {
        let user_id = self.current_user_id();
        ControllerStatus {
            door_open: self.is_door_open(),
            user_id,
            user_name: self
                .current_user
                .as_ref()
                .map(|u| u.display_name.clone())
                .unwrap_or_else(|| "Guest".to_string()),
            cameras: self.cameras.camera_info(),
            enrolled_users: self.faces.profiles().len(),
            inventory_items: self.inventory.get_inventory(user_id).len(),
            detector_loaded: self.detector.is_loaded(),
            cycles_completed: self.cycles_completed,
        }
    }

    pub fn shutdown(&self) {
        self.cameras.release_all();
        log::info!("cameras released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{SyntheticPattern, SyntheticSource};
    use crate::detect::{BoundingBox, DetectorConfig, ScriptedBackend};
    use crate::face::InMemoryProfileStore;
    use crate::inventory::InMemoryInventoryStore;

    fn controller(detector: ObjectDetector, snapshots: &std::path::Path) -> FridgeController {
        let mut cameras = CameraManager::new().with_snapshots(SnapshotWriter::new(snapshots));
        cameras.add_source(
            "shelf_1",
            Box::new(SyntheticSource::new(SyntheticPattern::Scene, 320, 240)),
            (320, 240),
        );
        cameras.add_source(
            "door",
            Box::new(SyntheticSource::new(SyntheticPattern::Gradient, 64, 64)),
            (64, 64),
        );
        cameras.set_face_zone("door").unwrap();
        FridgeController::new(
            cameras,
            ImageComparator::default(),
            detector,
            FacialIdentifier::with_store(Box::new(InMemoryProfileStore::new()), 0.6),
            InventoryReconciler::new(
                Box::new(InMemoryInventoryStore::new()),
                ShelfLife::default(),
                1,
            ),
            CycleSettings {
                min_change_confidence: 0.3,
                overlap_threshold: 0.5,
            },
        )
    }

    fn milk_detector() -> ObjectDetector {
        ObjectDetector::new(
            Box::new(ScriptedBackend::constant(vec![Detection::new(
                "milk",
                0.9,
                BoundingBox::new(100, 80, 80, 60),
            )])),
            DetectorConfig::default(),
        )
    }

    #[test]
    fn door_cycle_adds_detected_items_for_guest() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(milk_detector(), dir.path());

        ctl.on_door_open(1_000);
        assert!(ctl.is_door_open());
        let report = ctl.on_door_close(4_000);

        assert!(!ctl.is_door_open());
        assert_eq!(report.user_id, GUEST_USER_ID);
        assert_eq!(report.opened_at_ms, Some(1_000));
        assert_eq!(report.zones_compared, 1);
        assert_eq!(report.regions.len(), 1);
        assert_eq!(report.regions[0].zone, "shelf_1");
        let inventory = report.inventory.expect("reconciled");
        assert_eq!(inventory.added, vec!["milk"]);
        assert_eq!(report.annotated.len(), 1);
        assert!(report.annotated[0].exists());
        assert_eq!(ctl.status().inventory_items, 1);
    }

    #[test]
    fn no_detections_leave_inventory_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(ObjectDetector::unloaded(DetectorConfig::default()), dir.path());
        ctl.inventory_mut().add_item(GUEST_USER_ID, "egg", 6, None).unwrap();

        ctl.on_door_open(1_000);
        let report = ctl.on_door_close(2_000);
        assert_eq!(report.regions.len(), 1);
        assert!(report.inventory.is_none());
        assert_eq!(ctl.inventory_mut().get_inventory(GUEST_USER_ID).len(), 1);
    }

    #[test]
    fn close_without_open_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(milk_detector(), dir.path());
        let report = ctl.on_door_close(2_000);
        assert_eq!(report.opened_at_ms, None);
        assert!(report.regions.is_empty());
        assert!(report.inventory.is_none());
        assert_eq!(ctl.status().cycles_completed, 0);
    }

    #[test]
    fn enrolled_user_owns_the_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(milk_detector(), dir.path());

        let profile = ctl.enroll_user("alice", Map::new()).unwrap();
        assert_eq!(profile.user_id, 1);
        let found = ctl.detect_user().expect("recognised");
        assert_eq!(found.user_id, 1);
        assert_eq!(ctl.status().user_name, "alice");

        ctl.on_door_open(1_000);
        let report = ctl.on_door_close(2_000);
        assert_eq!(report.user_id, 1);
        assert!(ctl.inventory_mut().get_inventory(GUEST_USER_ID).is_empty());
        assert_eq!(ctl.inventory_mut().get_inventory(1).len(), 1);
    }
}
