use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compare::{ComparatorConfig, DEFAULT_OVERLAP_THRESHOLD};
use crate::detect::DetectorConfig;
use crate::door::DoorConfig;
use crate::face::FaceConfig;
use crate::inventory::InventoryConfig;

const DEFAULT_FACE_ZONE: &str = "external_face";
const DEFAULT_FACE_SOURCE: &str = "stub://gradient";
const DEFAULT_SHELF_ZONE: &str = "shelf_1_left";
const DEFAULT_SHELF_SOURCE: &str = "stub://scene";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_MIN_CHANGE_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Deserialize, Default)]
struct FridgeConfigFile {
    cameras: Option<Vec<CameraConfigFile>>,
    face_zone: Option<String>,
    capture: Option<CaptureConfigFile>,
    cycle: Option<CycleConfigFile>,
    comparator: Option<ComparatorConfig>,
    detector: Option<DetectorConfig>,
    face: Option<FaceConfig>,
    inventory: Option<InventoryConfig>,
    door: Option<DoorConfig>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    zone: String,
    source: String,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    timeout_ms: Option<u64>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CycleConfigFile {
    min_change_confidence: Option<f32>,
    overlap_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub zone: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
    /// Root of the before/after/faces/annotated snapshot tree.
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FridgeConfig {
    pub cameras: Vec<CameraSettings>,
    pub face_zone: Option<String>,
    pub capture: CaptureSettings,
    /// Change regions below this confidence are ignored by the door cycle.
    pub min_change_confidence: f32,
    pub overlap_threshold: f32,
    pub comparator: ComparatorConfig,
    pub detector: DetectorConfig,
    pub face: FaceConfig,
    pub inventory: InventoryConfig,
    pub door: DoorConfig,
}

impl Default for FridgeConfig {
    fn default() -> Self {
        Self::from_file(FridgeConfigFile::default())
    }
}

impl FridgeConfig {
    /// Defaults, then the file named by `FRIDGE_CONFIG`, then `FRIDGE_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRIDGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Interior zones: every camera except the face camera.
    pub fn interior_zones(&self) -> Vec<&str> {
        self.cameras
            .iter()
            .map(|c| c.zone.as_str())
            .filter(|zone| Some(*zone) != self.face_zone.as_deref())
            .collect()
    }

    fn from_file(file: FridgeConfigFile) -> Self {
        let (cameras, face_zone) = match file.cameras {
            Some(cameras) => (
                cameras
                    .into_iter()
                    .map(|c| CameraSettings {
                        zone: c.zone,
                        source: c.source,
                    })
                    .collect(),
                file.face_zone,
            ),
            None => (
                default_cameras(),
                file.face_zone.or_else(|| Some(DEFAULT_FACE_ZONE.to_string())),
            ),
        };
        let capture = CaptureSettings {
            width: file
                .capture
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_HEIGHT),
            timeout: Duration::from_millis(
                file.capture
                    .as_ref()
                    .and_then(|c| c.timeout_ms)
                    .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_MS),
            ),
            snapshot_dir: file
                .capture
                .and_then(|c| c.snapshot_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
        };
        Self {
            cameras,
            face_zone,
            capture,
            min_change_confidence: file
                .cycle
                .as_ref()
                .and_then(|c| c.min_change_confidence)
                .unwrap_or(DEFAULT_MIN_CHANGE_CONFIDENCE),
            overlap_threshold: file
                .cycle
                .and_then(|c| c.overlap_threshold)
                .unwrap_or(DEFAULT_OVERLAP_THRESHOLD),
            comparator: file.comparator.unwrap_or_default(),
            detector: file.detector.unwrap_or_default(),
            face: file.face.unwrap_or_default(),
            inventory: file.inventory.unwrap_or_default(),
            door: file.door.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("FRIDGE_DB_PATH") {
            self.inventory.db_path = path;
        }
        if let Some(path) = non_empty_env("FRIDGE_FACE_STORE") {
            self.face.store_path = PathBuf::from(path);
        }
        if let Some(dir) = non_empty_env("FRIDGE_SNAPSHOT_DIR") {
            self.capture.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty_env("FRIDGE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("FRIDGE_LABELS_PATH") {
            self.detector.labels_path = Some(PathBuf::from(path));
        }
        if let Some(tolerance) = non_empty_env("FRIDGE_FACE_TOLERANCE") {
            self.face.tolerance = tolerance
                .parse()
                .map_err(|_| anyhow!("FRIDGE_FACE_TOLERANCE must be a number"))?;
        }
        if let Some(timeout) = non_empty_env("FRIDGE_CAPTURE_TIMEOUT_MS") {
            let ms: u64 = timeout.parse().map_err(|_| {
                anyhow!("FRIDGE_CAPTURE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.capture.timeout = Duration::from_millis(ms);
        }
        if let Some(cameras) = non_empty_env("FRIDGE_CAMERAS") {
            self.cameras = parse_cameras(&cameras)?;
        }
        if let Ok(zone) = std::env::var("FRIDGE_FACE_ZONE") {
            let zone = zone.trim();
            self.face_zone = (!zone.is_empty()).then(|| zone.to_string());
        }
        if let Some(misses) = non_empty_env("FRIDGE_REMOVAL_MISSES") {
            self.inventory.removal_miss_threshold = misses
                .parse()
                .map_err(|_| anyhow!("FRIDGE_REMOVAL_MISSES must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut zones = BTreeSet::new();
        for camera in &self.cameras {
            crate::validate_zone_name(&camera.zone)?;
            if camera.source.trim().is_empty() {
                return Err(anyhow!("camera {} has an empty source", camera.zone));
            }
            if !zones.insert(camera.zone.as_str()) {
                return Err(anyhow!("camera zone {} is configured twice", camera.zone));
            }
        }
        if let Some(face_zone) = &self.face_zone {
            if !zones.contains(face_zone.as_str()) {
                return Err(anyhow!("face zone {} has no camera", face_zone));
            }
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture resolution must be non-zero"));
        }
        if self.capture.timeout.is_zero() {
            return Err(anyhow!("capture timeout must be greater than zero"));
        }
        check_unit("min_change_confidence", self.min_change_confidence)?;
        check_unit("overlap_threshold", self.overlap_threshold)?;
        check_unit("detector.confidence_threshold", self.detector.confidence_threshold)?;
        check_unit("detector.nms_iou_threshold", self.detector.nms_iou_threshold)?;
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        if self.comparator.blur_kernel_size == 0 {
            return Err(anyhow!("comparator.blur_kernel_size must be greater than zero"));
        }
        if !(self.face.tolerance.is_finite() && self.face.tolerance > 0.0) {
            return Err(anyhow!("face tolerance must be a positive number"));
        }
        if self.inventory.removal_miss_threshold == 0 {
            return Err(anyhow!("inventory.removal_miss_threshold must be at least 1"));
        }
        Ok(())
    }
}

fn default_cameras() -> Vec<CameraSettings> {
    vec![
        CameraSettings {
            zone: DEFAULT_FACE_ZONE.to_string(),
            source: DEFAULT_FACE_SOURCE.to_string(),
        },
        CameraSettings {
            zone: DEFAULT_SHELF_ZONE.to_string(),
            source: DEFAULT_SHELF_SOURCE.to_string(),
        },
    ]
}

fn read_config_file(path: &Path) -> Result<FridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

/// `zone=source,zone=source`. Sources may contain `=` after the first one.
fn parse_cameras(value: &str) -> Result<Vec<CameraSettings>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (zone, source) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("FRIDGE_CAMERAS entry {:?} must be zone=source", entry))?;
            Ok(CameraSettings {
                zone: zone.trim().to_string(),
                source: source.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = FridgeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.face_zone.as_deref(), Some("external_face"));
        assert_eq!(cfg.interior_zones(), vec!["shelf_1_left"]);
        assert_eq!(cfg.capture.timeout, Duration::from_secs(5));
        assert_eq!(cfg.min_change_confidence, 0.6);
        assert_eq!(cfg.inventory.removal_miss_threshold, 1);
    }

    #[test]
    fn camera_list_parses() {
        let cameras = parse_cameras("door=stub://gradient, shelf_1=http://cam/snap?res=hi").unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].zone, "door");
        assert_eq!(cameras[1].source, "http://cam/snap?res=hi");
        assert!(parse_cameras("shelf_1").is_err());
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut cfg = FridgeConfig::default();
        cfg.cameras.push(cfg.cameras[1].clone());
        assert!(cfg.validate().is_err());

        let mut cfg = FridgeConfig::default();
        cfg.face_zone = Some("garage".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = FridgeConfig::default();
        cfg.min_change_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = FridgeConfig::default();
        cfg.inventory.removal_miss_threshold = 0;
        assert!(cfg.validate().is_err());
    }
}
