//! Face identification.
//!
//! `FacialIdentifier` owns the enrolled profiles, a `FaceLocator`, a
//! `FaceEncoder` and a `ProfileStore`. Matching is nearest-neighbour by
//! Euclidean distance over every stored sample, accepted within a tolerance.
//! The in-memory profile list is authoritative; store failures are logged.

mod analyzer;
mod profile;
mod store;
#[cfg(feature = "backend-tract")]
mod tract;

#[cfg(feature = "face-rustface")]
pub use analyzer::RustfaceLocator;
pub use analyzer::{FaceBox, FaceEncoder, FaceLocator, FullFrameLocator, PixelDescriptorEncoder};
pub use profile::{face_distance, FaceProfile, FaceStats, UserStats};
pub use store::{InMemoryProfileStore, JsonProfileStore, ProfileStore};
#[cfg(feature = "backend-tract")]
pub use tract::TractFaceEncoder;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

use crate::frame::Frame;
use crate::{now_s, GUEST_USER_ID};

pub const DEFAULT_TOLERANCE: f32 = 0.6;

const MATCH_COLOR: [u8; 3] = [0, 255, 0];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub store_path: PathBuf,
    /// Largest accepted distance (lower is stricter).
    pub tolerance: f32,
    /// Minimum gray standard deviation for the full-frame locator.
    pub min_contrast: f64,
    /// SeetaFace cascade for `RustfaceLocator` (feature: face-rustface).
    pub detector_model_path: Option<PathBuf>,
    /// ONNX embedding model for `TractFaceEncoder` (feature: backend-tract).
    pub embedding_model_path: Option<PathBuf>,
    pub embedding_input_size: u32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("fridge_faces.json"),
            tolerance: DEFAULT_TOLERANCE,
            min_contrast: FullFrameLocator::DEFAULT_MIN_CONTRAST,
            detector_model_path: None,
            embedding_model_path: None,
            embedding_input_size: 112,
        }
    }
}

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("no face found in frame")]
    NoFace,
    #[error("user {0} is not enrolled")]
    UnknownUser(u64),
    #[error("face analysis failed: {0}")]
    Analysis(String),
}

/// A located face attributed to an enrolled user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceMatch {
    pub user_id: u64,
    pub display_name: String,
    /// `1 - distance`.
    pub confidence: f32,
    pub distance: f32,
    pub face: FaceBox,
}

pub struct FacialIdentifier {
    locator: Box<dyn FaceLocator>,
    encoder: Box<dyn FaceEncoder>,
    store: Box<dyn ProfileStore>,
    profiles: Vec<FaceProfile>,
    tolerance: f32,
}

impl FacialIdentifier {
    /// Build an identifier and load the store. A store that fails to load is
    /// logged and the identifier starts with no profiles.
    pub fn new(
        locator: Box<dyn FaceLocator>,
        encoder: Box<dyn FaceEncoder>,
        mut store: Box<dyn ProfileStore>,
        tolerance: f32,
    ) -> Self {
        let profiles = match store.load() {
            Ok(profiles) => {
                log::info!("loaded {} face profile(s)", profiles.len());
                profiles
            }
            Err(e) => {
                log::warn!("face store not loaded: {:#}; starting empty", e);
                Vec::new()
            }
        };
        Self {
            locator,
            encoder,
            store,
            profiles,
            tolerance,
        }
    }

    /// Full-frame locator and pixel descriptor over the given store.
    pub fn with_store(store: Box<dyn ProfileStore>, tolerance: f32) -> Self {
        Self::new(
            Box::new(FullFrameLocator::default()),
            Box::new(PixelDescriptorEncoder),
            store,
            tolerance,
        )
    }

    /// Build from configuration. Models that fail to load fall back to the
    /// built-in locator and encoder.
    pub fn from_config(config: &FaceConfig) -> Self {
        let locator: Box<dyn FaceLocator> = match &config.detector_model_path {
            #[cfg(feature = "face-rustface")]
            Some(path) => match RustfaceLocator::load(path) {
                Ok(locator) => Box::new(locator),
                Err(e) => {
                    log::warn!("{:#}; using full-frame face locator", e);
                    Box::new(FullFrameLocator::new(config.min_contrast))
                }
            },
            #[cfg(not(feature = "face-rustface"))]
            Some(path) => {
                log::warn!(
                    "face detector {} configured but built without face-rustface; using full-frame face locator",
                    path.display()
                );
                Box::new(FullFrameLocator::new(config.min_contrast))
            }
            None => Box::new(FullFrameLocator::new(config.min_contrast)),
        };

        let encoder: Box<dyn FaceEncoder> = match &config.embedding_model_path {
            #[cfg(feature = "backend-tract")]
            Some(path) => match TractFaceEncoder::load(path, config.embedding_input_size) {
                Ok(encoder) => Box::new(encoder),
                Err(e) => {
                    log::warn!("{:#}; using pixel descriptor encoder", e);
                    Box::new(PixelDescriptorEncoder)
                }
            },
            #[cfg(not(feature = "backend-tract"))]
            Some(path) => {
                log::warn!(
                    "embedding model {} configured but built without backend-tract; using pixel descriptor encoder",
                    path.display()
                );
                Box::new(PixelDescriptorEncoder)
            }
            None => Box::new(PixelDescriptorEncoder),
        };

        Self::new(
            locator,
            encoder,
            Box::new(JsonProfileStore::new(&config.store_path)),
            config.tolerance,
        )
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn profiles(&self) -> &[FaceProfile] {
        &self.profiles
    }

    pub fn profile(&self, user_id: u64) -> Option<&FaceProfile> {
        self.profiles.iter().find(|p| p.user_id == user_id)
    }

    /// Smallest id above every enrolled id. Never the guest id.
    pub fn next_user_id(&self) -> u64 {
        self.profiles
            .iter()
            .map(|p| p.user_id)
            .max()
            .unwrap_or(GUEST_USER_ID)
            .max(GUEST_USER_ID)
            + 1
    }

    /// Create or replace a profile from the first face in `frame`.
    pub fn enroll(
        &mut self,
        user_id: u64,
        display_name: &str,
        frame: &Frame,
        preferences: Map<String, Value>,
    ) -> Result<FaceProfile, FaceError> {
        let (_, encoding) = self.first_encoding(frame)?;
        let mut profile = FaceProfile::new(user_id, display_name, encoding);
        profile.preferences = preferences;
        profile.last_seen = Some(now_s());

        match self.profiles.iter_mut().find(|p| p.user_id == user_id) {
            Some(existing) => {
                log::info!("re-enrolled user {} ({})", user_id, display_name);
                *existing = profile.clone();
            }
            None => {
                log::info!("enrolled user {} ({})", user_id, display_name);
                self.profiles.push(profile.clone());
            }
        }
        self.persist();
        Ok(profile)
    }

    /// Append one more sample to an enrolled user. Returns the new sample count.
    pub fn add_sample(&mut self, user_id: u64, frame: &Frame) -> Result<usize, FaceError> {
        if self.profile(user_id).is_none() {
            return Err(FaceError::UnknownUser(user_id));
        }
        let (_, encoding) = self.first_encoding(frame)?;
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(FaceError::UnknownUser(user_id))?;
        profile.encodings.push(encoding);
        let samples = profile.encodings.len();
        log::info!("user {} now has {} face sample(s)", user_id, samples);
        self.persist();
        Ok(samples)
    }

    /// Match the first face in `frame`.
    pub fn identify(&mut self, frame: &Frame) -> Option<FaceMatch> {
        let faces = self.locate(frame);
        let face = *faces.first()?;
        let found = self.match_face(frame, face);
        if found.is_some() {
            self.persist();
        }
        found
    }

    /// Match every face in `frame` independently. Two faces may match the same user.
    pub fn identify_all(&mut self, frame: &Frame) -> Vec<FaceMatch> {
        let matches: Vec<FaceMatch> = self
            .locate(frame)
            .into_iter()
            .filter_map(|face| self.match_face(frame, face))
            .collect();
        if !matches.is_empty() {
            self.persist();
        }
        matches
    }

    pub fn remove(&mut self, user_id: u64) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.user_id != user_id);
        if self.profiles.len() == before {
            return false;
        }
        log::info!("removed user {}", user_id);
        self.persist();
        true
    }

    /// Merge `preferences` into the user's existing preferences.
    pub fn update_preferences(&mut self, user_id: u64, preferences: Map<String, Value>) -> bool {
        let Some(profile) = self.profiles.iter_mut().find(|p| p.user_id == user_id) else {
            return false;
        };
        profile.preferences.extend(preferences);
        self.persist();
        true
    }

    pub fn stats(&self) -> FaceStats {
        FaceStats {
            total_users: self.profiles.len(),
            users: self
                .profiles
                .iter()
                .map(|p| UserStats {
                    user_id: p.user_id,
                    display_name: p.display_name.clone(),
                    samples: p.encodings.len(),
                    last_seen: p.last_seen,
                    recognition_count: p.recognition_count,
                })
                .collect(),
        }
    }

    /// Copy of `frame` with a box around every matched face.
    pub fn annotate(&self, frame: &Frame, matches: &[FaceMatch]) -> Frame {
        let mut annotated = frame.clone();
        for m in matches {
            annotated.draw_rect(m.face.x, m.face.y, m.face.width, m.face.height, MATCH_COLOR, 2);
        }
        annotated
    }

    fn locate(&mut self, frame: &Frame) -> Vec<FaceBox> {
        match self.locator.locate(frame) {
            Ok(faces) => faces,
            Err(e) => {
                log::warn!("face location failed: {:#}", e);
                Vec::new()
            }
        }
    }

    fn first_encoding(&mut self, frame: &Frame) -> Result<(FaceBox, Vec<f32>), FaceError> {
        let faces = self
            .locator
            .locate(frame)
            .map_err(|e| FaceError::Analysis(format!("{:#}", e)))?;
        let face = *faces.first().ok_or(FaceError::NoFace)?;
        if faces.len() > 1 {
            log::warn!("{} faces in enrollment frame; using the first", faces.len());
        }
        let encoding = self
            .encoder
            .encode(frame, &face)
            .map_err(|e| FaceError::Analysis(format!("{:#}", e)))?;
        Ok((face, encoding))
    }

    /// Nearest profile within tolerance. Ties keep the earlier profile.
    fn best_match(&self, encoding: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, profile) in self.profiles.iter().enumerate() {
            for known in &profile.encodings {
                let distance = face_distance(known, encoding);
                if distance <= self.tolerance && best.map_or(true, |(_, d)| distance < d) {
                    best = Some((idx, distance));
                }
            }
        }
        best
    }

    fn match_face(&mut self, frame: &Frame, face: FaceBox) -> Option<FaceMatch> {
        let encoding = match self.encoder.encode(frame, &face) {
            Ok(encoding) => encoding,
            Err(e) => {
                log::warn!("face encoding failed: {:#}", e);
                return None;
            }
        };
        let (idx, distance) = self.best_match(&encoding)?;
        let profile = &mut self.profiles[idx];
        profile.recognition_count += 1;
        profile.last_seen = Some(now_s());
        log::info!(
            "recognised user {} ({}) at distance {:.3}",
            profile.user_id,
            profile.display_name,
            distance
        );
        Some(FaceMatch {
            user_id: profile.user_id,
            display_name: profile.display_name.clone(),
            confidence: 1.0 - distance,
            distance,
            face,
        })
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.profiles) {
            log::error!("face store not saved: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal(offset: u8) -> Frame {
        let mut frame = Frame::filled("door", 40, 60, [0, 0, 0]);
        for x in 0..40u32 {
            let v = (x * 5) as u8 + offset;
            for y in 0..60u32 {
                frame.put_pixel(x, y, [v, v, v]);
            }
        }
        frame
    }

    fn vertical() -> Frame {
        let mut frame = Frame::filled("door", 40, 60, [0, 0, 0]);
        for y in 0..60u32 {
            let v = (y * 4) as u8;
            for x in 0..40u32 {
                frame.put_pixel(x, y, [v, v, v]);
            }
        }
        frame
    }

    fn identifier() -> FacialIdentifier {
        FacialIdentifier::with_store(Box::new(InMemoryProfileStore::new()), DEFAULT_TOLERANCE)
    }

    #[test]
    fn enroll_then_identify_is_exact() -> anyhow::Result<()> {
        let mut faces = identifier();
        let frame = horizontal(0);
        let profile = faces.enroll(1, "ana", &frame, Map::new())?;
        assert_eq!(profile.encodings.len(), 1);
        assert!(profile.last_seen.is_some());

        let found = faces.identify(&frame).expect("match");
        assert_eq!(found.user_id, 1);
        assert!((found.confidence - 1.0).abs() < 1e-5);
        assert_eq!(faces.profile(1).map(|p| p.recognition_count), Some(1));
        Ok(())
    }

    #[test]
    fn nearest_user_wins() -> anyhow::Result<()> {
        let mut faces = identifier();
        faces.enroll(1, "ana", &horizontal(0), Map::new())?;
        faces.enroll(2, "ben", &vertical(), Map::new())?;

        assert_eq!(faces.identify(&vertical()).map(|m| m.user_id), Some(2));
        // a brightness shift is removed by the zero-mean descriptor
        assert_eq!(faces.identify(&horizontal(20)).map(|m| m.user_id), Some(1));
        Ok(())
    }

    #[test]
    fn unknown_face_is_none() -> anyhow::Result<()> {
        let mut faces = identifier();
        faces.enroll(1, "ana", &horizontal(0), Map::new())?;
        assert!(faces.identify(&vertical()).is_none());
        assert!(faces
            .identify(&Frame::filled("door", 40, 60, [9, 9, 9]))
            .is_none());
        assert_eq!(faces.profile(1).map(|p| p.recognition_count), Some(0));
        Ok(())
    }

    #[test]
    fn enroll_without_face_fails() {
        let mut faces = identifier();
        let blank = Frame::filled("door", 40, 60, [50, 50, 50]);
        assert!(matches!(
            faces.enroll(1, "ana", &blank, Map::new()),
            Err(FaceError::NoFace)
        ));
        assert!(faces.profiles().is_empty());
    }

    #[test]
    fn add_sample_grows_encodings() -> anyhow::Result<()> {
        let mut faces = identifier();
        assert!(matches!(
            faces.add_sample(7, &horizontal(0)),
            Err(FaceError::UnknownUser(7))
        ));
        faces.enroll(7, "kai", &horizontal(0), Map::new())?;
        assert_eq!(faces.add_sample(7, &vertical())?, 2);
        assert_eq!(faces.add_sample(7, &horizontal(10))?, 3);
        // the second sample makes the vertical pattern recognisable as kai
        assert_eq!(faces.identify(&vertical()).map(|m| m.user_id), Some(7));
        Ok(())
    }

    #[test]
    fn identify_all_allows_repeat_users() -> anyhow::Result<()> {
        struct TwoHalves;
        impl FaceLocator for TwoHalves {
            fn locate(&mut self, frame: &Frame) -> anyhow::Result<Vec<FaceBox>> {
                let half = frame.width / 2;
                Ok(vec![
                    FaceBox { x: 0, y: 0, width: half, height: frame.height },
                    FaceBox { x: half, y: 0, width: half, height: frame.height },
                ])
            }
        }
        let mut faces = FacialIdentifier::new(
            Box::new(TwoHalves),
            Box::new(PixelDescriptorEncoder),
            Box::new(InMemoryProfileStore::new()),
            DEFAULT_TOLERANCE,
        );
        let frame = vertical();
        faces.enroll(3, "lee", &frame, Map::new())?;
        let matches = faces.identify_all(&frame);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.user_id == 3));
        assert_eq!(faces.profile(3).map(|p| p.recognition_count), Some(2));

        let annotated = faces.annotate(&frame, &matches);
        assert_eq!(annotated.pixel(0, 0), MATCH_COLOR);
        Ok(())
    }

    #[test]
    fn remove_preferences_and_stats() -> anyhow::Result<()> {
        let mut faces = identifier();
        let mut prefs = Map::new();
        prefs.insert("diet".to_string(), Value::from("vegetarian"));
        faces.enroll(1, "ana", &horizontal(0), prefs)?;
        faces.enroll(4, "dev", &vertical(), Map::new())?;
        assert_eq!(faces.next_user_id(), 5);

        let mut update = Map::new();
        update.insert("allergies".to_string(), Value::from(vec!["peanut"]));
        assert!(faces.update_preferences(1, update));
        assert!(!faces.update_preferences(99, Map::new()));
        let prefs = &faces.profile(1).expect("ana").preferences;
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs["diet"], "vegetarian");

        let stats = faces.stats();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.users[0].samples, 1);

        assert!(faces.remove(4));
        assert!(!faces.remove(4));
        assert_eq!(faces.next_user_id(), 2);
        Ok(())
    }

    /// Returns whatever encoding the test last put in the shared slot.
    struct FixedEncoder(std::sync::Arc<std::sync::Mutex<Vec<f32>>>);
    impl FaceEncoder for FixedEncoder {
        fn encode(&mut self, _frame: &Frame, _face: &FaceBox) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    #[test]
    fn exact_tie_keeps_first_enrolled() -> anyhow::Result<()> {
        let mut faces = identifier();
        let frame = horizontal(0);
        faces.enroll(1, "ana", &frame, Map::new())?;
        faces.enroll(2, "twin", &frame, Map::new())?;
        assert_eq!(faces.identify(&frame).map(|m| m.user_id), Some(1));
        assert_eq!(faces.profile(2).map(|p| p.recognition_count), Some(0));
        Ok(())
    }

    #[test]
    fn distance_equal_to_tolerance_matches() -> anyhow::Result<()> {
        let encoding = std::sync::Arc::new(std::sync::Mutex::new(vec![0.0, 0.0]));
        let mut faces = FacialIdentifier::new(
            Box::new(FullFrameLocator::default()),
            Box::new(FixedEncoder(encoding.clone())),
            Box::new(InMemoryProfileStore::new()),
            0.5,
        );
        faces.enroll(1, "ana", &horizontal(0), Map::new())?;

        *encoding.lock().unwrap() = vec![0.5, 0.0];
        let found = faces.identify(&horizontal(0)).expect("match at tolerance");
        assert_eq!(found.user_id, 1);
        assert_eq!(found.distance, 0.5);

        *encoding.lock().unwrap() = vec![0.5, 0.001];
        assert!(faces.identify(&horizontal(0)).is_none());
        Ok(())
    }

    #[test]
    fn first_user_id_is_not_guest() {
        assert_eq!(identifier().next_user_id(), GUEST_USER_ID + 1);
    }
}
