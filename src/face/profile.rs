use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Enrolled household member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceProfile {
    pub user_id: u64,
    pub display_name: String,
    /// One fixed-length vector per enrolled sample.
    pub encodings: Vec<Vec<f32>>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
    /// Epoch seconds of the last enrollment or recognition.
    #[serde(default)]
    pub last_seen: Option<u64>,
    #[serde(default)]
    pub recognition_count: u64,
}

impl FaceProfile {
    pub fn new(user_id: u64, display_name: impl Into<String>, encoding: Vec<f32>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            encodings: vec![encoding],
            preferences: Map::new(),
            last_seen: None,
            recognition_count: 0,
        }
    }

    /// Smallest distance from `encoding` to any stored sample.
    pub fn best_distance(&self, encoding: &[f32]) -> Option<f32> {
        self.encodings
            .iter()
            .map(|known| face_distance(known, encoding))
            .filter(|d| d.is_finite())
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Euclidean distance. Vectors of different length never match.
pub fn face_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Per-user summary used by `FacialIdentifier::stats`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserStats {
    pub user_id: u64,
    pub display_name: String,
    pub samples: usize,
    pub last_seen: Option<u64>,
    pub recognition_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceStats {
    pub total_users: usize,
    pub users: Vec<UserStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_basics() {
        assert_eq!(face_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert!(face_distance(&[0.0], &[0.0, 1.0]).is_infinite());
    }

    #[test]
    fn best_distance_over_samples() {
        let mut profile = FaceProfile::new(1, "ana", vec![1.0, 0.0]);
        profile.encodings.push(vec![0.0, 1.0]);
        assert_eq!(profile.best_distance(&[0.0, 1.0]), Some(0.0));
        assert_eq!(profile.best_distance(&[0.0, 1.0, 2.0]), None);
    }

    #[test]
    fn older_files_without_optional_fields_parse() -> anyhow::Result<()> {
        let profile: FaceProfile = serde_json::from_str(
            r#"{"user_id": 3, "display_name": "sam", "encodings": [[0.5, 0.5]]}"#,
        )?;
        assert_eq!(profile.recognition_count, 0);
        assert!(profile.preferences.is_empty());
        Ok(())
    }
}
