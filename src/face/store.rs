//! Face profile persistence. Every mutation rewrites the whole store.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::profile::FaceProfile;

const STORE_VERSION: u32 = 1;

pub trait ProfileStore {
    fn load(&mut self) -> Result<Vec<FaceProfile>>;

    fn save(&mut self, profiles: &[FaceProfile]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct ProfileFile {
    version: u32,
    profiles: Vec<FaceProfile>,
}

/// Flat JSON file. Written to a sibling temp file and renamed into place.
#[derive(Clone, Debug)]
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&mut self) -> Result<Vec<FaceProfile>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read face store {}", self.path.display()))?;
        let file: ProfileFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse face store {}", self.path.display()))?;
        if file.version != STORE_VERSION {
            return Err(anyhow!(
                "face store {} has version {}, expected {}",
                self.path.display(),
                file.version,
                STORE_VERSION
            ));
        }
        Ok(file.profiles)
    }

    fn save(&mut self, profiles: &[FaceProfile]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = ProfileFile {
            version: STORE_VERSION,
            profiles: profiles.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace face store {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: Vec<FaceProfile>,
    saves: u64,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<FaceProfile>) -> Self {
        Self { profiles, saves: 0 }
    }

    pub fn saves(&self) -> u64 {
        self.saves
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn load(&mut self) -> Result<Vec<FaceProfile>> {
        Ok(self.profiles.clone())
    }

    fn save(&mut self, profiles: &[FaceProfile]) -> Result<()> {
        self.profiles = profiles.to_vec();
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_roundtrip_and_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = JsonProfileStore::new(dir.path().join("faces").join("profiles.json"));
        assert!(store.load()?.is_empty());

        let profile = FaceProfile::new(1, "ana", vec![0.25, -0.5]);
        store.save(&[profile.clone()])?;
        assert_eq!(store.load()?, vec![profile]);
        assert!(!dir.path().join("faces").join("profiles.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn json_store_rejects_garbage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("profiles.json");
        fs::write(&path, "not json")?;
        assert!(JsonProfileStore::new(&path).load().is_err());
        Ok(())
    }
}
