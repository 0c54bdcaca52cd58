//! Versioned, file-backed model storage.
//!
//! One JSON file per model version under `models/`, written atomically
//! (temp file then rename). Versions are immutable once written. On open
//! the store scans the directory and resumes from the highest version; an
//! empty store synthesizes a deterministic all-zeros `v1`.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fedcoord_common::types::LayerWeights;
use fedcoord_common::{unix_time_ms, CoordError, ModelVersion};

/// One immutable model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModel {
    pub version: ModelVersion,
    /// Layer weight arrays, in layer order.
    pub weights: LayerWeights,
    /// The version this one was aggregated from (`None` for `v1`).
    #[serde(default)]
    pub base_version: Option<ModelVersion>,
    /// The round whose aggregation produced this version (`None` for `v1`).
    #[serde(default)]
    pub round_id: Option<u64>,
    /// Number of client deltas averaged into this version.
    #[serde(default)]
    pub num_updates: u32,
    pub created_at_ms: u64,
}

impl StoredModel {
    /// The deterministic initial model: all-zero layers in the given shape.
    pub fn initial(shape: &[usize]) -> Self {
        StoredModel {
            version: ModelVersion::INITIAL,
            weights: shape.iter().map(|&n| vec![0.0; n]).collect(),
            base_version: None,
            round_id: None,
            num_updates: 0,
            created_at_ms: unix_time_ms(),
        }
    }

    /// Per-layer element counts.
    pub fn shape(&self) -> Vec<usize> {
        fedcoord_common::types::shape_of(&self.weights)
    }
}

/// Directory-backed model store keyed by version string.
#[derive(Debug)]
pub struct ModelStore {
    dir: PathBuf,
    versions: BTreeSet<ModelVersion>,
}

impl ModelStore {
    /// Opens (creating if needed) a store rooted at `dir` and indexes the
    /// versions already present.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut versions = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(version) = ModelVersion::parse(stem) {
                versions.insert(version);
            }
        }

        debug!(dir = %dir.display(), versions = versions.len(), "model store opened");
        Ok(Self { dir, versions })
    }

    /// The highest version on disk, if any.
    pub fn latest(&self) -> Option<ModelVersion> {
        self.versions.iter().next_back().copied()
    }

    /// All known versions in ascending order.
    pub fn versions(&self) -> Vec<ModelVersion> {
        self.versions.iter().copied().collect()
    }

    pub fn contains(&self, version: ModelVersion) -> bool {
        self.versions.contains(&version)
    }

    /// Loads the latest model, synthesizing and persisting the zero-filled
    /// `v1` first when the store is empty.
    pub fn ensure_initial(&mut self, shape: &[usize]) -> Result<StoredModel, CoordError> {
        match self.latest() {
            Some(version) => self.get(version),
            None => {
                let model = StoredModel::initial(shape);
                self.put(&model)?;
                info!(version = %model.version, ?shape, "initialized model store");
                Ok(model)
            }
        }
    }

    /// Writes a model atomically and records it in the index.
    pub fn put(&mut self, model: &StoredModel) -> Result<(), CoordError> {
        write_model_file(&self.dir, model)
            .map_err(|e| CoordError::Internal(format!("model write failed: {e}")))?;
        self.versions.insert(model.version);
        Ok(())
    }

    /// Records a version whose file was already written outside the store
    /// (the aggregation worker writes model files off the serialized
    /// region; this commits the metadata).
    pub fn commit_written(&mut self, version: ModelVersion) {
        self.versions.insert(version);
    }

    /// Loads one version.
    pub fn get(&self, version: ModelVersion) -> Result<StoredModel, CoordError> {
        if !self.versions.contains(&version) {
            return Err(CoordError::UnknownVersion);
        }
        let path = model_path(&self.dir, version);
        let data = fs::read(&path)
            .map_err(|e| CoordError::Internal(format!("model read failed: {e}")))?;
        serde_json::from_slice(&data)
            .map_err(|e| CoordError::Internal(format!("model file corrupted: {e}")))
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn model_path(dir: &Path, version: ModelVersion) -> PathBuf {
    dir.join(format!("{version}.json"))
}

/// Serializes and atomically writes one model file (temp then rename).
///
/// Free function so the aggregation worker can persist a new version
/// without holding the coordinator state.
pub fn write_model_file(dir: &Path, model: &StoredModel) -> io::Result<()> {
    let final_path = model_path(dir, model.version);
    let tmp_path = dir.join(format!("{}.json.tmp", model.version));

    let data = serde_json::to_vec_pretty(model)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}
