//! Persistence of buffered predictions
//!
//! Each recording session gets its own folder under the predictions
//! root, named `Predictions`, `Predictions_1`, ... after the lowest
//! unused suffix. Every non-empty sampling interval becomes one JSON
//! file holding an array of frames, each an array of
//! `{identifier, confidence}` records.

use crate::error::VisionError;
use chrono::Utc;
use sharkspot_core::{DetectionBatch, PredictionRecord};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lowest-numbered session folder under `root` that does not exist yet
pub fn next_session_dir(root: &Path, prefix: &str) -> PathBuf {
    let base = root.join(prefix);
    if !base.exists() {
        return base;
    }

    let mut suffix = 1u32;
    loop {
        let candidate = root.join(format!("{}_{}", prefix, suffix));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

pub struct PredictionStore {
    root: PathBuf,
    prefix: String,
    session_dir: Option<PathBuf>,
    session_files: u64,
}

impl PredictionStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            session_dir: None,
            session_files: 0,
        }
    }

    /// Pick the folder for a new session. It is created on first flush.
    pub fn begin_session(&mut self) -> PathBuf {
        let dir = next_session_dir(&self.root, &self.prefix);
        debug!("Predictions for this session go to {:?}", dir);
        self.session_dir = Some(dir.clone());
        self.session_files = 0;
        dir
    }

    pub fn end_session(&mut self) {
        self.session_dir = None;
    }

    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }

    /// Files written for the current (or most recent) session
    pub fn session_files(&self) -> u64 {
        self.session_files
    }

    /// Write one interval's batches. An empty interval writes nothing.
    pub fn flush(&mut self, batches: &[DetectionBatch]) -> Result<Option<PathBuf>, VisionError> {
        if batches.is_empty() {
            return Ok(None);
        }

        let dir = self
            .session_dir
            .clone()
            .ok_or_else(|| VisionError::Predictions("no session has been started".to_string()))?;

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                VisionError::Predictions(format!("cannot create folder {:?}: {}", dir, e))
            })?;
            info!("Created predictions folder {:?}", dir);
        }

        let records: Vec<Vec<PredictionRecord>> = batches.iter().map(DetectionBatch::to_records).collect();
        let path = dir.join(format!(
            "{}_{}_{}.json",
            self.prefix.to_lowercase(),
            self.session_files,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));

        let file = File::create(&path)
            .map_err(|e| VisionError::Predictions(format!("cannot create {:?}: {}", path, e)))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        self.session_files += 1;
        debug!("Flushed {} frames of predictions to {:?}", records.len(), path);
        Ok(Some(path))
    }

    /// Read a persisted predictions file back
    pub fn load(path: &Path) -> Result<Vec<Vec<PredictionRecord>>, VisionError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Every persisted frame in a session folder, in file order
    pub fn load_session(dir: &Path) -> Result<Vec<Vec<PredictionRecord>>, VisionError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .collect();
        files.sort_by_key(|path| file_sequence(path));

        let mut frames = Vec::new();
        for file in files {
            frames.extend(Self::load(&file)?);
        }
        Ok(frames)
    }
}

/// Sequence number embedded in `<prefix>_<seq>_<stamp>.json`
fn file_sequence(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('_').nth(1))
        .and_then(|seq| seq.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharkspot_core::{DetectedObject, Rect};
    use std::time::Duration;

    fn batch(sequence: u64, labels: &[(&str, f32)]) -> DetectionBatch {
        DetectionBatch::new(
            sequence,
            Duration::ZERO,
            labels
                .iter()
                .map(|(label, confidence)| DetectedObject::new(*label, *confidence, Rect::unit()))
                .collect(),
            "shark",
        )
    }

    #[test]
    fn test_next_session_dir_picks_lowest_free_suffix() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(next_session_dir(root.path(), "Predictions"), root.path().join("Predictions"));

        fs::create_dir(root.path().join("Predictions")).unwrap();
        fs::create_dir(root.path().join("Predictions_1")).unwrap();
        assert_eq!(next_session_dir(root.path(), "Predictions"), root.path().join("Predictions_2"));
    }

    #[test]
    fn test_next_session_dir_fills_gaps() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("Predictions")).unwrap();
        fs::create_dir(root.path().join("Predictions_2")).unwrap();
        assert_eq!(next_session_dir(root.path(), "Predictions"), root.path().join("Predictions_1"));
    }

    #[test]
    fn test_folder_created_on_first_flush() {
        let root = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::new(root.path(), "Predictions");
        let dir = store.begin_session();
        assert!(!dir.exists());

        assert_eq!(store.flush(&[]).unwrap(), None);
        assert!(!dir.exists());

        let file = store.flush(&[batch(1, &[("shark", 0.9)])]).unwrap().unwrap();
        assert!(dir.is_dir());
        assert!(file.starts_with(&dir));
        let name = file.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("predictions_0_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_persisted_schema() {
        let root = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::new(root.path(), "Predictions");
        store.begin_session();

        let file = store
            .flush(&[batch(1, &[("shark", 0.5), ("fish", 0.25)]), batch(2, &[])])
            .unwrap()
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0][1]["identifier"], "fish");
        assert_eq!(json[0][1]["confidence"], 0.25);
        assert!(json[1].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_flush_without_session() {
        let root = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::new(root.path(), "Predictions");
        let result = store.flush(&[batch(1, &[("shark", 0.9)])]);
        assert!(matches!(result, Err(VisionError::Predictions(_))));
    }

    #[test]
    fn test_load_session_in_order() {
        let root = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::new(root.path(), "Predictions");
        let dir = store.begin_session();

        for i in 0..3 {
            store.flush(&[batch(i, &[("shark", 0.1 * (i + 1) as f32)])]).unwrap();
        }
        assert_eq!(store.session_files(), 3);

        let frames = PredictionStore::load_session(&dir).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames[0][0].confidence < frames[2][0].confidence);
    }
}
