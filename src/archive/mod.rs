//! Per-subject JSON archive of the full, never-truncated trial data.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::models::ResultSet;

pub struct DataArchive {
    dir: PathBuf,
}

impl DataArchive {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<dir>/<subject>_<YYYYmmdd_HHMMSS>.json`, adding a counter on collision.
    pub fn save(&self, subject_id: &str, results: &ResultSet, at: DateTime<Utc>) -> Result<PathBuf> {
        let subject = sanitize(subject_id);
        if subject.is_empty() {
            bail!("subject_id cannot be empty");
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create archive directory {}", self.dir.display()))?;

        let stem = format!("{}_{}", subject, at.format("%Y%m%d_%H%M%S"));
        let mut path = self.dir.join(format!("{stem}.json"));
        let mut counter = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{counter}.json"));
            counter += 1;
        }

        let serialized = serde_json::to_string_pretty(results)?;
        fs::write(&path, serialized)
            .with_context(|| format!("failed to write archive {}", path.display()))?;

        info!("Archived {} trials to {}", results.len(), path.display());
        Ok(path)
    }

    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

fn sanitize(subject_id: &str) -> String {
    subject_id
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrialRecord;
    use chrono::TimeZone;

    #[test]
    fn saves_pretty_json_named_after_subject() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DataArchive::new(dir.path().join("archive"));
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let results = ResultSet::new(vec![TrialRecord::new("gaze_perception").with_rt(321.0)]);

        let first = archive.save("sub/01", &results, at).unwrap();
        assert_eq!(first.file_name().unwrap(), "sub01_20260304_050607.json");

        let second = archive.save("sub01", &results, at).unwrap();
        assert_eq!(second.file_name().unwrap(), "sub01_20260304_050607_1.json");

        let stored: ResultSet = serde_json::from_str(&fs::read_to_string(&first).unwrap()).unwrap();
        assert_eq!(stored, results);
        assert_eq!(archive.list().unwrap().len(), 2);
    }

    #[test]
    fn empty_subject_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DataArchive::new(dir.path().to_path_buf());
        assert!(archive.save("  ", &ResultSet::default(), Utc::now()).is_err());
    }
}
