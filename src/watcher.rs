//! Input-folder polling.
//!
//! [`Watcher::scan`] lists the files under the input directory that match the
//! include globs. [`Watcher::pending`] diffs a scan against the in-memory
//! "last seen" modification times, and [`Watcher::mark_seen`] records a file
//! once it has been ingested successfully. A file whose ingestion failed is
//! never marked, so the next poll picks it up again.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FeederConfig;

/// A file observed during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the input directory, `/`-separated. Stored as the
    /// chunk payload's `source`.
    pub source: String,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

pub struct Watcher {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl Watcher {
    pub fn new(config: &FeederConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            root: config.input_dir.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            last_seen: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files under the input directory, sorted by source.
    ///
    /// Only a missing input directory is an error. Unreadable entries are
    /// logged and skipped so the rest of the folder is still listed.
    pub fn scan(&self) -> Result<Vec<FileEntry>> {
        if !self.root.is_dir() {
            bail!("Input directory does not exist: {}", self.root.display());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let source = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&source) || !self.include.is_match(&source) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "failed to stat, skipping");
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

            entries.push(FileEntry {
                path: path.to_path_buf(),
                source,
                modified_at: DateTime::<Utc>::from(modified),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(entries)
    }

    /// Entries that are new or modified since they were last marked seen.
    pub fn pending<'a>(&self, entries: &'a [FileEntry]) -> Vec<&'a FileEntry> {
        entries
            .iter()
            .filter(|e| match self.last_seen.get(&e.source) {
                Some(seen) => e.modified_at > *seen,
                None => true,
            })
            .collect()
    }

    pub fn mark_seen(&mut self, entry: &FileEntry) {
        self.last_seen.insert(entry.source.clone(), entry.modified_at);
    }

    pub fn seen_count(&self) -> usize {
        self.last_seen.len()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn feeder_config(root: &Path) -> FeederConfig {
        FeederConfig {
            input_dir: root.to_path_buf(),
            ..FeederConfig::default()
        }
    }

    #[test]
    fn scan_applies_globs_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("b.md"), "b").unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::write(tmp.path().join("sub/c.md"), "c").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8, 1]).unwrap();
        fs::write(tmp.path().join(".hidden.md"), "h").unwrap();
        fs::write(tmp.path().join(".git/config.md"), "g").unwrap();

        let watcher = Watcher::new(&feeder_config(tmp.path())).unwrap();
        let sources: Vec<String> = watcher.scan().unwrap().into_iter().map(|e| e.source).collect();
        assert_eq!(sources, vec!["a.txt", "b.md", "sub/c.md"]);
    }

    #[test]
    fn exclude_globs_from_config() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("keep.md"), "k").unwrap();
        fs::write(tmp.path().join("drafts/skip.md"), "s").unwrap();

        let config = FeederConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..feeder_config(tmp.path())
        };
        let watcher = Watcher::new(&config).unwrap();
        let entries = watcher.scan().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "keep.md");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let watcher = Watcher::new(&feeder_config(&tmp.path().join("nope"))).unwrap();
        assert!(watcher.scan().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_does_not_hide_other_files() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("good.md"), "good").unwrap();
        let locked = tmp.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("inner.md"), "inner").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores directory permissions; the walk then sees everything.
        let enforced = fs::read_dir(&locked).is_err();

        let watcher = Watcher::new(&feeder_config(tmp.path())).unwrap();
        let result = watcher.scan();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let sources: Vec<String> = result.unwrap().into_iter().map(|e| e.source).collect();
        assert!(sources.contains(&"good.md".to_string()));
        if enforced {
            assert_eq!(sources, vec!["good.md"]);
        }
    }

    #[test]
    fn pending_tracks_last_seen_mtime() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        fs::write(tmp.path().join("b.md"), "b").unwrap();

        let mut watcher = Watcher::new(&feeder_config(tmp.path())).unwrap();
        let entries = watcher.scan().unwrap();
        assert_eq!(watcher.pending(&entries).len(), 2);

        // Only a.md succeeded; b.md stays pending.
        watcher.mark_seen(&entries[0]);
        let pending = watcher.pending(&entries);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source, "b.md");

        let mut touched = entries[0].clone();
        touched.modified_at += chrono::Duration::seconds(5);
        assert_eq!(watcher.pending(std::slice::from_ref(&touched)).len(), 1);
        assert_eq!(watcher.seen_count(), 1);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let config = FeederConfig {
            include_globs: vec!["[".to_string()],
            ..FeederConfig::default()
        };
        assert!(Watcher::new(&config).is_err());
    }
}
