use chrono::Local;
use sha2::{Digest, Sha256};
use skillevo_core::{Error, Paths, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Immutable pre-change snapshots, keyed by (target, pre-change version).
/// Written once by the applier right before a mutation; read only by
/// rollback. Existing snapshots are never overwritten; a collision gets a
/// timestamp suffix.
pub struct BackupStore {
    paths: Paths,
}

impl BackupStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn write(&self, skill: &str, version: &str, content: &str) -> Result<PathBuf> {
        let dir = self.paths.backups_dir();
        std::fs::create_dir_all(&dir)?;

        let mut backup_file = dir.join(format!("{}-v{}.md", skill, version));
        if backup_file.exists() {
            let stamp = Local::now().format("%Y%m%d%H%M%S");
            backup_file = dir.join(format!("{}-v{}-{}.md", skill, version, stamp));
        }

        std::fs::write(&backup_file, content)?;
        info!(
            skill = %skill,
            version = %version,
            backup = %backup_file.display(),
            "Wrote pre-change backup"
        );
        Ok(backup_file)
    }

    pub fn read(&self, backup_path: &Path) -> Result<String> {
        if !backup_path.exists() {
            return Err(Error::NotFound(format!(
                "Backup {}",
                backup_path.display()
            )));
        }
        Ok(std::fs::read_to_string(backup_path)?)
    }
}

/// Content checksum used to pin a document's state across apply/revert.
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
