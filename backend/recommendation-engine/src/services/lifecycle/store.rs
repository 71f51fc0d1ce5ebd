use super::snapshot::ModelSnapshot;
use crate::error::Result;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ACTIVE_FILE: &str = "model_snapshot.json";
const BACKUP_FILE: &str = "model_snapshot.backup.json";
const TEMP_FILE: &str = "model_snapshot.json.tmp";

/// Result of reading a snapshot file
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Box<ModelSnapshot>),
    Missing,
    /// Unreadable, undecodable or structurally incomplete
    Corrupt(String),
}

/// One active snapshot file plus a single rotating backup.
///
/// All methods do blocking file I/O; call them from the blocking pool.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    /// Write `snapshot` as the active file. The previous active file becomes
    /// the backup, replacing the old backup.
    pub fn persist(&self, snapshot: &ModelSnapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let temp = self.dir.join(TEMP_FILE);
        {
            let file = File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let active = self.active_path();
        if active.exists() {
            fs::rename(&active, self.backup_path())?;
            debug!(path = %self.backup_path().display(), "Previous snapshot rotated to backup");
        }
        fs::rename(&temp, &active)?;

        info!(
            version = snapshot.version,
            path = %active.display(),
            "Snapshot persisted"
        );
        Ok(active)
    }

    /// Read and validate a snapshot. Never fails; problems are reported in
    /// the outcome so the caller can decide to retrain.
    pub fn load(&self, path: &Path) -> LoadOutcome {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(e) => return LoadOutcome::Corrupt(format!("unreadable: {}", e)),
        };

        let snapshot: ModelSnapshot = match serde_json::from_reader(BufReader::new(file)) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot failed to decode");
                return LoadOutcome::Corrupt(format!("undecodable: {}", e));
            }
        };

        if let Err(reason) = snapshot.validate() {
            warn!(path = %path.display(), reason = %reason, "Snapshot failed validation");
            return LoadOutcome::Corrupt(reason);
        }

        LoadOutcome::Loaded(Box::new(snapshot))
    }

    pub fn load_active(&self) -> LoadOutcome {
        self.load(&self.active_path())
    }

    pub fn load_backup(&self) -> LoadOutcome {
        self.load(&self.backup_path())
    }
}
