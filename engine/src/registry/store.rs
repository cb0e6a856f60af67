//! Work unit registry
//!
//! Durable state machine over work units: one JSON record per unit, named
//! `{id}-{status}-{slug}.json`. A status change is realized as a rename, so
//! status is recoverable from a directory listing without opening records,
//! and the rename doubles as the atomic gate for claiming: of N workers
//! racing to claim a unit, exactly one rename succeeds.
//!
//! Records are written via temp file + rename, so readers never observe a
//! half-written record. The file name is the source of truth for status; a
//! record body that disagrees (crash between rename and rewrite) is
//! reconciled on load.

use std::path::{Path, PathBuf};

use sdk::errors::EngineError;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::unit::{
    parse_file_name, Finding, Payload, Priority, UnitKind, UnitStatus, WorkUnit,
};

/// Filter for listing work units
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub status: Option<UnitStatus>,
    pub kind: Option<UnitKind>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
}

impl UnitFilter {
    /// Filter on status only
    pub fn status(status: UnitStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// File-backed registry of work units
pub struct WorkUnitRegistry {
    dir: PathBuf,
    /// Serializes id allocation; claims need no lock, the rename is the gate
    create_lock: Mutex<()>,
}

impl WorkUnitRegistry {
    /// Open (or create) a registry at `dir`
    pub async fn open(dir: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            create_lock: Mutex::new(()),
        })
    }

    /// Create a new pending unit, allocating the next free id
    pub async fn create(
        &self,
        title: impl Into<String>,
        kind: UnitKind,
        priority: Priority,
        payload: Payload,
        tags: Vec<String>,
    ) -> Result<WorkUnit, EngineError> {
        let _guard = self.create_lock.lock().await;
        let id = self.next_id().await?;
        let unit = WorkUnit::new(id, title, kind, priority, payload, tags);
        self.write_record(&self.dir.join(unit.file_name()), &unit)
            .await?;
        debug!(id = %unit.id, title = %unit.title, "unit created");
        Ok(unit)
    }

    /// Create a pending unit from a review finding
    pub async fn create_from_finding(&self, finding: Finding) -> Result<WorkUnit, EngineError> {
        let _guard = self.create_lock.lock().await;
        let id = self.next_id().await?;
        let unit = WorkUnit::from_finding(id, finding);
        self.write_record(&self.dir.join(unit.file_name()), &unit)
            .await?;
        Ok(unit)
    }

    /// Load a unit by id
    pub async fn get(&self, id: &str) -> Result<WorkUnit, EngineError> {
        let (path, status, _) = self
            .find_record(id)
            .await?
            .ok_or_else(|| EngineError::UnitNotFound(id.to_string()))?;
        self.load_record(&path, status).await
    }

    /// List units matching a filter, in id order
    ///
    /// Reflects committed state only: records are swapped in atomically, and
    /// a file that disappears mid-listing (a concurrent rename) is skipped.
    pub async fn list(&self, filter: &UnitFilter) -> Result<Vec<WorkUnit>, EngineError> {
        let mut units = Vec::new();

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::Storage(format!("cannot list {}: {e}", self.dir.display())))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((_, status, _)) = parse_file_name(name) else {
                continue;
            };

            // Status is in the name; filter before opening the record.
            if let Some(want) = filter.status {
                if status != want {
                    continue;
                }
            }

            let unit = match self.load_record(&entry.path(), status).await {
                Ok(unit) => unit,
                Err(EngineError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable unit record");
                    continue;
                }
            };

            if let Some(kind) = filter.kind {
                if unit.kind != kind {
                    continue;
                }
            }
            if let Some(priority) = filter.priority {
                if unit.priority != priority {
                    continue;
                }
            }
            if let Some(tag) = &filter.tag {
                if !unit.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                    continue;
                }
            }

            units.push(unit);
        }

        units.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(units)
    }

    /// Promote a pending unit to ready
    pub async fn approve(&self, id: &str, note: &str) -> Result<WorkUnit, EngineError> {
        self.transition(id, UnitStatus::Ready, note).await
    }

    /// Atomically claim a ready unit for a worker
    ///
    /// This is the registry's single concurrency-critical primitive. The
    /// rename from the `-ready-` name to the `-in-progress-` name is the
    /// gate: under N concurrent claims exactly one rename succeeds, and the
    /// other N-1 observe the source file gone and get `ClaimConflict`.
    pub async fn claim(&self, id: &str, worker: &str) -> Result<WorkUnit, EngineError> {
        // A record that cannot be found mid-claim usually means a concurrent
        // rename; callers claim ids they just listed, so report a conflict.
        let (path, status, slug) = self
            .find_record(id)
            .await?
            .ok_or_else(|| EngineError::ClaimConflict(id.to_string()))?;

        if status != UnitStatus::Ready {
            return Err(EngineError::ClaimConflict(id.to_string()));
        }

        let claimed_name = format!("{}-{}-{}.json", id, UnitStatus::InProgress.as_str(), slug);
        let claimed_path = self.dir.join(claimed_name);

        match fs::rename(&path, &claimed_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::ClaimConflict(id.to_string()));
            }
            Err(e) => return Err(EngineError::Storage(format!("claim rename failed: {e}"))),
        }

        // The rename made us the exclusive owner; record the claim.
        let mut unit = self.load_record(&claimed_path, UnitStatus::Ready).await?;
        unit.status = UnitStatus::Ready; // history entry reads Ready -> InProgress
        unit.record_transition(UnitStatus::InProgress, format!("claimed by {worker}"));
        unit.claimed_by = Some(worker.to_string());
        self.write_record(&claimed_path, &unit).await?;

        debug!(id = %unit.id, worker, "unit claimed");
        Ok(unit)
    }

    /// Apply a validated status transition
    ///
    /// Repeating a transition into the status the unit already has is a
    /// no-op (no duplicate history entry), which makes retries after a
    /// partial failure safe. Any other transition out of a terminal state
    /// fails with `TerminalState`.
    pub async fn transition(
        &self,
        id: &str,
        to: UnitStatus,
        note: &str,
    ) -> Result<WorkUnit, EngineError> {
        let (path, current, slug) = self
            .find_record(id)
            .await?
            .ok_or_else(|| EngineError::UnitNotFound(id.to_string()))?;

        if current == to {
            return self.load_record(&path, current).await;
        }

        if current.is_terminal() {
            return Err(EngineError::TerminalState {
                id: id.to_string(),
                status: current.as_str().to_string(),
            });
        }

        if !current.can_transition(to) {
            return Err(EngineError::Validation(format!(
                "invalid transition {current} -> {to} for unit {id}"
            )));
        }

        let new_path = self
            .dir
            .join(format!("{}-{}-{}.json", id, to.as_str(), slug));

        match fs::rename(&path, &new_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Lost a race with a concurrent transition.
                return Err(EngineError::ClaimConflict(id.to_string()));
            }
            Err(e) => return Err(EngineError::Storage(format!("transition rename failed: {e}"))),
        }

        let mut unit = self.load_record(&new_path, current).await?;
        unit.status = current;
        unit.record_transition(to, note);
        if to != UnitStatus::InProgress {
            unit.claimed_by = None;
        }
        self.write_record(&new_path, &unit).await?;

        debug!(id = %unit.id, from = %current, to = %to, "unit transitioned");
        Ok(unit)
    }

    /// Next free numeric id, zero-padded to three digits
    async fn next_id(&self) -> Result<String, EngineError> {
        let mut max_id = 0u64;

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::Storage(format!("cannot list {}: {e}", self.dir.display())))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if let Some((id, _, _)) = parse_file_name(name) {
                    if let Ok(n) = id.parse::<u64>() {
                        max_id = max_id.max(n);
                    }
                }
            }
        }

        Ok(format!("{:03}", max_id + 1))
    }

    /// Locate the record file for an id, whatever its status
    async fn find_record(
        &self,
        id: &str,
    ) -> Result<Option<(PathBuf, UnitStatus, String)>, EngineError> {
        let wanted: u64 = id
            .parse()
            .map_err(|_| EngineError::Validation(format!("unit id must be numeric: {id}")))?;

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::Storage(format!("cannot list {}: {e}", self.dir.display())))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if let Some((found, status, slug)) = parse_file_name(name) {
                    if found.parse::<u64>() == Ok(wanted) {
                        return Ok(Some((entry.path(), status, slug)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Load a record, reconciling the body's status with the file name
    async fn load_record(&self, path: &Path, status: UnitStatus) -> Result<WorkUnit, EngineError> {
        let raw = fs::read_to_string(path).await.map_err(EngineError::Io)?;
        let mut unit: WorkUnit = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Storage(format!("corrupt record {}: {e}", path.display())))?;
        if unit.status != status {
            debug!(id = %unit.id, "record body lags file name; reconciling status");
            unit.status = status;
        }
        Ok(unit)
    }

    /// Write a record atomically (temp file + rename)
    async fn write_record(&self, path: &Path, unit: &WorkUnit) -> Result<(), EngineError> {
        let body = serde_json::to_vec_pretty(unit)
            .map_err(|e| EngineError::Storage(format!("serialize unit: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &body)
            .await
            .map_err(|e| EngineError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| EngineError::Storage(format!("commit {}: {e}", path.display())))?;
        Ok(())
    }
}
