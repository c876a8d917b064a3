use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::ddl::{Interpreter, parse_ddl};
use crate::engine::{EngineRegistry, in_transaction};
use crate::error::{DictError, Result};
use crate::migration::version::{MigrationVersion, order_migrations};
use crate::model::{self, VersionScheme};
use crate::service::{DictDataService, DictService};

/// One script file with its parsed version and checksum.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub target: String,
    pub file_name: String,
    pub version: MigrationVersion,
    pub script: String,
    pub checksum: String,
}

impl MigrationScript {
    pub fn new(target: &str, file_name: &str, script: String) -> Result<Self> {
        Ok(Self {
            target: target.to_string(),
            file_name: file_name.to_string(),
            version: MigrationVersion::from_file_name(file_name)?,
            checksum: checksum(&script),
            script,
        })
    }
}

pub fn checksum(script: &str) -> String {
    blake3::hash(script.as_bytes()).to_hex().to_string()
}

/// Reads the `.sql` scripts under `path`. Files at the root belong to
/// `default_target`, files in a sub-directory to the target named after it.
pub fn load_scripts(path: &Path, default_target: &str) -> Result<Vec<MigrationScript>> {
    if !path.is_dir() {
        warn!(path = %path.display(), "migration directory not found");
        return Ok(Vec::new());
    }
    let mut scripts = Vec::new();
    read_target(path, default_target, &mut scripts)?;
    for entry in read_dir(path)? {
        if entry.is_dir() {
            let target = entry.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            read_target(&entry, &target, &mut scripts)?;
        }
    }
    Ok(scripts)
}

fn read_dir(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let unreadable = |e: std::io::Error| DictError::MigrationFileRead {
        file: path.display().to_string(),
        reason: e.to_string(),
    };
    let mut entries = fs::read_dir(path)
        .map_err(unreadable)?
        .map(|entry| entry.map(|e| e.path()).map_err(unreadable))
        .collect::<Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn read_target(dir: &Path, target: &str, scripts: &mut Vec<MigrationScript>) -> Result<()> {
    for file in read_dir(dir)? {
        if !file.is_file() || file.extension().is_none_or(|e| e != "sql") {
            continue;
        }
        let file_name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let text = fs::read_to_string(&file).map_err(|e| DictError::MigrationFileRead {
            file: file.display().to_string(),
            reason: e.to_string(),
        })?;
        scripts.push(MigrationScript::new(target, &file_name, text)?);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    NoSchema,
    Migrating,
    UpToDate(MigrationVersion),
}

/// Applies scripts target by target. Each target has its own history and
/// lock; each script commits on its own.
pub struct MigrationEngine {
    registry: Arc<EngineRegistry>,
    interpreter: Interpreter,
    states: Mutex<HashMap<String, Arc<Mutex<MigrationState>>>>,
}

impl MigrationEngine {
    pub fn new(registry: Arc<EngineRegistry>, dicts: Arc<DictService>, data: Arc<DictDataService>) -> Self {
        Self {
            registry,
            interpreter: Interpreter::new(dicts, data),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn target_state(&self, target: &str) -> Result<Arc<Mutex<MigrationState>>> {
        let mut states = self.states.lock()?;
        Ok(states
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MigrationState::NoSchema)))
            .clone())
    }

    /// Last known state of `target`; `NoSchema` until it has been migrated
    /// by this engine.
    pub fn state(&self, target: &str) -> Result<MigrationState> {
        Ok(self.target_state(target)?.lock()?.clone())
    }

    /// Highest version recorded for `target`.
    pub fn installed_version(&self, target: &str) -> Result<Option<MigrationVersion>> {
        let rows = self.registry.version_backend()?.versions(target)?;
        let mut versions = rows.iter().map(|r| MigrationVersion::parse(&r.version)).collect::<Result<Vec<_>>>()?;
        versions.sort();
        Ok(versions.pop())
    }

    /// Applies the pending scripts of every target found in `scripts`.
    pub fn migrate(&self, scripts: Vec<MigrationScript>) -> Result<Vec<VersionScheme>> {
        let mut by_target: BTreeMap<String, Vec<MigrationScript>> = BTreeMap::new();
        for script in scripts {
            by_target.entry(script.target.clone()).or_default().push(script);
        }
        let mut applied = Vec::new();
        for (target, scripts) in by_target {
            applied.extend(self.apply_pending(&target, scripts)?);
        }
        Ok(applied)
    }

    /// Applies the scripts of `target` newer than its installed version, in
    /// version order. The batch is checked as a whole before anything runs:
    /// shared versions, changed checksums and scripts older than the
    /// installed version without a history row are errors. A failing script
    /// stops the batch; the scripts before it stay applied.
    pub fn apply_pending(&self, target: &str, mut scripts: Vec<MigrationScript>) -> Result<Vec<VersionScheme>> {
        let state = self.target_state(target)?;
        let mut state = state.lock()?;

        order_migrations(&mut scripts, |s| &s.version);
        check_distinct_versions(target, &scripts)?;

        let versions = self.registry.version_backend()?;
        let history = versions.versions(target)?;
        let mut installed = self.installed_version(target)?;
        let mut pending = Vec::new();
        for script in &scripts {
            let recorded = history
                .iter()
                .find(|row| MigrationVersion::parse(&row.version).is_ok_and(|v| v == script.version));
            match (recorded, &installed) {
                (Some(row), _) if row.checksum != script.checksum => {
                    return Err(DictError::MigrationChecksumMismatch {
                        script: script.file_name.clone(),
                        recorded: row.checksum.clone(),
                        actual: script.checksum.clone(),
                    });
                }
                (Some(_), _) => debug!(scope = %target, script = %script.file_name, "already applied"),
                (None, Some(current)) if script.version <= *current => {
                    return Err(DictError::MigrationOutOfOrder {
                        target: target.to_string(),
                        script: script.file_name.clone(),
                        version: script.version.to_string(),
                        installed: current.to_string(),
                    });
                }
                (None, _) => pending.push(script),
            }
        }

        let mut applied = Vec::with_capacity(pending.len());
        for script in pending {
            *state = MigrationState::Migrating;
            let row = VersionScheme {
                id: uuid::Uuid::new_v4().to_string(),
                target: target.to_string(),
                version: script.version.to_string(),
                script: script.file_name.clone(),
                checksum: script.checksum.clone(),
                installed: model::now(),
            };
            let result = in_transaction(&self.registry.transaction_backends(), || {
                let statements = parse_ddl(&script.script)?;
                self.interpreter.execute(&statements)?;
                versions.record_version(&row)
            });
            if let Err(e) = result {
                error!(scope = %target, script = %script.file_name, error = %e, "migration failed");
                *state = installed.clone().map_or(MigrationState::NoSchema, MigrationState::UpToDate);
                return Err(DictError::MigrationApplied { script: script.file_name.clone(), source: Box::new(e) });
            }
            info!(scope = %target, script = %script.file_name, version = %row.version, "migration applied");
            installed = Some(script.version.clone());
            applied.push(row);
        }
        *state = installed.map_or(MigrationState::NoSchema, MigrationState::UpToDate);
        Ok(applied)
    }
}

fn check_distinct_versions(target: &str, ordered: &[MigrationScript]) -> Result<()> {
    for pair in ordered.windows(2) {
        if pair[0].version == pair[1].version {
            let scripts = ordered
                .iter()
                .filter(|s| s.version == pair[0].version)
                .map(|s| s.file_name.clone())
                .collect();
            return Err(DictError::MigrationsHasSameVersion {
                target: target.to_string(),
                version: pair[0].version.to_string(),
                scripts,
            });
        }
    }
    Ok(())
}
