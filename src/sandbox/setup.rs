// SPDX-License-Identifier: MIT

//! One-time filesystem preparation for the sandbox.
//!
//! The game client runs inside the container at low integrity, so it can
//! neither read the game install nor write its own configuration unless the
//! directories say so.  This applies the following policy:
//!
//! | path                                  | access | outcome | integrity |
//! |---------------------------------------|--------|---------|-----------|
//! | game                                  | r-x    | allow   | unchanged |
//! | game_config                           | rwx    | allow   | low       |
//! | game_config/downloads                 | -w-    | deny    | medium    |
//! | launcher_data                         | rwx    | allow   | low       |
//! | launcher_data/{addon,runtime,patches} | -w-    | deny    | medium    |
//! | framework                             | r-x    | allow   | unchanged |
//!
//! Changing an ACL usually needs `WRITE_DAC` on the directory, so this is
//! best run elevated.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::acl::{FileAccess, IntegrityLevel};
use super::appcontainer::SandboxProfile;
use crate::error::BrokerError;

/// The directories the policy covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPaths {
    pub game: PathBuf,
    pub game_config: PathBuf,
    pub launcher_data: PathBuf,
    pub framework: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    pub path: PathBuf,
    pub access: FileAccess,
    pub outcome: Outcome,
    pub integrity: Option<IntegrityLevel>,
    /// Optional entries whose directory does not exist are skipped.
    pub required: bool,
}

impl PolicyEntry {
    fn new(path: PathBuf, access: FileAccess, outcome: Outcome, integrity: Option<IntegrityLevel>, required: bool) -> Self {
        PolicyEntry { path, access, outcome, integrity, required }
    }
}

/// What `apply` did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub applied: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// The policy entries for `paths`, in application order.
pub fn policy(paths: &SetupPaths) -> Vec<PolicyEntry> {
    use IntegrityLevel::{Low, Medium};
    use Outcome::{Allow, Deny};

    let mut entries = vec![
        PolicyEntry::new(paths.game.clone(), FileAccess::READ_EXECUTE, Allow, None, true),
        PolicyEntry::new(paths.game_config.clone(), FileAccess::READ_WRITE_EXECUTE, Allow, Some(Low), true),
        PolicyEntry::new(paths.game_config.join("downloads"), FileAccess::WRITE, Deny, Some(Medium), false),
        PolicyEntry::new(paths.launcher_data.clone(), FileAccess::READ_WRITE_EXECUTE, Allow, Some(Low), true),
    ];
    for sub in ["addon", "runtime", "patches"] {
        entries.push(PolicyEntry::new(paths.launcher_data.join(sub), FileAccess::WRITE, Deny, Some(Medium), false));
    }
    entries.push(PolicyEntry::new(paths.framework.clone(), FileAccess::READ_EXECUTE, Allow, None, true));
    entries
}

/// Apply the entries in order, stopping at the first failure.
pub fn apply(profile: &SandboxProfile, entries: &[PolicyEntry]) -> Result<SetupReport, BrokerError> {
    let mut report = SetupReport::default();
    for entry in entries {
        if !entry.required && !entry.path.is_dir() {
            warn!(path = %entry.path.display(), "directory not found; skipping");
            report.skipped.push(entry.path.clone());
            continue;
        }
        apply_entry(profile, entry)?;
        info!(path = %entry.path.display(), outcome = ?entry.outcome, integrity = ?entry.integrity, "applied sandbox policy");
        report.applied.push(entry.path.clone());
    }
    Ok(report)
}

fn apply_entry(profile: &SandboxProfile, entry: &PolicyEntry) -> Result<(), BrokerError> {
    let path: &Path = &entry.path;
    match entry.outcome {
        Outcome::Allow => profile.grant_file_access(path, entry.access)?,
        Outcome::Deny => profile.deny_file_access(path, entry.access)?,
    }
    if let Some(level) = entry.integrity {
        profile.set_integrity_level(path, level)?;
    }
    Ok(())
}
