use crate::{
    game::GamePaths,
    installer::{Installer, Progress},
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeployStep {
    Clean,
    InstallLoader,
    InstallRequiredFiles,
}

impl RedeployStep {
    pub fn label(self) -> &'static str {
        match self {
            RedeployStep::Clean => "cleaning the mods folder",
            RedeployStep::InstallLoader => "installing MelonLoader",
            RedeployStep::InstallRequiredFiles => "installing required files",
        }
    }
}

impl fmt::Display for RedeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeployReport {
    pub removed: usize,
    pub installed: usize,
    pub loader_skipped: bool,
}

impl RedeployReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Redeploy complete: removed {}, installed {} file(s)",
            self.removed, self.installed
        );
        if self.loader_skipped {
            text.push_str(" (existing MelonLoader kept)");
        }
        text
    }
}

#[derive(Debug, Error)]
#[error("Redeploy failed while {step}: {message}")]
pub struct RedeployError {
    pub step: RedeployStep,
    pub message: String,
}

impl RedeployError {
    fn new(step: RedeployStep, err: anyhow::Error) -> Self {
        Self {
            step,
            message: format!("{err:#}"),
        }
    }
}

/// Cleans the game directory and reinstalls the loader and required files.
/// Stops at the first step that fails.
pub fn run_redeploy(
    installer: &dyn Installer,
    paths: &GamePaths,
    progress: &mut Progress<'_>,
) -> Result<RedeployReport, RedeployError> {
    let mut report = RedeployReport::default();

    progress("Cleaning mods folder...");
    report.removed = installer
        .clean(paths, progress)
        .map_err(|err| RedeployError::new(RedeployStep::Clean, err))?;

    if installer.loader_installed(paths) {
        progress("MelonLoader already installed");
        report.loader_skipped = true;
    } else {
        progress("Installing MelonLoader...");
        report.installed += installer
            .install_loader(paths, progress)
            .map_err(|err| RedeployError::new(RedeployStep::InstallLoader, err))?;
    }

    progress("Installing required files...");
    report.installed += installer
        .install_required_files(paths, progress)
        .map_err(|err| RedeployError::new(RedeployStep::InstallRequiredFiles, err))?;

    Ok(report)
}
