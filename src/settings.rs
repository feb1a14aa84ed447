use crate::{
    config::AppConfig,
    game::{self, GamePaths, UserPaths},
    installer::Installer,
    log::AppLog,
    opener::{Launcher, SystemLauncher},
    pathcheck::{normalize_install_path, validate_install_path, PathStatus},
    redeploy::{run_redeploy, RedeployError, RedeployReport},
};
use anyhow::Result;
use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, TryRecvError},
        Arc,
    },
    thread,
};

#[derive(Debug)]
pub enum RedeployMessage {
    Progress(String),
    Completed(RedeployReport),
    Failed(RedeployError),
}

/// Files and folders the open actions can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    LoaderLog,
    LoaderLogFolder,
    PlayerLog,
    PlayerLogFolder,
    Saves,
}

impl OpenTarget {
    pub fn label(self) -> &'static str {
        match self {
            OpenTarget::LoaderLog => "MelonLoader log",
            OpenTarget::LoaderLogFolder => "MelonLoader folder",
            OpenTarget::PlayerLog => "Player log",
            OpenTarget::PlayerLogFolder => "Player log folder",
            OpenTarget::Saves => "Saves folder",
        }
    }

    fn is_folder(self) -> bool {
        !matches!(self, OpenTarget::LoaderLog | OpenTarget::PlayerLog)
    }

    /// Located through the install path rather than the Unity user folder.
    fn in_game_folder(self) -> bool {
        matches!(self, OpenTarget::LoaderLog | OpenTarget::LoaderLogFolder)
    }
}

/// State and actions behind the settings screen: the game install path,
/// the loader/game log locations and the clean + redeploy action.
pub struct SettingsPanel {
    config: AppConfig,
    install_path: String,
    path_status: PathStatus,
    paths: Option<GamePaths>,
    user: UserPaths,
    status: String,
    busy: bool,
    last_redeploy_ok: Option<bool>,
    log: AppLog,
    launcher: Box<dyn Launcher>,
    redeploy_rx: Option<Receiver<RedeployMessage>>,
}

impl SettingsPanel {
    pub fn initialize() -> Result<Self> {
        let config = AppConfig::load_or_create()?;
        Ok(Self::new(config, Box::new(SystemLauncher)))
    }

    pub fn new(config: AppConfig, launcher: Box<dyn Launcher>) -> Self {
        let log = AppLog::new(config.log_path());
        let user = UserPaths::resolve(&config.overrides());
        let install_path = normalize_install_path(&config.install_path);
        let mut panel = Self {
            config,
            install_path,
            path_status: PathStatus::Empty,
            paths: None,
            user,
            status: String::new(),
            busy: false,
            last_redeploy_ok: None,
            log,
            launcher,
            redeploy_rx: None,
        };
        panel.refresh_path_status();
        panel.status = panel.path_status.message().to_string();
        panel
    }

    pub fn install_path(&self) -> &str {
        &self.install_path
    }

    /// Normalizes and validates `raw`, then stores it when it changed.
    pub fn set_install_path(&mut self, raw: &str) -> PathStatus {
        if self.busy {
            self.status = "Install path locked while redeploying".to_string();
            self.log.warn("Install path change ignored: redeploy running");
            return self.path_status;
        }

        let normalized = normalize_install_path(raw);
        self.install_path = normalized;
        let status = self.refresh_path_status();
        self.status = status.message().to_string();

        if self.config.install_path != self.install_path {
            self.config.install_path = self.install_path.clone();
            match self.config.save() {
                Ok(()) => self.log.info(format!(
                    "Install path set to \"{}\" ({})",
                    self.install_path,
                    status.as_str()
                )),
                Err(err) => {
                    self.status = format!("Could not save settings: {err:#}");
                    self.log.error(format!("Config save failed: {err:#}"));
                }
            }
        }
        status
    }

    /// Looks for a Steam install and adopts it.
    pub fn detect_install_path(&mut self) -> Option<PathStatus> {
        match game::detect_game_root() {
            Some(root) => Some(self.set_install_path(&root.to_string_lossy())),
            None => {
                self.status = "No Steam install of Menace found".to_string();
                self.log.warn("Install path auto-detect found nothing");
                None
            }
        }
    }

    /// Re-checks the current path against the filesystem.
    pub fn refresh_path_status(&mut self) -> PathStatus {
        self.path_status = validate_install_path(&self.install_path);
        self.paths = if self.path_status.is_valid() {
            GamePaths::from_root(Path::new(&self.install_path)).ok()
        } else {
            None
        };
        self.path_status
    }

    pub fn path_status(&self) -> PathStatus {
        self.path_status
    }

    pub fn path_status_text(&self) -> &'static str {
        self.path_status.message()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Outcome of the most recent finished redeploy, if any.
    pub fn last_redeploy_succeeded(&self) -> Option<bool> {
        self.last_redeploy_ok
    }

    pub fn can_redeploy(&self) -> bool {
        !self.busy && self.paths.is_some()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn log(&self) -> &AppLog {
        &self.log
    }

    pub fn game_paths(&self) -> Option<&GamePaths> {
        self.paths.as_ref()
    }

    pub fn loader_log_path(&self) -> Option<PathBuf> {
        self.paths.as_ref().map(|paths| paths.loader_log.clone())
    }

    pub fn loader_log_folder(&self) -> Option<PathBuf> {
        self.paths.as_ref().map(|paths| paths.loader_dir.clone())
    }

    pub fn player_log_path(&self) -> Option<PathBuf> {
        self.user.player_log.clone()
    }

    pub fn player_log_folder(&self) -> Option<PathBuf> {
        self.user.unity_dir.clone()
    }

    pub fn saves_path(&self) -> Option<PathBuf> {
        self.user.saves_dir.clone()
    }

    /// Starts clean + redeploy on a worker thread. Returns false when refused.
    pub fn start_redeploy(&mut self, installer: Arc<dyn Installer>) -> bool {
        if self.busy {
            self.status = "Redeploy already running".to_string();
            self.log.warn("Redeploy blocked: busy");
            return false;
        }
        let Some(paths) = self.paths.clone() else {
            self.status = format!("Redeploy blocked: {}", self.path_status.message());
            self.log.warn(format!(
                "Redeploy blocked: install path {}",
                self.path_status.as_str()
            ));
            return false;
        };

        let (tx, rx) = mpsc::channel();
        self.redeploy_rx = Some(rx);
        self.busy = true;
        self.status = "Redeploying...".to_string();
        self.log
            .info(format!("Redeploy started ({})", paths.game_root.display()));

        thread::spawn(move || {
            let progress_tx = tx.clone();
            let mut progress = |line: &str| {
                let _ = progress_tx.send(RedeployMessage::Progress(line.to_string()));
            };
            let message = match run_redeploy(installer.as_ref(), &paths, &mut progress) {
                Ok(report) => RedeployMessage::Completed(report),
                Err(err) => RedeployMessage::Failed(err),
            };
            let _ = tx.send(message);
        });
        true
    }

    /// Applies pending worker messages. Returns the status lines they produced.
    pub fn poll_redeploy(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let next = match self.redeploy_rx.as_ref() {
                Some(rx) => rx.try_recv(),
                None => break,
            };
            match next {
                Ok(message) => {
                    self.apply_redeploy_message(message);
                    lines.push(self.status.clone());
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.redeploy_worker_lost();
                    lines.push(self.status.clone());
                }
            }
        }
        lines
    }

    /// Blocks until the running redeploy finishes, reporting each status line.
    #[cfg(test)]
    pub fn wait_redeploy(&mut self, mut on_status: impl FnMut(&str)) {
        loop {
            let next = match self.redeploy_rx.as_ref() {
                Some(rx) => rx.recv(),
                None => break,
            };
            match next {
                Ok(message) => self.apply_redeploy_message(message),
                Err(_) => self.redeploy_worker_lost(),
            }
            on_status(&self.status);
        }
    }

    fn apply_redeploy_message(&mut self, message: RedeployMessage) {
        match message {
            RedeployMessage::Progress(line) => {
                self.log.info(line.clone());
                self.status = line;
            }
            RedeployMessage::Completed(report) => {
                self.status = report.summary();
                self.log.info(self.status.clone());
                self.finish_redeploy(true);
            }
            RedeployMessage::Failed(err) => {
                self.status = err.to_string();
                self.log.error(self.status.clone());
                self.finish_redeploy(false);
            }
        }
    }

    fn redeploy_worker_lost(&mut self) {
        self.status = "Redeploy stopped unexpectedly".to_string();
        self.log.error("Redeploy worker exited without a result");
        self.finish_redeploy(false);
    }

    fn finish_redeploy(&mut self, ok: bool) {
        self.busy = false;
        self.last_redeploy_ok = Some(ok);
        self.redeploy_rx = None;
        self.refresh_path_status();
    }

    pub fn open_loader_log(&mut self) {
        self.open(OpenTarget::LoaderLog);
    }

    pub fn open_loader_log_folder(&mut self) {
        self.open(OpenTarget::LoaderLogFolder);
    }

    pub fn open_player_log(&mut self) {
        self.open(OpenTarget::PlayerLog);
    }

    pub fn open_player_log_folder(&mut self) {
        self.open(OpenTarget::PlayerLogFolder);
    }

    pub fn open_saves_folder(&mut self) {
        self.open(OpenTarget::Saves);
    }

    pub fn target_path(&self, target: OpenTarget) -> Option<PathBuf> {
        match target {
            OpenTarget::LoaderLog => self.loader_log_path(),
            OpenTarget::LoaderLogFolder => self.loader_log_folder(),
            OpenTarget::PlayerLog => self.player_log_path(),
            OpenTarget::PlayerLogFolder => self.player_log_folder(),
            OpenTarget::Saves => self.saves_path(),
        }
    }

    /// Opens `target` with the system handler. A missing target only sets the
    /// status; launch failures only reach the log.
    pub fn open(&mut self, target: OpenTarget) {
        let label = target.label();
        let Some(path) = self.target_path(target) else {
            self.status = format!("{label} unavailable: {}", self.unavailable_hint(target));
            return;
        };
        let exists = if target.is_folder() {
            path.is_dir()
        } else {
            path.is_file()
        };
        if !exists {
            self.status = format!("{label} not found: {}", path.display());
            return;
        }

        let result = if target.is_folder() {
            self.launcher.open_folder(&path)
        } else {
            self.launcher.open_file(&path)
        };
        match result {
            Ok(()) => self.status = format!("Opened {label}"),
            Err(err) => self.log.warn(err.to_string()),
        }
    }

    fn unavailable_hint(&self, target: OpenTarget) -> &'static str {
        if target.in_game_folder() {
            self.path_status.message()
        } else {
            "game data folder not found; set user_data_dir in config.json"
        }
    }
}
