use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not open {}: {}", .target.display(), .attempts.join("; "))]
pub struct OpenError {
    pub target: PathBuf,
    pub attempts: Vec<String>,
}

/// Hands a path to whatever the desktop uses to show it.
pub trait Launcher: Send + Sync {
    fn open_file(&self, target: &Path) -> Result<(), OpenError>;

    fn open_folder(&self, target: &Path) -> Result<(), OpenError> {
        self.open_file(target)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn open_file(&self, target: &Path) -> Result<(), OpenError> {
        let target_text = target.to_string_lossy().to_string();
        let candidates: Vec<(&str, Vec<String>)> = if cfg!(target_os = "windows") {
            vec![(
                "cmd",
                vec![
                    "/C".to_string(),
                    "start".to_string(),
                    String::new(),
                    target_text,
                ],
            )]
        } else if cfg!(target_os = "macos") {
            vec![("open", vec![target_text])]
        } else {
            desktop_candidates(target_text)
        };
        run_candidates(target, candidates)
    }

    fn open_folder(&self, target: &Path) -> Result<(), OpenError> {
        if cfg!(target_os = "windows") {
            let arg = target.to_string_lossy().replace('/', "\\");
            // explorer exits with 1 even when the window opened.
            return match Command::new("explorer").arg(arg).spawn() {
                Ok(_) => Ok(()),
                Err(err) => Err(OpenError {
                    target: target.to_path_buf(),
                    attempts: vec![format!("explorer failed: {err}")],
                }),
            };
        }
        self.open_file(target)
    }
}

fn desktop_candidates(target: String) -> Vec<(&'static str, Vec<String>)> {
    vec![
        ("xdg-open", vec![target.clone()]),
        ("gio", vec!["open".to_string(), target.clone()]),
        ("kde-open5", vec![target.clone()]),
        ("kioclient5", vec!["exec".to_string(), target]),
    ]
}

fn run_candidates(target: &Path, candidates: Vec<(&str, Vec<String>)>) -> Result<(), OpenError> {
    let mut attempts = Vec::new();
    for (command, args) in candidates {
        match Command::new(command)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => attempts.push(format!("{command} exited {status}")),
            Err(err) => attempts.push(format!("{command} failed: {err}")),
        }
    }
    Err(OpenError {
        target: target.to_path_buf(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_commands_are_collected() {
        let target = Path::new("/tmp/nothing-here");
        let err = run_candidates(
            target,
            vec![
                ("menace-modman-no-such-opener", vec!["x".to_string()]),
                ("menace-modman-no-such-opener-2", Vec::new()),
            ],
        )
        .unwrap_err();

        assert_eq!(err.attempts.len(), 2);
        assert!(err.attempts[0].starts_with("menace-modman-no-such-opener failed"));
        assert!(err.to_string().starts_with("could not open /tmp/nothing-here"));
    }

    #[test]
    fn desktop_candidates_try_xdg_open_first() {
        let candidates = desktop_candidates("/games/Menace".to_string());
        assert_eq!(candidates[0].0, "xdg-open");
        assert_eq!(candidates[3].1, vec!["exec".to_string(), "/games/Menace".to_string()]);
    }
}
