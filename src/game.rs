use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Menace";
pub const DATA_DIR_NAME: &str = "Menace_Data";
pub const EXECUTABLES: [&str; 2] = ["Menace.exe", "Menace.x86_64"];
const STEAM_FOLDERS: [&str; 2] = ["Menace", "Menace Demo"];
const UNITY_COMPANY: &str = "Overhype Studios";

pub const LOADER_DIR_NAME: &str = "MelonLoader";
pub const LOADER_PROXY: &str = "version.dll";
pub const LOADER_LOG_NAME: &str = "Latest.log";
pub const PLAYER_LOG_NAME: &str = "Player.log";

#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub mods_dir: PathBuf,
    pub user_libs_dir: PathBuf,
    pub user_data_dir: PathBuf,
    pub loader_dir: PathBuf,
    pub loader_log: PathBuf,
}

impl GamePaths {
    pub fn from_root(game_root: &Path) -> Result<Self> {
        if !looks_like_game_root(game_root) {
            bail!(
                "invalid game root: expected {DATA_DIR_NAME}/ and a {GAME_NAME} executable in {}",
                game_root.display()
            );
        }

        let loader_dir = game_root.join(LOADER_DIR_NAME);
        Ok(GamePaths {
            game_root: game_root.to_path_buf(),
            mods_dir: game_root.join("Mods"),
            user_libs_dir: game_root.join("UserLibs"),
            user_data_dir: game_root.join("UserData"),
            loader_log: loader_dir.join(LOADER_LOG_NAME),
            loader_dir,
        })
    }
}

/// User-configured locations that win over auto-detection.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub unity_dir: Option<PathBuf>,
    pub saves_dir: Option<PathBuf>,
}

/// Per-user game locations; these live outside the install directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPaths {
    /// Unity per-user directory (`.../Overhype Studios/Menace`).
    pub unity_dir: Option<PathBuf>,
    pub player_log: Option<PathBuf>,
    pub saves_dir: Option<PathBuf>,
}

impl UserPaths {
    pub fn resolve(overrides: &PathOverrides) -> Self {
        let unity_dir = overrides.unity_dir.clone().or_else(detect_unity_dir);
        let player_log = unity_dir.as_ref().map(|dir| dir.join(PLAYER_LOG_NAME));
        let saves_dir = overrides
            .saves_dir
            .clone()
            .or_else(|| unity_dir.as_ref().map(|dir| dir.join("Saves")));
        UserPaths {
            unity_dir,
            player_log,
            saves_dir,
        }
    }
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join(DATA_DIR_NAME).is_dir() && EXECUTABLES.iter().any(|exe| path.join(exe).is_file())
}

pub fn detect_game_root() -> Option<PathBuf> {
    find_game_root_in(&steam_roots())
}

fn find_game_root_in(steam_roots: &[PathBuf]) -> Option<PathBuf> {
    let mut libraries = Vec::new();
    for base in steam_roots {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                libraries.extend(paths);
            }
        }
        libraries.push(base.clone());
    }

    for lib in libraries {
        for folder in STEAM_FOLDERS {
            let candidate = lib.join("steamapps/common").join(folder);
            if looks_like_game_root(&candidate) {
                return Some(candidate);
            }
        }
    }

    None
}

pub fn detect_unity_dir() -> Option<PathBuf> {
    let home = home_dir()?;
    find_unity_dir_in(&home, &steam_roots())
}

fn find_unity_dir_in(home: &Path, steam_roots: &[PathBuf]) -> Option<PathBuf> {
    let native = home
        .join(".config/unity3d")
        .join(UNITY_COMPANY)
        .join(GAME_NAME);
    if native.is_dir() {
        return Some(native);
    }

    #[cfg(windows)]
    {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            let local_low = PathBuf::from(profile)
                .join("AppData/LocalLow")
                .join(UNITY_COMPANY)
                .join(GAME_NAME);
            if local_low.is_dir() {
                return Some(local_low);
            }
        }
    }

    // The Proton app id differs between the demo and the full game, so every prefix is checked.
    for base in steam_roots {
        let Ok(prefixes) = fs::read_dir(base.join("steamapps/compatdata")) else {
            continue;
        };
        let mut prefixes: Vec<PathBuf> = prefixes
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        prefixes.sort();
        for prefix in prefixes {
            let candidate = prefix
                .join("pfx/drive_c/users/steamuser/AppData/LocalLow")
                .join(UNITY_COMPANY)
                .join(GAME_NAME);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
    }

    None
}

fn steam_roots() -> Vec<PathBuf> {
    let Some(home) = home_dir() else {
        return Vec::new();
    };
    vec![
        home.join(".local/share/Steam"),
        home.join(".steam/steam"),
        home.join(".steam/debian-installation"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
    ]
}

fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

pub fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

#[cfg(test)]
pub(crate) fn make_fake_game(root: &Path) {
    fs::create_dir_all(root.join(DATA_DIR_NAME)).unwrap();
    fs::write(root.join("Menace.exe"), b"MZ").unwrap();
}
