use crate::game;
use std::{
    fmt,
    path::{self, Path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Empty,
    Missing,
    Invalid(InvalidReason),
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotADirectory,
    MissingGameFiles,
}

impl PathStatus {
    pub fn is_valid(self) -> bool {
        self == PathStatus::Valid
    }

    pub fn message(self) -> &'static str {
        match self {
            PathStatus::Empty => "Install path not set",
            PathStatus::Missing => "Install path does not exist",
            PathStatus::Invalid(InvalidReason::NotADirectory) => "Install path is not a directory",
            PathStatus::Invalid(InvalidReason::MissingGameFiles) => {
                "Not a Menace install: expected Menace_Data/ and the game executable"
            }
            PathStatus::Valid => "Install path OK",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PathStatus::Empty => "empty",
            PathStatus::Missing => "missing",
            PathStatus::Invalid(_) => "invalid",
            PathStatus::Valid => "valid",
        }
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Cleans up a user-entered install path.
///
/// Surrounding whitespace and matching quotes are dropped, a leading `~` is
/// expanded, runs of separators collapse to one and trailing separators are
/// removed (a bare root stays a root). Applying it twice yields the same string.
pub fn normalize_install_path(raw: &str) -> String {
    let mut value = raw;
    loop {
        let next = unquote(trim_trailing_separators(value.trim()));
        if next == value {
            break;
        }
        value = next;
    }

    let expanded = expand_home(value);
    let collapsed = collapse_separators(&expanded);
    trim_trailing_separators(&collapsed).to_string()
}

pub fn validate_install_path(path: &str) -> PathStatus {
    if path.is_empty() {
        return PathStatus::Empty;
    }

    let path = Path::new(path);
    if !path.exists() {
        return PathStatus::Missing;
    }
    if !path.is_dir() {
        return PathStatus::Invalid(InvalidReason::NotADirectory);
    }
    if !game::looks_like_game_root(path) {
        return PathStatus::Invalid(InvalidReason::MissingGameFiles);
    }
    PathStatus::Valid
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn expand_home(value: &str) -> String {
    let rest = if value == "~" {
        Some("")
    } else {
        value
            .strip_prefix('~')
            .filter(|rest| rest.starts_with(path::is_separator))
    };

    match (rest, game::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
        _ => value.to_string(),
    }
}

fn collapse_separators(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    // Keep the UNC prefix (`\\server\share`) intact.
    if cfg!(windows) && value.starts_with("\\\\") {
        out.push_str("\\\\");
        chars.next();
        chars.next();
    }

    let mut previous_separator = false;
    for ch in chars {
        let separator = path::is_separator(ch);
        if separator && previous_separator {
            continue;
        }
        previous_separator = separator;
        out.push(ch);
    }
    out
}

fn trim_trailing_separators(value: &str) -> &str {
    let root = root_len(value);
    let mut end = value.len();
    while end > root && value[..end].ends_with(path::is_separator) {
        end -= 1;
    }
    &value[..end]
}

fn root_len(value: &str) -> usize {
    let bytes = value.as_bytes();
    if cfg!(windows) && bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        if bytes.len() >= 3 && path::is_separator(bytes[2] as char) {
            return 3;
        }
        return 2;
    }
    if value.starts_with(path::is_separator) {
        return 1;
    }
    0
}
