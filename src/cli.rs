use crate::{
    installer::{Installer, ModLoaderInstaller},
    settings::{OpenTarget, SettingsPanel},
};
use anyhow::{bail, Result};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, thread, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Summary,
    PathShow,
    PathSet(String),
    PathDetect,
    Paths,
    Redeploy { payload: Option<PathBuf> },
    Open(OpenTarget),
    History(usize),
    Help,
    Version,
}

fn parse_open_target(value: &str) -> Option<OpenTarget> {
    match value {
        "log" => Some(OpenTarget::LoaderLog),
        "log-folder" => Some(OpenTarget::LoaderLogFolder),
        "player-log" => Some(OpenTarget::PlayerLog),
        "player-log-folder" => Some(OpenTarget::PlayerLogFolder),
        "saves" => Some(OpenTarget::Saves),
        _ => None,
    }
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (format, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("menace-modman v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut panel = SettingsPanel::initialize()?;
            run_command(&mut panel, command, format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(OutputFormat, CliCommand)> {
    let (format, tokens) = parse_global_options(args)?;
    let head = tokens.first().map(|value| value.as_str());
    let command = match head {
        None | Some("status") => CliCommand::Summary,
        Some("--help" | "-h" | "help") => CliCommand::Help,
        Some("--version" | "-V" | "version") => CliCommand::Version,
        Some("path") => match tokens.get(1).map(|value| value.as_str()) {
            None | Some("show") => CliCommand::PathShow,
            Some("set") => {
                let rest = tokens.get(2..).unwrap_or(&[]);
                if rest.is_empty() {
                    bail!("path set requires a directory");
                }
                // Unquoted paths with spaces arrive split across arguments.
                CliCommand::PathSet(rest.join(" "))
            }
            Some("detect") => CliCommand::PathDetect,
            Some(other) => bail!("Unknown path command: {other} (use 'show', 'set', or 'detect')"),
        },
        Some("paths") => CliCommand::Paths,
        Some("history") => {
            let lines = match tokens.get(1) {
                Some(value) => value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("history expects a line count, got {value}"))?,
                None => 40,
            };
            CliCommand::History(lines)
        }
        Some("redeploy") => CliCommand::Redeploy {
            payload: parse_payload(tokens.get(1..).unwrap_or(&[]))?,
        },
        Some("open") => {
            let target = tokens
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("open requires a target"))?;
            match parse_open_target(target) {
                Some(target) => CliCommand::Open(target),
                None => bail!(
                    "Unknown open target: {target} (use 'log', 'log-folder', 'player-log', 'player-log-folder', or 'saves')"
                ),
            }
        }
        Some(other) => bail!("Unknown command: {other} (see --help)"),
    };
    Ok((format, command))
}

fn parse_global_options(args: &[String]) -> Result<(OutputFormat, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = if let Some(value) = arg.strip_prefix("--format=") {
            value
        } else if arg == "--format" {
            match iter.next() {
                Some(value) => value.as_str(),
                None => bail!("--format requires a value"),
            }
        } else {
            tokens.push(arg.to_string());
            continue;
        };
        format = match OutputFormat::parse(value) {
            Some(parsed) => parsed,
            None => bail!("Unknown format: {value} (use 'text' or 'json')"),
        };
    }
    Ok((format, tokens))
}

fn parse_payload(args: &[String]) -> Result<Option<PathBuf>> {
    let mut payload = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--payload=") {
            payload = Some(PathBuf::from(value));
        } else if arg == "--payload" {
            let Some(value) = iter.next() else {
                bail!("--payload requires a directory");
            };
            payload = Some(PathBuf::from(value));
        } else {
            bail!("Unknown redeploy option: {arg}");
        }
    }
    Ok(payload)
}

fn run_command(panel: &mut SettingsPanel, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::Summary => print_summary(panel, format),
        CliCommand::PathShow => print_path(panel, format),
        CliCommand::PathSet(raw) => {
            panel.set_install_path(&raw);
            print_path(panel, format)
        }
        CliCommand::PathDetect => {
            if panel.detect_install_path().is_none() {
                bail!("{}", panel.status());
            }
            print_path(panel, format)
        }
        CliCommand::Paths => print_summary(panel, format),
        CliCommand::Redeploy { payload } => redeploy(panel, payload, format),
        CliCommand::Open(target) => {
            panel.open(target);
            let output = ActionOutput {
                status: panel.status().to_string(),
                ok: panel.status().starts_with("Opened"),
                target: panel
                    .target_path(target)
                    .map(|path| path.display().to_string()),
            };
            print_action(&output, format)
        }
        CliCommand::History(lines) => {
            let text = panel.log().tail_text(lines)?;
            print_history(&text, format)
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn redeploy(
    panel: &mut SettingsPanel,
    payload: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let payload = payload.unwrap_or_else(|| panel.config().payload_dir());
    let installer: Arc<dyn Installer> =
        Arc::new(ModLoaderInstaller::new(payload, panel.config().data_dir.clone()));
    if !panel.start_redeploy(installer) {
        bail!("{}", panel.status());
    }

    // Progress lines are text only; JSON gets the final outcome.
    let text = format == OutputFormat::Text;
    if text {
        println!("{}", panel.status());
    }
    while panel.is_busy() {
        for line in panel.poll_redeploy() {
            if text {
                println!("{line}");
            }
        }
        thread::sleep(Duration::from_millis(50));
    }

    let ok = panel.last_redeploy_succeeded() == Some(true);
    if !text {
        let output = ActionOutput {
            status: panel.status().to_string(),
            ok,
            target: Some(panel.install_path().to_string()),
        };
        println!("{}", render_action(&output, format)?);
    }
    if !ok {
        bail!("{}", panel.status());
    }
    Ok(())
}

fn print_action(output: &ActionOutput, format: OutputFormat) -> Result<()> {
    println!("{}", render_action(output, format)?);
    Ok(())
}

fn render_action(output: &ActionOutput, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(output)?,
        OutputFormat::Text => output.status.clone(),
    })
}

fn print_history(text: &str, format: OutputFormat) -> Result<()> {
    let rendered = render_history(text, format)?;
    if !rendered.is_empty() {
        println!("{rendered}");
    }
    Ok(())
}

fn render_history(text: &str, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => {
            let output = HistoryOutput {
                lines: text.lines().collect(),
            };
            serde_json::to_string_pretty(&output)?
        }
        OutputFormat::Text => text.to_string(),
    })
}

#[derive(Serialize)]
struct PathOutput {
    install_path: String,
    status: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
struct ActionOutput {
    status: String,
    ok: bool,
    target: Option<String>,
}

#[derive(Serialize)]
struct HistoryOutput<'a> {
    lines: Vec<&'a str>,
}

#[derive(Serialize)]
struct SummaryOutput {
    install_path: String,
    status: &'static str,
    message: &'static str,
    loader_log: Option<String>,
    loader_log_folder: Option<String>,
    player_log: Option<String>,
    player_log_folder: Option<String>,
    saves: Option<String>,
    user_data: Option<String>,
    payload: String,
    app_log: String,
    can_redeploy: bool,
}

fn print_path(panel: &SettingsPanel, format: OutputFormat) -> Result<()> {
    let output = PathOutput {
        install_path: panel.install_path().to_string(),
        status: panel.path_status().as_str(),
        message: panel.path_status_text(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Install path: {}", display_or_unset(&output.install_path));
            println!("Status: {}", output.message);
        }
    }
    Ok(())
}

fn print_summary(panel: &SettingsPanel, format: OutputFormat) -> Result<()> {
    let show = |path: Option<PathBuf>| path.map(|path| path.display().to_string());
    let output = SummaryOutput {
        install_path: panel.install_path().to_string(),
        status: panel.path_status().as_str(),
        message: panel.path_status_text(),
        loader_log: show(panel.loader_log_path()),
        loader_log_folder: show(panel.loader_log_folder()),
        player_log: show(panel.player_log_path()),
        player_log_folder: show(panel.player_log_folder()),
        saves: show(panel.saves_path()),
        user_data: show(panel.game_paths().map(|paths| paths.user_data_dir.clone())),
        payload: panel.config().payload_dir().display().to_string(),
        app_log: panel.config().log_path().display().to_string(),
        can_redeploy: panel.can_redeploy(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            let unknown = "(unknown)".to_string();
            println!("Install path: {}", display_or_unset(&output.install_path));
            println!("Status: {}", output.message);
            println!(
                "MelonLoader log: {}",
                output.loader_log.as_ref().unwrap_or(&unknown)
            );
            println!(
                "Player log: {}",
                output.player_log.as_ref().unwrap_or(&unknown)
            );
            println!("Saves: {}", output.saves.as_ref().unwrap_or(&unknown));
            println!(
                "MelonLoader UserData: {}",
                output.user_data.as_ref().unwrap_or(&unknown)
            );
            println!("Payload: {}", output.payload);
            println!("App log: {}", output.app_log);
        }
    }
    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

fn print_help() {
    println!("menace-modman v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  menace-modman                      Show settings summary");
    println!("  menace-modman path [show]          Show install path and its status");
    println!("  menace-modman path set <dir>       Set the Menace install path");
    println!("  menace-modman path detect          Find the Steam install and use it");
    println!("  menace-modman paths                Show log, saves and payload paths");
    println!("  menace-modman redeploy             Clean Mods/ and reinstall MelonLoader + payload");
    println!("  menace-modman open <target>        Open log | log-folder | player-log |");
    println!("                                     player-log-folder | saves");
    println!("  menace-modman history [lines]      Show recent menace-modman activity");
    println!();
    println!("Options:");
    println!("  --format <json|text>               Output format");
    println!("  --payload <dir>                    Payload folder for redeploy");
    println!("  -h, --help                         Show help");
    println!("  -V, --version                      Show version");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_summary() {
        let (format, command) = parse_args(&[]).unwrap();
        assert_eq!(format, OutputFormat::Text);
        assert_eq!(command, CliCommand::Summary);
    }

    #[test]
    fn path_set_joins_split_arguments() {
        let (_, command) =
            parse_args(&args(&["path", "set", "/games/Menace", "Demo", "--format=json"])).unwrap();
        assert_eq!(command, CliCommand::PathSet("/games/Menace Demo".to_string()));
        assert!(parse_args(&args(&["path", "set"])).is_err());
    }

    #[test]
    fn redeploy_takes_payload_option() {
        let (format, command) =
            parse_args(&args(&["--format", "json", "redeploy", "--payload", "/tmp/p"])).unwrap();
        assert_eq!(format, OutputFormat::Json);
        assert_eq!(
            command,
            CliCommand::Redeploy {
                payload: Some(PathBuf::from("/tmp/p"))
            }
        );
        assert!(parse_args(&args(&["redeploy", "--force"])).is_err());
    }

    #[test]
    fn open_targets_are_checked() {
        let (_, command) = parse_args(&args(&["open", "player-log-folder"])).unwrap();
        assert_eq!(command, CliCommand::Open(OpenTarget::PlayerLogFolder));
        assert!(parse_args(&args(&["open"])).is_err());
        assert!(parse_args(&args(&["open", "desktop"])).is_err());
        assert!(parse_args(&args(&["--format", "yaml"])).is_err());
    }

    #[test]
    fn history_defaults_to_forty_lines() {
        assert_eq!(parse_args(&args(&["history"])).unwrap().1, CliCommand::History(40));
        assert_eq!(parse_args(&args(&["history", "5"])).unwrap().1, CliCommand::History(5));
        assert!(parse_args(&args(&["history", "lots"])).is_err());
    }

    #[test]
    fn action_output_follows_format() {
        let output = ActionOutput {
            status: "Saves folder not found: /tmp/x".to_string(),
            ok: false,
            target: Some("/tmp/x".to_string()),
        };
        assert_eq!(
            render_action(&output, OutputFormat::Text).unwrap(),
            "Saves folder not found: /tmp/x"
        );

        let json: serde_json::Value =
            serde_json::from_str(&render_action(&output, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["status"], "Saves folder not found: /tmp/x");
        assert_eq!(json["target"], "/tmp/x");
    }

    #[test]
    fn history_json_lists_lines() {
        let text = "2026-01-01 10:00:00 [INFO] one\n2026-01-01 10:00:01 [WARN] two";
        assert_eq!(render_history(text, OutputFormat::Text).unwrap(), text);

        let json: serde_json::Value =
            serde_json::from_str(&render_history(text, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["lines"].as_array().unwrap().len(), 2);
        assert_eq!(json["lines"][1], "2026-01-01 10:00:01 [WARN] two");

        let empty: serde_json::Value =
            serde_json::from_str(&render_history("", OutputFormat::Json).unwrap()).unwrap();
        assert!(empty["lines"].as_array().unwrap().is_empty());
    }
}
