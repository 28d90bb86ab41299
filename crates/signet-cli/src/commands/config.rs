//! `signet config` commands for inspecting CLI configuration.

use anyhow::Result;
use clap::Subcommand;

use crate::config::{Profile, config_path, load_config};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every profile in the config file
    Show {
        /// Show actual secret values (by default they are masked)
        #[arg(long)]
        show_secrets: bool,
    },

    /// Show config file path
    Path,
}

pub fn handle_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show { show_secrets } => show_config(show_secrets),
        ConfigCommands::Path => show_path(),
    }
}

fn show_config(show_secrets: bool) -> Result<()> {
    let path = config_path()?;

    let Some(config) = load_config()? else {
        println!("No config file found at {}", path.display());
        println!();
        println!("Settings are read from flags and SIGNET_* environment variables.");
        return Ok(());
    };

    println!("Config file: {}", path.display());
    println!("Default profile: {}", config.default_profile);
    println!();

    let mut names: Vec<_> = config.profiles.keys().collect();
    names.sort();
    for name in names {
        let marker = if name == &config.default_profile { " *" } else { "" };
        println!("[{}]{}", name, marker);
        for (key, value) in profile_lines(&config.profiles[name], show_secrets) {
            println!("  {:<14} {}", format!("{}:", key), value);
        }
        println!();
    }

    Ok(())
}

fn profile_lines(profile: &Profile, show_secrets: bool) -> Vec<(&'static str, String)> {
    let secret = |value: &Option<String>| {
        value.as_deref().map(|v| {
            if show_secrets {
                v.to_string()
            } else {
                mask_secret(v)
            }
        })
    };
    let path = |value: &Option<std::path::PathBuf>| value.as_ref().map(|p| p.display().to_string());

    [
        ("git_url", profile.git_url.clone()),
        ("branch", profile.branch.clone()),
        ("password", secret(&profile.password)),
        ("git_token", secret(&profile.git_token)),
        ("api_key_id", profile.api_key_id.clone()),
        ("api_issuer_id", profile.api_issuer_id.clone()),
        ("api_key_path", path(&profile.api_key_path)),
        ("platform", profile.platform.clone()),
        ("keychain", profile.keychain.clone()),
        ("profiles_dir", path(&profile.profiles_dir)),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key, v)))
    .collect()
}

fn show_path() -> Result<()> {
    println!("{}", config_path()?.display());

    if let Ok(env_path) = std::env::var("SIGNET_CONFIG") {
        println!();
        println!("Note: SIGNET_CONFIG is set to: {}", env_path);
    }

    Ok(())
}

/// Mask a secret for display (show first 4 and last 4 characters).
/// Requires at least 12 characters to show partial content.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}
