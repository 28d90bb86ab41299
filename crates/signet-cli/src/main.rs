use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{
    config::{ConfigCommands, handle_config_command},
    install::{InstallArgs, handle_install_command},
    reconcile::{ReconcileArgs, handle_reconcile_command},
};
use config::Overrides;

const DEFAULT_LOG_FILTER: &str = "signet_core=info,signet=info";

#[derive(Parser)]
#[command(name = "signet")]
#[command(version = signet_core::VERSION)]
#[command(about = "Keep code-signing certificates and provisioning profiles in a shared encrypted store", long_about = None)]
struct Cli {
    /// Configuration profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that override the config file profile.
#[derive(Args)]
struct SettingsArgs {
    /// Git URL of the secret store
    #[arg(long, env = "SIGNET_GIT_URL", global = true)]
    git_url: Option<String>,

    /// Branch holding this team's credentials
    #[arg(long, env = "SIGNET_GIT_BRANCH", global = true)]
    branch: Option<String>,

    /// Passphrase used to encrypt the store
    #[arg(long, env = "SIGNET_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Access token for HTTPS git remotes
    #[arg(long, env = "SIGNET_GIT_TOKEN", global = true, hide_env_values = true)]
    git_token: Option<String>,

    /// App Store Connect API key ID
    #[arg(long, env = "SIGNET_API_KEY_ID", global = true)]
    api_key_id: Option<String>,

    /// App Store Connect issuer ID
    #[arg(long, env = "SIGNET_API_ISSUER_ID", global = true)]
    api_issuer_id: Option<String>,

    /// Path to the App Store Connect .p8 key
    #[arg(long, env = "SIGNET_API_KEY_PATH", global = true)]
    api_key_path: Option<PathBuf>,

    /// Platform whose devices go into profiles (ios or macos)
    #[arg(long, env = "SIGNET_PLATFORM", global = true)]
    platform: Option<String>,

    /// Keychain to install into
    #[arg(long, env = "SIGNET_KEYCHAIN_NAME", global = true)]
    keychain: Option<String>,

    /// Keychain password
    #[arg(long, env = "SIGNET_KEYCHAIN_PASSWORD", global = true, hide_env_values = true)]
    keychain_password: Option<String>,

    /// Directory provisioning profiles are installed into
    #[arg(long, env = "SIGNET_PROFILES_DIR", global = true)]
    profiles_dir: Option<PathBuf>,

    /// Directory for ephemeral checkouts (system temp directory if unset)
    #[arg(long, env = "SIGNET_CHECKOUT_ROOT", global = true)]
    checkout_root: Option<PathBuf>,
}

impl From<SettingsArgs> for Overrides {
    fn from(args: SettingsArgs) -> Self {
        Overrides {
            git_url: args.git_url,
            branch: args.branch,
            password: args.password,
            git_token: args.git_token,
            api_key_id: args.api_key_id,
            api_issuer_id: args.api_issuer_id,
            api_key_path: args.api_key_path,
            platform: args.platform,
            keychain: args.keychain,
            keychain_password: args.keychain_password,
            profiles_dir: args.profiles_dir,
            checkout_root: args.checkout_root,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure valid certificates and profiles exist and are stored
    Reconcile(ReconcileArgs),

    /// Install stored certificates and profiles on this machine
    Install(InstallArgs),

    /// Inspect CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("signet_core=debug,signet=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (doesn't override existing env vars)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Config commands only read the file, handle separately
    if let Commands::Config(cmd) = cli.command {
        return handle_config_command(cmd);
    }

    let resolved = config::resolve_config(
        cli.profile.as_deref(),
        cli.settings.into(),
        config::load_config()?,
    )?;
    if let Some(profile) = &resolved.profile {
        tracing::debug!("Using config profile '{}'", profile);
    }

    match cli.command {
        Commands::Reconcile(args) => handle_reconcile_command(&resolved, args).await?,
        Commands::Install(args) => handle_install_command(&resolved, args).await?,
        Commands::Config(_) => unreachable!(), // Handled above
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_settings_after_subcommand() {
        temp_env::with_vars_unset(["SIGNET_GIT_URL", "SIGNET_GIT_BRANCH"], || {
            let cli = Cli::try_parse_from([
                "signet",
                "install",
                "--git-url",
                "https://git.example.com/certs.git",
                "--reinstall",
            ])
            .unwrap();
            let overrides: Overrides = cli.settings.into();
            assert_eq!(
                overrides.git_url.as_deref(),
                Some("https://git.example.com/certs.git")
            );
            assert!(overrides.branch.is_none());
            assert!(matches!(cli.command, Commands::Install(ref args) if args.reinstall));
        });
    }

    #[test]
    fn test_settings_fall_back_to_environment() {
        temp_env::with_var("SIGNET_GIT_BRANCH", Some("team-c"), || {
            let cli = Cli::try_parse_from(["signet", "config", "path"]).unwrap();
            assert_eq!(cli.settings.branch.as_deref(), Some("team-c"));
        });
    }
}
