use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{info, warn};
use upkeep_core::{
    load_upkeep_config, parse_accounts, CredentialSet, FileRotation, NoopNotifier, NoopRotation,
    NotificationSink, ReportBuilder, RotationSink, TelegramNotifier, UpkeepConfig, WorkflowRunner,
};

/// Secrets arrive exclusively through the environment; they are read
/// here, once, and passed down by value. No core component touches the
/// environment.
pub const ENV_ACCOUNTS: &str = "UPKEEP_ACCOUNTS";
pub const ENV_COOKIES: &str = "UPKEEP_COOKIES";
pub const ENV_BOT_TOKEN: &str = "UPKEEP_TG_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "UPKEEP_TG_CHAT_ID";
pub const ENV_COMMAND: &str = "UPKEEP_COMMAND";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] upkeep_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing secret: set {0}")]
    MissingSecret(&'static str),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Browser-driven account upkeep runner", long_about = None)]
pub struct Cli {
    /// Path to the upkeep.toml configuration
    #[arg(long, default_value = "configs/upkeep.toml")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Daily forum check-in for every configured account
    Checkin,
    /// Iterative service renewal against the billing panel
    Renew,
    /// Restart every server the game panel lists
    Restart(RestartArgs),
}

#[derive(Args, Debug)]
pub struct RestartArgs {
    /// Skip the web-terminal command even when one is configured
    #[arg(long)]
    pub no_terminal: bool,
}

/// Runs the selected workflow end to end and returns the process exit
/// code: 0 all targets succeeded, 2 partial, 1 none.
pub async fn run(cli: Cli) -> Result<i32> {
    let config = load_upkeep_config(&cli.config)?;
    let notifier = build_notifier(&config);
    let rotation = build_rotation(&config);
    let mut report = ReportBuilder::new(config.notify.report_title.clone());
    info!(run_id = %report.run_id(), "starting upkeep run");
    let runner = WorkflowRunner::new(config);

    match cli.command {
        Commands::Checkin => {
            let blob = require_env(ENV_ACCOUNTS)?;
            let accounts = parse_accounts(&blob);
            if accounts.is_empty() {
                return Err(AppError::MissingSecret(ENV_ACCOUNTS));
            }
            info!(count = accounts.len(), "accounts loaded");
            runner.run_checkins(&accounts, &mut report).await;
        }
        Commands::Renew => {
            let credentials = load_credentials()?;
            runner
                .run_renewal(&credentials, rotation.as_ref(), &mut report)
                .await;
        }
        Commands::Restart(args) => {
            let credentials = load_credentials()?;
            let command = if args.no_terminal {
                None
            } else {
                std::env::var(ENV_COMMAND).ok().filter(|c| !c.is_empty())
            };
            runner
                .run_restart(&credentials, command.as_deref(), rotation.as_ref(), &mut report)
                .await;
        }
    }

    let text = report.render();
    if let Err(err) = notifier
        .deliver(&text, report.lead_screenshot().map(PathBuf::as_path))
        .await
    {
        warn!(error = %err, "report delivery failed");
    }

    Ok(report.exit_code())
}

fn load_credentials() -> Result<CredentialSet> {
    let blob = require_env(ENV_COOKIES)?;
    let credentials = CredentialSet::parse(&blob);
    if credentials.is_empty() {
        return Err(AppError::MissingSecret(ENV_COOKIES));
    }
    info!(%credentials, "credentials loaded");
    Ok(credentials)
}

fn require_env(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::MissingSecret(name)),
    }
}

fn build_notifier(config: &UpkeepConfig) -> Box<dyn NotificationSink> {
    if !config.notify.enabled {
        return Box::new(NoopNotifier);
    }
    match (std::env::var(ENV_BOT_TOKEN), std::env::var(ENV_CHAT_ID)) {
        (Ok(token), Ok(chat)) if !token.is_empty() && !chat.is_empty() => Box::new(
            TelegramNotifier::new(token, chat, config.notify.caption_limit),
        ),
        _ => {
            warn!("notification enabled but bot credentials absent, logging only");
            Box::new(NoopNotifier)
        }
    }
}

fn build_rotation(config: &UpkeepConfig) -> Box<dyn RotationSink> {
    if config.rotation.enabled {
        Box::new(FileRotation::new(
            config.resolve_path(&config.rotation.output_file),
        ))
    } else {
        Box::new(NoopRotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["upkeepctl", "renew"]).unwrap();
        assert!(matches!(cli.command, Commands::Renew));

        let cli =
            Cli::try_parse_from(["upkeepctl", "--config", "/etc/upkeep.toml", "restart", "--no-terminal"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/upkeep.toml"));
        match cli.command {
            Commands::Restart(args) => assert!(args.no_terminal),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let err = require_env("UPKEEP_TEST_UNSET_VARIABLE").unwrap_err();
        assert!(err.to_string().contains("UPKEEP_TEST_UNSET_VARIABLE"));
    }
}
