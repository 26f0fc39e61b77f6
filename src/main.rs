use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autopunch::cancel::CancellationToken;
use autopunch::captcha::CommandSolver;
use autopunch::config::Config;
use autopunch::credentials::Credential;
use autopunch::error::PunchError;
use autopunch::notify::LogNotifier;
use autopunch::punch::DailyPunch;
use autopunch::schedule::{Punch, ScheduleRunner};
use autopunch::session;
use autopunch::clock::SystemClock;

#[derive(Parser, Debug)]
#[command(name = "autopunch")]
#[command(about = "Daily check-in automation for a captcha-gated campus web form")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")"))]
struct Cli {
    /// Path to config file.
    #[arg(short, long, default_value = "autopunch.toml")]
    config: PathBuf,

    /// Path to the account file (JSON with "username"/"password" keys).
    #[arg(long, default_value = "account.json")]
    account: PathBuf,

    /// Username; overrides the account file together with --password.
    #[arg(short, long)]
    username: Option<String>,

    /// Password; overrides the account file together with --username.
    #[arg(short, long)]
    password: Option<String>,

    /// OCR command the normalized captcha image is piped through.
    #[arg(long, default_value = "tesseract")]
    ocr_command: String,

    /// Arguments for the OCR command.
    #[arg(long, num_args = 0.., default_values_t = ["stdin".to_string(), "stdout".to_string()])]
    ocr_args: Vec<String>,

    /// Verify the credential and exit.
    #[arg(long)]
    check_login: bool,

    /// Run one punch cycle immediately and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    let plan = config.schedule.resolve()?;

    let credential = match (cli.username, cli.password) {
        (Some(username), Some(password)) => Credential::new(username, password),
        (None, None) => Credential::from_file(&cli.account)?,
        _ => bail!("--username and --password must be given together"),
    };

    let solver = Arc::new(CommandSolver::new(cli.ocr_command, cli.ocr_args));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    info!(account = credential.username(), "verifying credential");
    session::confirm(
        &config.http,
        &config.login,
        solver.as_ref(),
        &credential,
        &cancel,
    )
    .await
    .context("credential verification failed")?;
    info!("credential verified");

    if cli.check_login {
        return Ok(());
    }

    let display_name = config.display_name.clone();
    let account_name = credential.username().to_string();
    let punch = DailyPunch::new(config, plan.tz, credential, solver);

    if cli.once {
        punch.punch(&cancel).await?;
        return Ok(());
    }

    let notifier = LogNotifier;
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(plan, &punch, &notifier, &clock, display_name, account_name);
    match runner.run(&cancel).await {
        Err(PunchError::Cancelled) => {
            info!("exit");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}
