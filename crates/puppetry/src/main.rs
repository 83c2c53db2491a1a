//! puppetry - virtual character sync
//!
//! Subcommands:
//! - `puppetry run` - Route backend events to the character and stream the mic
//! - `puppetry say <text>` - Send one message, then route responses
//! - `puppetry config` - Show the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use puppetconf::PuppetConfig;
use puppetproto::ResponseMode;
use puppetry::{telemetry, App, AppOptions};

#[derive(Parser)]
#[command(name = "puppetry")]
#[command(about = "Drive a virtual character from a conversation backend")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./puppetry.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect everything and route events until Ctrl-C
    Run {
        /// Don't capture the microphone
        #[arg(long)]
        no_mic: bool,

        /// Never fetch or play voice audio
        #[arg(long)]
        text_mode: bool,

        /// Background to show on start (e.g. "Rei")
        #[arg(long)]
        background: Option<String>,
    },

    /// Send one text message, then route responses until Ctrl-C
    Say {
        /// Message text
        text: String,

        /// How the backend should answer
        #[arg(short, long, value_enum, default_value = "audio")]
        mode: ModeArg,

        /// Seconds to wait for the event server
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Print the effective configuration and where it came from
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Audio,
    Text,
}

impl From<ModeArg> for ResponseMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Audio => ResponseMode::Audio,
            ModeArg::Text => ResponseMode::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = PuppetConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => show_config(&config, &sources)?,
        Commands::Run {
            no_mic,
            text_mode,
            background,
        } => {
            telemetry::init(&config.telemetry.log_level)?;
            let app = App::start(
                &config,
                AppOptions {
                    mic: !no_mic,
                    text_mode,
                    background,
                },
            )
            .await?;
            wait_for_ctrl_c().await?;
            app.shutdown().await;
        }
        Commands::Say {
            text,
            mode,
            timeout,
        } => {
            telemetry::init(&config.telemetry.log_level)?;
            let app = App::start(
                &config,
                AppOptions {
                    mic: false,
                    text_mode: matches!(mode, ModeArg::Text),
                    background: None,
                },
            )
            .await?;

            if !app.wait_for_server(Duration::from_secs(timeout)).await {
                app.shutdown().await;
                anyhow::bail!("Event server not reachable within {}s", timeout);
            }
            if !app.send_text(&text, Some(mode.into()))? {
                app.shutdown().await;
                anyhow::bail!("Event server dropped before the message was sent");
            }
            tracing::info!("Sent: {}", text);

            wait_for_ctrl_c().await?;
            app.shutdown().await;
        }
    }

    Ok(())
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Ctrl-C received, shutting down");
    Ok(())
}

fn show_config(config: &PuppetConfig, sources: &puppetconf::ConfigSources) -> Result<()> {
    println!("# Sources");
    if sources.files.is_empty() {
        println!("#   (compiled defaults only)");
    }
    for file in &sources.files {
        println!("#   file: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("#   env:  {}", var);
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
