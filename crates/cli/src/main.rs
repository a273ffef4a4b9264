mod commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    secrecy::Secret,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "janus", about = "Janus WebRTC gateway client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (defaults to ./janus.toml or ~/.config/janus/janus.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL, overriding the config file.
    #[arg(long, global = true, env = "JANUS_URL")]
    url: Option<String>,

    /// Shared API secret, overriding the config file.
    #[arg(long, global = true, env = "JANUS_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Log every JSON message sent and received.
    #[arg(long, global = true, default_value_t = false)]
    log_messages: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print server information.
    Info,
    /// Create a session and keep it alive.
    Session {
        /// Seconds to hold the session open; runs until interrupted if omitted.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Attach to a plugin and send it one message.
    Echo {
        #[arg(long, default_value = "janus.plugin.echotest")]
        plugin: String,
        /// JSON message body.
        #[arg(long, default_value = r#"{"audio":true,"video":true}"#)]
        body: String,
        /// JSON offer/answer to attach to the message.
        #[arg(long)]
        jsep: Option<String>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<janus_config::GatewayConfig> {
    let mut config = janus_config::load(cli.config.as_deref())?.gateway;
    if let Some(url) = &cli.url {
        config.url.clone_from(url);
    }
    if let Some(secret) = &cli.api_secret {
        config.api_secret = Some(Secret::new(secret.clone()));
    }
    config.log_messages |= cli.log_messages;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "janus starting");
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => commands::info(&config).await,
        Commands::Session { duration } => commands::session(&config, duration).await,
        Commands::Echo { plugin, body, jsep } => {
            commands::echo(&config, &plugin, &body, jsep.as_deref()).await
        },
    }
}
