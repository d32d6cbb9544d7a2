use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use rustivr::{
    app::{self, AppStateBuilder},
    config::Config,
    handler::middleware::request_log::AccessLogEventFormat,
    version,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "A config-driven IVR answering telephony webhooks",
    long_about = version::get_version_info()
)]
struct Cli {
    /// Path to the configuration file
    #[clap(
        long,
        global = true,
        default_value = "rustivr.toml",
        help = "Path to the configuration file (TOML format)"
    )]
    conf: String,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the call flow and exit without starting the server
    CheckConfig {
        /// Only report through the exit status
        #[clap(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    if let Some(Commands::CheckConfig { quiet }) = cli.command {
        let result = Config::load(&cli.conf).and_then(|config| config.check());
        match result {
            Ok(flow) => {
                if !quiet {
                    for section in flow.section_names() {
                        println!("{}: ok", section);
                    }
                    println!("{}: configuration is valid", cli.conf);
                }
                return Ok(());
            }
            Err(err) => {
                if !quiet {
                    eprintln!("{}: configuration is invalid: {}", cli.conf, err);
                }
                std::process::exit(1);
            }
        }
    }

    println!("Loading config from: {}", cli.conf);
    let config = Config::load(&cli.conf)?;
    println!("Start at {}", Utc::now());
    println!("{}", version::get_version_info());

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }

    let mut guard_holder = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        guard_holder = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339()))
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339())),
            )
            .try_init()?;
    }
    let _ = guard_holder; // keep the guard alive

    let state = AppStateBuilder::new().config(config).build()?;
    info!("starting rustivr on {}", state.config.http_addr);
    let mut app_future = Box::pin(app::run(state.clone()));

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?
    };

    #[cfg(unix)]
    {
        tokio::select! {
            result = &mut app_future => return result,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
            }
            _ = sigterm_stream.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = &mut app_future => return result,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
            }
        }
    }

    state.token.cancel();
    app_future.await
}
