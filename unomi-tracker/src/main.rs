//! unomi-tracker - operator CLI for the Unomi event tracker
//!
//! Exercises a context server the same way an embedded tracker would:
//! resolve the session, bootstrap the context, send events.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/unomi-tracker/config.toml (~/.config/unomi-tracker/config.toml)
//! - Cookies: $XDG_STATE_HOME/unomi-tracker/cookies.json
//! - Logs: $XDG_STATE_HOME/unomi-tracker/unomi-tracker.log

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use unomi_tracker_core::{
    BootstrapOptions, BootstrapState, CollectOutcome, Config, LoadedContext, PageProperties,
    Tracker,
};

#[derive(Parser)]
#[command(name = "unomi-tracker")]
#[command(about = "Send tracking events to a Unomi context server")]
#[command(version)]
struct Args {
    /// Write diagnostics to the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Context server base URL (overrides the config file)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration
    Status,
    /// Print the current session id, creating it if needed
    Session {
        /// Forget the stored session first
        #[arg(long)]
        reset: bool,
    },
    /// Record a page view and print the loaded context
    Page {
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        referrer: Option<String>,
    },
    /// Send a custom event and print the server acknowledgement
    Track {
        /// Event type, e.g. `signup`
        event_type: String,
        /// Event properties as a JSON object
        #[arg(long)]
        properties: Option<String>,
    },
    /// Bootstrap the context and print it
    Context {
        /// Start a new server-side session and profile
        #[arg(long)]
        invalidate: bool,
        /// Do not send queued events with the bootstrap
        #[arg(long)]
        skip_events: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(url) = &args.url {
        config.tracker.url = url.clone();
        config
            .tracker
            .validate()
            .context("invalid --url")?;
    }

    let _log_guard = if args.verbose {
        Some(
            unomi_tracker_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    tracing::info!("unomi-tracker starting");

    match args.command {
        Command::Status => print_status(&config),
        Command::Session { reset } => {
            let tracker = open_tracker(&config)?;
            if reset {
                tracker.reset_session().context("failed to reset session")?;
            }
            println!("{}", tracker.session_id());
            Ok(())
        }
        Command::Page {
            path,
            title,
            url,
            referrer,
        } => {
            let tracker = open_tracker(&config)?;
            let props = PageProperties {
                title,
                path,
                url,
                referrer,
            };
            tracker
                .initialize(Some(&props))
                .context("failed to initialize tracker")?;
            let loaded = bootstrap(&tracker, BootstrapOptions::default()).await?;
            print_context(&loaded)
        }
        Command::Track {
            event_type,
            properties,
        } => {
            let properties = properties
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--properties is not valid JSON")?;

            let tracker = open_tracker(&config)?;
            tracker
                .initialize(None)
                .context("failed to initialize tracker")?;
            bootstrap(&tracker, BootstrapOptions::default()).await?;

            match tracker
                .track(&event_type, properties)
                .await
                .with_context(|| format!("failed to send '{}'", event_type))?
            {
                CollectOutcome::Sent(ack) => {
                    println!("{}", serde_json::to_string_pretty(&ack)?);
                }
                CollectOutcome::Queued => println!("queued"),
            }
            Ok(())
        }
        Command::Context {
            invalidate,
            skip_events,
        } => {
            let tracker = open_tracker(&config)?;
            tracker
                .initialize(None)
                .context("failed to initialize tracker")?;
            let loaded = bootstrap(
                &tracker,
                BootstrapOptions {
                    skip_events,
                    invalidate,
                },
            )
            .await?;
            print_context(&loaded)
        }
    }
}

fn open_tracker(config: &Config) -> Result<Tracker> {
    Tracker::from_config(config.tracker.clone()).context("failed to create tracker")
}

/// Bootstrap unless initialization already settled on the fallback
async fn bootstrap(tracker: &Tracker, options: BootstrapOptions) -> Result<Arc<LoadedContext>> {
    if tracker.bootstrap_state() == BootstrapState::Loaded {
        if let Some(loaded) = tracker.context() {
            return Ok(loaded);
        }
    }
    tracker
        .load_context(options)
        .await
        .context("failed to load context")
}

fn print_status(config: &Config) -> Result<()> {
    let tracker = &config.tracker;
    println!("Config: {}", Config::config_path().display());
    println!("Cookies: {}", Config::cookie_jar_path().display());
    println!("Logs: {}", Config::log_path().display());
    println!();
    println!("url: {}", tracker.url);
    println!("scope: {}", tracker.scope);
    match tracker.timeout() {
        Some(timeout) => println!("timeout: {}ms", timeout.as_millis()),
        None => println!("timeout: disabled"),
    }
    println!("session cookie: {}", tracker.session_cookie_name);
    println!("cookies enabled: {}", tracker.cookies_enabled);
    Ok(())
}

fn print_context(loaded: &LoadedContext) -> Result<()> {
    if loaded.fallback {
        eprintln!("context server unavailable, using fallback context");
    }
    println!("{}", serde_json::to_string_pretty(&loaded.context)?);
    Ok(())
}
