//! Beacon CLI - inspect and exercise the tracking client
//!
//! Usage:
//!     beacon digest "some text"
//!     beacon cookie-name id --site 1 --domain example.com
//!     beacon build --url https://example.com/pricing --title Pricing
//!     beacon replay queue.json --url https://example.com/
//!     beacon send --endpoint https://stats.example.com/piwik.php --site 1   (feature "http")
//!
//! Set `RUST_LOG=beacon_tracker=debug` to see the tracker's decisions.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon_core::hash::digest;
use beacon_core::{
    CookieBase, CookieScope, MemoryCookieJar, NullTimerBackend, StaticEnvironment, SystemClock, TrackerConfig,
};
use beacon_tracker::{parse_queue, CommandQueue, Host, QueueItem, RecordingTransport, Registry, Transport};

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "First-party analytics tracking client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the 40-hex digest of a string
    Digest { text: String },

    /// Print the name a tracker cookie gets
    CookieName {
        base: BaseArg,

        #[arg(long, default_value = "1")]
        site: String,

        /// Cookie domain; the page host when absent
        #[arg(long, default_value = "localhost")]
        domain: String,

        #[arg(long)]
        path: Option<String>,

        #[arg(long, default_value = "_pk_")]
        prefix: String,
    },

    /// Build the page-view request for a simulated page
    Build {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Replay a JSON command queue and print every request it sends
    Replay {
        /// File holding `[["method", ...args], ...]`
        queue: PathBuf,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Build a page view and deliver it over HTTP
    #[cfg(feature = "http")]
    Send {
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value = "1")]
        site: String,

        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(clap::Args, Debug)]
struct PageArgs {
    /// Address of the simulated page
    #[arg(long, default_value = "http://localhost/")]
    url: String,

    #[arg(long, default_value = "")]
    referrer: String,

    #[arg(long, default_value = "")]
    title: String,

    /// Tracker configuration document (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BaseArg {
    Id,
    Ses,
    Cvar,
    Ref,
}

impl From<BaseArg> for CookieBase {
    fn from(base: BaseArg) -> Self {
        match base {
            BaseArg::Id => CookieBase::Id,
            BaseArg::Ses => CookieBase::Session,
            BaseArg::Cvar => CookieBase::CustomVariables,
            BaseArg::Ref => CookieBase::Referral,
        }
    }
}

impl PageArgs {
    fn load_config(&self) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
        match &self.config {
            Some(path) => Ok(TrackerConfig::from_json(&read(path)?)?),
            None => Ok(TrackerConfig::default()),
        }
    }

    fn registry(&self, transport: Rc<dyn Transport>) -> Registry {
        let clock = Rc::new(SystemClock);
        let env = StaticEnvironment::for_page(&self.url)
            .with_referrer(&self.referrer)
            .with_title(&self.title);
        Registry::new(Host {
            env: Rc::new(env),
            clock: clock.clone(),
            cookies: Rc::new(MemoryCookieJar::new(clock.clone())),
            transport,
            timers: Rc::new(NullTimerBackend),
        })
    }
}

fn read(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e).into())
}

fn print_sent(transport: &RecordingTransport) {
    for beacon in transport.sent() {
        if beacon.endpoint.is_empty() {
            println!("{}", beacon.body);
        } else {
            println!("{}", beacon.pixel_url());
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_tracker=warn,beacon_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Digest { text } => println!("{}", digest(&text)),

        Command::CookieName {
            base,
            site,
            domain,
            path,
            prefix,
        } => {
            let scope = CookieScope::new(&prefix, &site, Some(&domain), path.as_deref(), &domain);
            println!("{}", scope.cookie_name(base.into()));
        }

        Command::Build { page } => {
            let transport = RecordingTransport::new();
            let registry = page.registry(Rc::new(transport.clone()));
            let tracker = registry.tracker_with_config(page.load_config()?);
            tracker.track_page_view(None, None).await;
            print_sent(&transport);
        }

        Command::Replay { queue, page } => {
            let commands = parse_queue(&read(&queue)?)?;
            let transport = RecordingTransport::new();
            let registry = page.registry(Rc::new(transport.clone()));
            tracing::info!(commands = commands.len(), "replaying queue");

            let items = commands.into_iter().map(QueueItem::from).collect();
            CommandQueue::replay(registry.default_tracker(), items).await;
            registry.on_load();
            print_sent(&transport);
        }

        #[cfg(feature = "http")]
        Command::Send { endpoint, site, page } => {
            let registry = page.registry(Rc::new(beacon_tracker::HttpTransport::new()));
            let mut config = page.load_config()?;
            config.tracker_url = endpoint.clone();
            config.site_id = site;
            config.tracker_pause_ms = 0;
            config.validate()?;

            let tracker = registry.tracker_with_config(config);
            tracker.track_page_view(None, None).await;
            println!("page view for {} sent to {}", tracker.current_url(), endpoint);
        }
    }

    Ok(())
}
