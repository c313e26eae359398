use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mingle::discovery::{DiscoveryPump, StaticFeed};
use mingle::generator::{CannedGenerator, CommentGenerator};
use mingle::generator::http::HttpGenerator;
use mingle::orchestrator::Orchestrator;
use mingle::platform::mock::{MockChannel, MockPlatform, media_post, text_post};
use mingle::settings::AccountSettings;
use mingle::store::Store;
use mingle::store::sqlite::SqliteStore;

/// Dry-run harness: exercises the full engagement pipeline against a
/// simulated platform. Real platform bindings plug in through the
/// `PlatformClient` trait.
#[derive(Parser)]
#[command(name = "mingle", version, about = "Joins the conversation, one channel at a time.")]
struct Cli {
    /// Account identifier for this run
    #[arg(short, long, default_value = "operator")]
    account: String,

    /// SQLite database path (defaults to ~/.mingle/mingle.db;
    /// use :memory: for ephemeral)
    #[arg(short, long)]
    db: Option<String>,

    /// Stop after fully processing this many channels
    #[arg(long)]
    max_channels: Option<usize>,

    /// Minimum posts to engage per channel
    #[arg(long, default_value_t = 1)]
    posts_min: usize,

    /// Maximum posts to engage per channel
    #[arg(long, default_value_t = 2)]
    posts_max: usize,

    /// Minimum subscribe delay in seconds
    #[arg(long, default_value_t = 0)]
    delay_min: u64,

    /// Maximum subscribe delay in seconds
    #[arg(long, default_value_t = 2)]
    delay_max: u64,

    /// Keep engaged channels subscribed and watch for new posts
    #[arg(long, default_value_t = false)]
    track_new_posts: bool,

    /// Topic hints for discovery and comment generation
    #[arg(long, value_delimiter = ',', default_value = "general")]
    topics: Vec<String>,

    /// Discovery keywords
    #[arg(long, value_delimiter = ',', default_value = "news")]
    keywords: Vec<String>,

    /// OpenAI-compatible endpoint for comment generation
    /// (canned comments when omitted)
    #[arg(long)]
    generator_url: Option<String>,

    /// Generator model name
    #[arg(long)]
    model: Option<String>,

    /// How many channels the simulated platform serves
    #[arg(long, default_value_t = 4)]
    sim_channels: usize,

    /// How long to run before stopping, in seconds
    #[arg(long, default_value_t = 60)]
    run_secs: u64,
}

/// Seed the mock platform with channels that look like discovery hits.
fn seed_platform(count: usize) -> (Arc<MockPlatform>, Vec<String>) {
    let platform = Arc::new(MockPlatform::new());
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let handle = format!("channel_{i}");
        let base = (i as i64 + 1) * 100;
        platform.add_channel(
            &handle,
            MockChannel::open(
                i as i64 + 1,
                vec![
                    text_post(base + 1, "Morning update: things are happening."),
                    media_post(base + 2),
                    text_post(base + 3, "A longer read on the state of the field."),
                ],
            ),
        );
        handles.push(handle);
    }
    (platform, handles)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let settings = AccountSettings {
        max_channels: cli.max_channels,
        posts_range: (cli.posts_min, cli.posts_max),
        delay_range: (cli.delay_min, cli.delay_max),
        track_new_posts: cli.track_new_posts,
        topics: cli.topics.clone(),
        keywords: cli.keywords.clone(),
    };
    settings.validate()?;

    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| mingle::consts::default_db_path().to_string_lossy().into_owned());
    if let Some(parent) = std::path::Path::new(&db).parent() {
        if db != ":memory:" && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&db)?);
    let generator: Arc<dyn CommentGenerator> = match &cli.generator_url {
        Some(url) => Arc::new(HttpGenerator::new(
            url.clone(),
            cli.model.clone(),
            std::env::var("MINGLE_API_KEY").ok(),
        )),
        None => Arc::new(CannedGenerator),
    };

    let (platform, discovered) = seed_platform(cli.sim_channels);
    info!(channels = discovered.len(), "simulated platform ready");

    let orchestrator = Arc::new(
        Orchestrator::new(generator, store).with_pacing(Duration::from_millis(200)),
    );
    orchestrator
        .start_account(&cli.account, platform, settings.clone())
        .await?;

    let cancel = orchestrator
        .cancel_token(&cli.account)
        .await
        .expect("account was just started");

    let feed = Arc::new(StaticFeed::new(discovered));
    let pump = DiscoveryPump::new(
        feed,
        Arc::clone(&orchestrator),
        cli.account.clone(),
        settings,
        cancel,
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.run_secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
        _ = pump.run() => {}
    }

    let status = orchestrator.status(&cli.account).await;
    orchestrator.stop_account(&cli.account).await?;

    if let Some(status) = status {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}
