use std::{error::Error, path::PathBuf, process, sync::Arc, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, LevelFilter};

use auraplay::{
    config::Config,
    genre::{self, GenreDetector},
    history::HistoryStore,
    http,
    stats::AuraStats,
    store::{FileStore, KeyValueStore},
    track::{Artist, Track},
    util,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Ensure that this file is kept secure if it contains a credential or
    /// API key.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "AURAPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory with the persisted library and play history
    ///
    /// [default: data_dir from the configuration file, or ./data]
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    data_dir: Option<PathBuf>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Show listening statistics, score and rank
    Stats {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the most recent plays
    History {
        /// Number of plays to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Classify a track without playing it
    Genre {
        #[arg(short, long)]
        artist: String,

        #[arg(short, long)]
        title: String,
    },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("auraplay", level);
    }

    logger.init();
}

fn format_duration(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

fn print_stats(stats: &AuraStats) {
    println!("score:    {} ({})", stats.aura_score, stats.rank);
    match &stats.next_rank {
        Some(next) => println!(
            "next:     {} at {} ({} to go)",
            next.rank, next.threshold, next.points_needed
        ),
        None => println!("next:     top rank reached"),
    }
    println!(
        "listened: {} over {} plays",
        format_duration(stats.total_listening_time),
        stats.play_count
    );

    if !stats.genres.is_empty() {
        println!("\ngenres:");
        for share in &stats.genres {
            println!("  {:<14} {:>5.1}%", share.genre, share.percentage);
        }
    }

    if !stats.top_artists.is_empty() {
        println!("\ntop artists:");
        for (i, artist) in stats.top_artists.iter().enumerate() {
            println!(
                "  {:>2}. {} ({} plays, {})",
                i + 1,
                artist.name,
                artist.play_count,
                format_duration(artist.time)
            );
        }
    }

    if !stats.top_songs.is_empty() {
        println!("\ntop songs:");
        for (i, song) in stats.top_songs.iter().enumerate() {
            println!(
                "  {:>2}. {} - {} ({} plays, {})",
                i + 1,
                song.track.artist_names(),
                song.track.title,
                song.play_count,
                format_duration(song.time)
            );
        }
    }
}

/// Runs the requested subcommand against the persisted data.
///
/// # Errors
///
/// Returns an error when the configuration cannot be loaded, the data
/// directory is not accessible or the output cannot be encoded.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    debug!("{config:?}");

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir).await?);
    let client = Arc::new(http::Client::new(&config)?);
    let lookups = genre::lookup::providers(&client, config.lastfm_api_key.as_deref());
    let detector = Arc::new(
        GenreDetector::open(Arc::clone(&store), None, lookups, config.lookup_timeout).await,
    );

    match args.command {
        Command::Stats { json } => {
            let history = HistoryStore::open(store, detector, config.history_limit).await;
            let stats = history.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }

        Command::History { limit } => {
            let history = HistoryStore::open(store, detector, config.history_limit).await;
            let events = history.recent(limit).await;
            if events.is_empty() {
                info!("no plays recorded in {}", config.data_dir.display());
            }
            for event in events {
                println!(
                    "{}  {:<14} {} - {}",
                    util::format_epoch_ms(event.played_at),
                    event.genre.as_deref().unwrap_or(genre::OTHER),
                    event.track.artist_names(),
                    event.track.title
                );
            }
        }

        Command::Genre { artist, title } => {
            // Ad hoc tracks have no catalog id to cache under.
            let track = Track::new("", title, Duration::ZERO).with_artist(Artist::new("", artist));
            println!("{}", detector.classify(&track).await);
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested subcommand.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
