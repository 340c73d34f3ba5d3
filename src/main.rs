use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Timelike;
use clap::{Parser, Subcommand, ValueEnum};
use moodmatch::catalog::Track;
use moodmatch::config::AppConfig;
use moodmatch::labels::TimeOfDay;
use moodmatch::playlist::Selection;
use moodmatch::provider::SpotifyProvider;
use moodmatch::rng::SharedRng;
use moodmatch::{LabelKind, Recommender};

#[derive(Parser)]
#[command(name = "moodmatch", version, about = "Content-based music recommender")]
struct Cli {
    /// Path to the trained snapshot
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LabelArg {
    Mood,
    Activity,
    #[value(alias = "time")]
    TimeOfDay,
}

impl From<LabelArg> for LabelKind {
    fn from(arg: LabelArg) -> Self {
        match arg {
            LabelArg::Mood => LabelKind::Mood,
            LabelArg::Activity => LabelKind::Activity,
            LabelArg::TimeOfDay => LabelKind::TimeOfDay,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new snapshot from a CSV dataset and replace the stored one
    Train {
        /// CSV export with track metadata and the nine audio features
        dataset: PathBuf,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Nearest tracks by audio features (the track itself comes first)
    Similar {
        track_id: String,

        /// Number of results (default from config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Tracks sharing a mood or activity with the given track
    Related {
        track_id: String,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Playlist of tracks carrying a label, e.g. `playlist mood Happy`
    Playlist {
        #[arg(value_enum)]
        kind: LabelArg,

        /// Label value, e.g. "Happy", "Study/Focus", "Any Time"
        label: String,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Time-of-day playlist for the current (or given) hour
    Suggest {
        /// Hour of day, 0-23 (default: local time)
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: Option<u32>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Compatibility score (0-100) for a set of tracks
    Compatibility {
        #[arg(required = true, num_args = 2..)]
        track_ids: Vec<String>,
    },

    /// Diversity score (0-100) for a set of tracks
    Diversity {
        #[arg(required = true, num_args = 2..)]
        track_ids: Vec<String>,
    },

    /// Show snapshot statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve snapshot path: CLI > config > XDG default
    let snapshot_path = config.snapshot_path(cli.snapshot);
    log::info!("Snapshot: {}", snapshot_path.display());

    match cli.command {
        Commands::Train { dataset, jobs } => {
            let raw = moodmatch::dataset::load_dataset(&dataset)
                .with_context(|| format!("Failed to read dataset {}", dataset.display()))?;
            let mut training = config.training_config();
            if jobs > 0 {
                training.workers = jobs;
            }
            let snapshot = moodmatch::training::fit_all(raw, &training).context("Training failed")?;
            moodmatch::db::save_snapshot(&snapshot_path, &snapshot)
                .context("Failed to save snapshot")?;

            let meta = snapshot.meta();
            println!(
                "Training complete: {} tracks, {} clusters ({} iterations, inertia {:.2})",
                meta.tracks, meta.clusters, meta.iterations, meta.inertia
            );
            println!("Snapshot written to {}", snapshot_path.display());
        }
        command => {
            let engine = open_engine(&config, &snapshot_path)?;
            serve(&engine, command)?;
        }
    }

    Ok(())
}

/// Load the stored snapshot and wire up the serving engine.
fn open_engine(config: &AppConfig, snapshot_path: &Path) -> Result<Recommender> {
    let snapshot = moodmatch::db::load_snapshot(snapshot_path).with_context(|| {
        format!(
            "Failed to load snapshot from {}. Run `moodmatch train <dataset>` first.",
            snapshot_path.display()
        )
    })?;
    let rng = SharedRng::from_seed_opt(config.serving.seed);
    let mut engine = Recommender::new(snapshot, config.engine_settings(), rng);
    if let Some(spotify) = config.spotify_config() {
        match SpotifyProvider::new(spotify) {
            Ok(provider) => engine = engine.with_provider(Arc::new(provider)),
            Err(e) => log::warn!("Spotify provider disabled: {e}"),
        }
    }
    Ok(engine)
}

fn serve(engine: &Recommender, command: Commands) -> Result<()> {
    let settings = *engine.settings();
    match command {
        Commands::Train { .. } => anyhow::bail!("train does not use a loaded snapshot"),

        Commands::Similar { track_id, limit } => {
            let k = limit.unwrap_or(settings.similar_k);
            let selection = engine.get_similar_tracks(&track_id, k).context("Lookup failed")?;
            println!("Tracks similar to {track_id}:");
            println!();
            print_selection(&selection);
        }

        Commands::Related { track_id, limit } => {
            let n = limit.unwrap_or(settings.related_size);
            let selection = engine.related_by_labels(&track_id, n).context("Lookup failed")?;
            println!("Tracks sharing a mood or activity with {track_id}:");
            println!();
            print_selection(&selection);
        }

        Commands::Playlist { kind, label, limit } => {
            let n = limit.unwrap_or(settings.playlist_size);
            let selection = engine
                .playlist(kind.into(), &label, n, settings.fallback)
                .context("Playlist failed")?;
            println!("Playlist: {label}");
            println!();
            print_selection(&selection);
        }

        Commands::Suggest { hour, limit } => {
            let hour = hour.unwrap_or_else(|| chrono::Local::now().hour());
            let time_of_day = TimeOfDay::for_hour(hour);
            let n = limit.unwrap_or(settings.playlist_size);
            let selection = engine
                .get_time_of_day_playlist(time_of_day.as_str(), n)
                .context("Playlist failed")?;
            println!("{time_of_day} playlist (hour {hour}):");
            println!();
            print_selection(&selection);
        }

        Commands::Compatibility { track_ids } => {
            let score = engine.calculate_compatibility_score(&track_ids);
            println!("Compatibility: {score:.2} / 100");
        }

        Commands::Diversity { track_ids } => {
            let score = engine.calculate_diversity_score(&track_ids);
            println!("Diversity: {score:.2} / 100");
        }

        Commands::Stats => {
            let snap = engine.snapshot();
            let meta = snap.meta();
            println!("Snapshot Statistics");
            println!("===================");
            println!("Trained at:       {}", meta.trained_at.to_rfc3339());
            println!("Tracks:           {}", meta.tracks);
            println!("Clusters:         {}", meta.clusters);
            println!("k-means:          {} iterations, inertia {:.2}", meta.iterations, meta.inertia);
            println!();

            let tracks = snap.catalog().tracks();
            print_counts("Moods:", tracks.iter().map(|t| t.labels.mood.to_string()));
            print_counts("Activities:", tracks.iter().map(|t| t.labels.activity.to_string()));
            print_counts("Time of day:", tracks.iter().map(|t| t.labels.time_of_day.to_string()));
            print_counts("Clusters:", tracks.iter().map(|t| format!("cluster {}", t.cluster)));
        }
    }

    Ok(())
}

/// Print a table of tracks, flagging fallback samples.
fn print_selection(selection: &Selection) {
    if selection.tracks.is_empty() {
        println!("No tracks.");
        return;
    }
    if selection.is_fallback() {
        println!("No match; showing a random sample of the catalog.");
        println!();
    }

    println!(
        "{:<22} {:<25} {:<20} {:<8} {:<11} {:<9} {:>3}",
        "Id", "Song", "Artist", "Mood", "Activity", "Time", "Cl"
    );
    println!("{}", "-".repeat(104));
    for t in &selection.tracks {
        print_track_row(t);
    }
}

fn print_track_row(t: &Track) {
    println!(
        "{:<22} {:<25} {:<20} {:<8} {:<11} {:<9} {:>3}",
        truncate(&t.id, 22),
        truncate(&t.name, 25),
        truncate(&t.artist, 20),
        t.labels.mood.as_str(),
        t.labels.activity.as_str(),
        t.labels.time_of_day.as_str(),
        t.cluster,
    );
}

fn print_counts(title: &str, values: impl Iterator<Item = String>) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    println!("{title}");
    for (label, count) in &counts {
        println!("  {:<14} {}", label, count);
    }
    println!();
}

/// Truncate long text on a char boundary
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
