//! `trailkeep` - CLI for trailkeeper
//!
//! This binary inspects and manages the trails, tracks and shared locations
//! stored in the local trailkeeper database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use trailkeeper::cli::{Cli, Command, ConfigCommand, OutputFormat, SharedCommand, TrailsCommand, TracksCommand};
use trailkeeper::{
    init_logging, Config, GpxTrack, PositionSample, Services, SimulatedLocationProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Tracks(cmd) => handle_tracks(config, cmd).await,
        Command::Trails(cmd) => handle_trails(config, cmd).await,
        Command::Shared(cmd) => handle_shared(config, cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_services(config: Config) -> Result<(Services, Arc<SimulatedLocationProvider>)> {
    let provider = Arc::new(SimulatedLocationProvider::new());
    let services = Services::open(config, provider.clone()).context("failed to open database")?;
    Ok((services, provider))
}

async fn handle_tracks(config: Config, cmd: TracksCommand) -> Result<()> {
    let (services, provider) = open_services(config)?;
    let tracks = services.tracks();

    match cmd {
        TracksCommand::List { format } => {
            let all = tracks.tracks().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&all)?),
                OutputFormat::Plain => {
                    if all.is_empty() {
                        println!("No tracks recorded.");
                    }
                    for track in &all {
                        println!(
                            "{:<24} {:<28} {}",
                            track.id,
                            track.name,
                            track.start_time.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
            }
        }
        TracksCommand::Show { id, format } => {
            let Some(track) = tracks.track(&id).await else {
                bail!("track not found: {id}");
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&track)?),
                OutputFormat::Plain => print_track(&track),
            }
        }
        TracksCommand::Export { id, output, share } => {
            if share {
                let path = tracks.share_gpx(&id).await?;
                println!("Saved {}", path.display());
                println!("Copied to {}", services.config().outbox_dir().display());
            } else {
                let xml = tracks.export_to_gpx(&id).await?;
                write_output(output.as_deref(), &xml).await?;
            }
        }
        TracksCommand::Import { file } => {
            let xml = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let track = tracks.import_gpx(&xml).await?;
            println!("Imported {} as {}", file.display(), track.id);
            print_track(&track);
        }
        TracksCommand::Replay {
            file,
            name,
            description,
        } => {
            let samples = read_samples(&file).await?;
            tracks.start_recording(name, description).await?;

            let mut delivered = 0;
            for sample in samples {
                delivered += provider.push(sample).await;
            }
            wait_for_points(&services, delivered).await;

            let Some(track) = tracks.stop_recording().await else {
                bail!("recording ended unexpectedly");
            };
            println!("Recorded {}", track.id);
            print_track(&track);
        }
    }
    Ok(())
}

async fn handle_trails(config: Config, cmd: TrailsCommand) -> Result<()> {
    let (services, _) = open_services(config)?;
    let trails = services.trails();

    match cmd {
        TrailsCommand::List { format } => {
            let all = trails.trails().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&all)?),
                OutputFormat::Plain => {
                    if all.is_empty() {
                        println!("No trails recorded.");
                    }
                    for trail in &all {
                        println!(
                            "{:<24} {:<20} {:>4} breadcrumbs  {}{}",
                            trail.id,
                            trail.adventure_id,
                            trail.breadcrumbs.len(),
                            trail.start_time.format("%Y-%m-%d %H:%M"),
                            if trail.is_active { "  (active)" } else { "" }
                        );
                    }
                }
            }
        }
        TrailsCommand::Export { id, output } => {
            let xml = trails.export_to_gpx(&id).await?;
            write_output(output.as_deref(), &xml).await?;
        }
        TrailsCommand::Delete { id } => {
            if trails.delete_trail(&id).await? {
                println!("Deleted {id}");
            } else {
                bail!("trail not found: {id}");
            }
        }
    }
    Ok(())
}

async fn handle_shared(config: Config, cmd: SharedCommand) -> Result<()> {
    let (services, _) = open_services(config)?;
    let sharing = services.sharing();

    match cmd {
        SharedCommand::List {
            near,
            radius,
            format,
        } => {
            let locations = match near {
                Some(point) => sharing.locations_nearby(point, radius).await,
                None => sharing.shared_locations().await,
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&locations)?),
                OutputFormat::Plain => {
                    if locations.is_empty() {
                        println!("No recent shared locations.");
                    }
                    for location in &locations {
                        println!(
                            "{:<20} {:>10.5} {:>11.5}  {:?}  {}",
                            location.user_name,
                            location.latitude,
                            location.longitude,
                            location.status,
                            location.timestamp.format("%H:%M:%S")
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Export directory:   {}", config.export_dir().display());
                println!("  Share outbox:       {}", config.outbox_dir().display());
                println!();
                println!("[Location]");
                println!(
                    "  Request timeout:    {}",
                    config
                        .request_timeout()
                        .map_or_else(|| "none".to_string(), |t| format!("{t:?}"))
                );
                println!();
                println!("[Trail]");
                println!("  Auto-drop interval: {:?}", config.auto_drop_interval());
                println!(
                    "  Auto-drop distance: {} m",
                    config.trail.min_auto_drop_distance_m
                );
                println!();
                println!("[Track]");
                println!("  Update interval:    {:?}", config.track_interval());
                println!("  Update distance:    {} m", config.track.min_distance_m);
                println!();
                println!("[Sharing]");
                println!("  User id:            {}", config.sharing.user_id);
                println!("  Update interval:    {:?}", config.sharing_interval());
                println!("  Stale after:        {} s", config.sharing.stale_after_secs);
                println!(
                    "  Max locations:      {}",
                    config.sharing.max_shared_locations
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)).and_then(|c| c.validate()) {
                Ok(()) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_track(track: &GpxTrack) {
    println!("{} ({})", track.name, track.id);
    if let Some(description) = &track.description {
        println!("  {description}");
    }
    println!("  {}", track.stats());
}

async fn write_output(output: Option<&Path>, xml: &str) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, xml)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{xml}"),
    }
    Ok(())
}

async fn read_samples(file: &Path) -> Result<Vec<PositionSample>> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid position sample", file.display(), i + 1))
        })
        .collect()
}

async fn wait_for_points(services: &Services, expected: usize) {
    for _ in 0..500 {
        let recorded = services
            .tracks()
            .active_track()
            .await
            .map_or(0, |track| track.track_points.len());
        if recorded >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tracing::warn!(expected, "Not every replayed sample was recorded");
}
