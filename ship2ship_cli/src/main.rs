//! ship2ship CLI
//!
//! Simulate or import AIS pings into a sled database, run overlap
//! detection over a partition, and report the busiest vessel pairs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use ship2ship_cli::{read_pings_jsonl, read_ports, write_pings_jsonl, FleetConfig, FleetSimulator};
use ship2ship_core::pipeline::{load_aggregates, load_candidates, save_pings};
use ship2ship_core::{hotspots, DetectionConfig, HarbourMask, H3Geometry, OverlapDetector, TimeRange};
use ship2ship_store::{SledStore, TableStore};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Ship-to-ship overlap detection over AIS pings
#[derive(Parser, Debug)]
#[command(name = "ship2ship")]
#[command(about = "Find vessel pairs whose buffered positions overlap in space and time", long_about = None)]
struct Args {
    /// Sled database directory
    #[arg(long, global = true, default_value = "ship2ship.db")]
    db: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a synthetic fleet into the pings table
    Simulate {
        /// Number of vessels
        #[arg(long, default_value = "50")]
        vessels: usize,

        /// Reports per vessel
        #[arg(long, default_value = "60")]
        pings: usize,

        /// Seconds between reports
        #[arg(long, default_value = "60")]
        interval: i64,

        /// Vessel pairs that loiter together
        #[arg(long, default_value = "2")]
        rendezvous: usize,

        /// Master seed for determinism
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Day to simulate (YYYY-MM-DD), also the partition name
        #[arg(long, default_value = "2018-01-31")]
        date: String,

        /// Also write the pings to a JSONL file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load pings from a JSONL file into a partition
    Import {
        /// JSONL file, one ping per line
        #[arg(long)]
        input: PathBuf,

        /// Target partition of the pings table
        #[arg(long)]
        partition: String,
    },

    /// Run detection over one partition
    Run {
        #[arg(long)]
        partition: String,

        /// Inclusive start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Inclusive end (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// JSON detection config; missing fields use defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the busiest candidates of a partition
    Report {
        #[arg(long)]
        partition: String,

        /// Rows to show
        #[arg(long, default_value = "20")]
        top: usize,

        /// JSON array of ports; candidates near them are excluded
        #[arg(long)]
        harbours: Option<PathBuf>,

        /// Exclusion radius around each port in metres
        #[arg(long, default_value_t = HarbourMask::DEFAULT_RADIUS_M)]
        harbour_radius: f64,

        /// Cell resolution the partition was indexed at
        #[arg(long, default_value = "9")]
        resolution: u8,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let store = SledStore::open(&args.db).with_context(|| format!("Failed to open {}", args.db.display()))?;

    match args.command {
        Command::Simulate {
            vessels,
            pings,
            interval,
            rendezvous,
            seed,
            date,
            output,
        } => {
            let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d").with_context(|| format!("Invalid date {}", date))?;
            let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).context("Invalid start of day")?);

            let config = FleetConfig::new(vessels, pings, start)
                .with_interval(interval)
                .with_rendezvous_pairs(rendezvous);
            let traffic = FleetSimulator::new(seed, config)?.run();

            if let Some(path) = output {
                write_pings_jsonl(&path, &traffic)?;
                info!("Wrote {} pings to {}", traffic.len(), path.display());
            }
            let written = save_pings(&store, &date, &traffic)?;
            info!("Simulated {} vessels (seed={}) into pings/{}", vessels, seed, date);
            emit(args.json, &serde_json::json!({ "partition": date, "pings": written }))?;
        }

        Command::Import { input, partition } => {
            let import = read_pings_jsonl(&input)?;
            if import.skipped > 0 {
                warn!("Skipped {} unparsable lines in {}", import.skipped, input.display());
            }
            let written = save_pings(&store, &partition, &import.pings)?;
            emit(
                args.json,
                &serde_json::json!({ "partition": partition, "pings": written, "skipped": import.skipped }),
            )?;
        }

        Command::Run {
            partition,
            start,
            end,
            config,
        } => {
            let mut detection = match config {
                Some(path) => DetectionConfig::from_json_file(&path)?,
                None => DetectionConfig::default(),
            };
            match (start, end) {
                (Some(start), Some(end)) => detection.time_range = Some(TimeRange::new(start, end)),
                (None, None) => {}
                _ => bail!("--start and --end must be given together"),
            }

            if !store.partitions(ship2ship_core::tables::PINGS)?.contains(&partition) {
                bail!("No pings partition named {}", partition);
            }

            let detector = OverlapDetector::new(detection)?;
            let summary = detector.run(&store, &partition)?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                info!("Run {} over {}", summary.run_id, summary.partition);
                info!(
                    "  pings={} indexed={} invalid={} unindexed={}",
                    summary.pings, summary.index.indexed, summary.index.invalid_coordinates, summary.index.indexing_failures
                );
                info!(
                    "  comparisons={} candidates={} aggregates={} ({} ms)",
                    summary.join.comparisons, summary.candidates, summary.aggregates, summary.elapsed_ms
                );
            }
        }

        Command::Report {
            partition,
            top,
            harbours,
            harbour_radius,
            resolution,
        } => {
            let mask = match harbours {
                Some(path) => HarbourMask::from_ports(&H3Geometry::new(), &read_ports(&path)?, harbour_radius, resolution)?,
                None => HarbourMask::empty(),
            };

            let aggregates = mask.exclude(&load_aggregates(&store, &partition)?);
            let candidates = load_candidates(&store, &partition)?;
            let pairs = mask.vessel_pairs(&candidates);
            let cells = hotspots(&aggregates);

            if args.json {
                let report = serde_json::json!({
                    "partition": partition,
                    "aggregates": aggregates.iter().take(top).collect::<Vec<_>>(),
                    "vessel_pairs": pairs.iter().take(top).collect::<Vec<_>>(),
                    "hotspots": cells.iter().take(top).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:<18} {:>9} {:>9} {:>6}", "cell", "vessel_1", "vessel_2", "count");
                for a in aggregates.iter().take(top) {
                    println!("{:<18} {:>9} {:>9} {:>6}", a.cell_id.to_string(), a.vessel_1, a.vessel_2, a.count);
                }
                println!();
                println!("{:<9} {:<9} {:>6} {:>6}  {:<20} {}", "vessel_1", "vessel_2", "cells", "count", "first seen", "names");
                for p in pairs.iter().take(top) {
                    println!(
                        "{:<9} {:<9} {:>6} {:>6}  {:<20} {} / {}",
                        p.vessel_1,
                        p.vessel_2,
                        p.cells,
                        p.count,
                        p.first_seen.format("%Y-%m-%d %H:%M:%S"),
                        p.vessel_name_1,
                        p.vessel_name_2
                    );
                }
            }
        }
    }

    Ok(())
}

/// Prints a machine-readable result in `--json` mode.
fn emit(json: bool, value: &serde_json::Value) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
