#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the dispatch engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use civic_dispatch::service::{DeployRequest, Placement};
use civic_dispatch::simulation::{Scenario, Simulator};
use civic_dispatch::{DispatchConfig, DispatchService};
use civic_dispatch_corridor::signals::SignalBoard;
use civic_dispatch_events::LogSink;
use civic_dispatch_models::clock::SystemClock;
use civic_dispatch_models::{GeoPoint, IncidentCategory, UnitCategory, UnitStatus};
use civic_dispatch_routing::{OsrmRouteProvider, RouteProvider, StraightLineRouteProvider};
use civic_dispatch_store::MemoryStore;
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "civic_dispatch", about = "Emergency dispatch and green corridor engine")]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use straight-line routes instead of calling the routing service
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the hex grid for the configured region and print a summary
    Bootstrap,
    /// Show the cell containing a coordinate
    Lookup {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
    },
    /// Report one incident against a fresh fleet and print the outcome
    Report {
        /// Reported type (e.g. "fire", "`road_accident`", "theft")
        #[arg(long)]
        category: String,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        /// Units of each category deployed at the region centre first
        #[arg(long, default_value = "2")]
        units: usize,
    },
    /// Run a surge of random incidents
    Simulate {
        /// Number of incidents to generate
        #[arg(long, default_value = "5")]
        count: usize,
        /// Reported type of every generated incident
        #[arg(long, default_value = "crime")]
        category: String,
        /// Seed for incident positions
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Units of each category deployed at the region centre first
        #[arg(long, default_value = "2")]
        units: usize,
    },
    /// Print the current phase of every traffic signal
    Signals,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = DispatchConfig::load(cli.config.as_deref())?;
    let routes: Arc<dyn RouteProvider> = if cli.offline {
        Arc::new(StraightLineRouteProvider)
    } else {
        Arc::new(OsrmRouteProvider::new(
            &config.routing.base_url,
            Duration::from_secs(config.routing.timeout_secs),
        )?)
    };

    let service = Arc::new(DispatchService::new(
        config,
        Arc::new(MemoryStore::new()),
        routes,
        Arc::new(LogSink),
        Arc::new(SystemClock),
    )?);

    match cli.command {
        Commands::Bootstrap => {
            print_json(&service.bootstrap_grid().await?)?;
        }
        Commands::Lookup { lat, lng } => {
            print_json(&service.cell_lookup(GeoPoint::new(lat, lng)).await?)?;
        }
        Commands::Report {
            category,
            lat,
            lng,
            units,
        } => {
            deploy_fleet(&service, units).await?;
            print_json(&service.report(&category, GeoPoint::new(lat, lng)).await?)?;
        }
        Commands::Simulate {
            count,
            category,
            seed,
            units,
        } => {
            deploy_fleet(&service, units).await?;
            let mut simulator = Simulator::new(service.clone(), seed);
            let report = simulator
                .run(Scenario::Surge {
                    category: IncidentCategory::normalize(&category),
                    count,
                    cell: None,
                })
                .await?;
            print_json(&report)?;
            print_json(&service.corridor_status())?;
        }
        Commands::Signals => {
            let board = SignalBoard::with_default_junctions(service.grid());
            print_json(&service.signal_states(&board))?;
        }
    }

    Ok(())
}

async fn deploy_fleet(
    service: &DispatchService,
    per_category: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if per_category == 0 {
        return Ok(());
    }
    for category in UnitCategory::all() {
        service
            .deploy_units(DeployRequest {
                category: *category,
                count: per_category,
                status: UnitStatus::Available,
                placement: Placement::RegionCenter,
            })
            .await?;
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
