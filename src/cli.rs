//! CLI module for the telemetry client
//!
//! Every subcommand goes through the same cached access layer the
//! dashboards use, so repeated reads inside one process are coalesced.

use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tokio::time;
use tracing::info;

use crate::{
    aggregation::aggregate_in,
    configuration::{
        get_configuration, set_configuration, AppState, Config, State,
    },
    error::Error,
    handler::{
        dashboard::{self, DashboardSession},
        farmer,
    },
    model::{DashboardQuery, RangeSelector},
    ranges::{format_number, Metric},
};

/// Soil telemetry client
#[derive(Parser)]
#[command(name = "soil-telemetry")]
#[command(about = "Cached access to farmer soil telemetry", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a farmer profile and its devices
    Profile {
        farmer_id: u64,
    },

    /// Print the dashboard payload for one device and range
    Dashboard {
        farmer_id: u64,

        #[arg(long)]
        device: Option<String>,

        /// latest, 5m, 15m, 1h, 24h, 2d, 7d or 30d
        #[arg(long, default_value = "24h")]
        range: String,

        #[arg(long)]
        view: Option<String>,

        #[arg(long)]
        slot_range: Option<String>,

        /// Rebuild the slots locally from raw readings in the local timezone
        #[arg(long)]
        history: bool,
    },

    /// Export the full history as CSV
    Download {
        farmer_id: u64,

        #[arg(long)]
        device: Option<String>,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Mark the farmer's telemetry as viewed
    MarkViewed {
        farmer_id: u64,
    },

    /// Poll the latest readings and report out-of-range metrics
    Watch {
        farmer_id: u64,

        #[arg(long)]
        device: Option<String>,

        /// Seconds between polls
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<u64>,
    },
}

/// Initialize configuration and return Config
pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

pub async fn run(
    app_state: AppState<State>,
    command: Commands,
) -> Result<(), Error> {
    match command {
        Commands::Profile { farmer_id } => {
            run_profile(&app_state, farmer_id).await
        },
        Commands::Dashboard {
            farmer_id,
            device,
            range,
            view,
            slot_range,
            history,
        } => {
            let mut query = DashboardQuery::new(farmer_id, range.parse()?)
                .include_raw(history);
            if let Some(device) = device {
                query = query.device(device);
            }
            if let Some(view) = view {
                query = query.view(view);
            }
            if let Some(slot_range) = slot_range {
                query = query.slot_range(slot_range);
            }
            run_dashboard(&app_state, query, history).await
        },
        Commands::Download {
            farmer_id,
            device,
            output,
        } => run_download(&app_state, farmer_id, device, output).await,
        Commands::MarkViewed { farmer_id } => {
            farmer::mark_viewed(&app_state.http, farmer_id).await;
            Ok(())
        },
        Commands::Watch {
            farmer_id,
            device,
            interval,
            count,
        } => run_watch(&app_state, farmer_id, device, interval, count).await,
    }
}

async fn run_profile(
    app_state: &AppState<State>,
    farmer_id: u64,
) -> Result<(), Error> {
    let profile =
        farmer::get_profile(&app_state.api_cache, &app_state.http, farmer_id)
            .await?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn run_dashboard(
    app_state: &AppState<State>,
    query: DashboardQuery,
    history: bool,
) -> Result<(), Error> {
    let range = query.range;
    let mut payload =
        dashboard::get_dashboard(&app_state.api_cache, &app_state.http, query)
            .await?;

    if history {
        payload.slots = aggregate_in(&payload.raw, range, &chrono::Local);
        info!(
            "Rebuilt {} slots from {} readings",
            payload.slots.len(),
            payload.raw.len()
        );
    }

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_download(
    app_state: &AppState<State>,
    farmer_id: u64,
    device: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let data =
        farmer::download_csv(&app_state.http, farmer_id, device.as_deref())
            .await?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &data).await?;
            info!("Wrote {} bytes to {}", data.len(), path.display());
        },
        None => std::io::stdout().write_all(&data)?,
    }

    Ok(())
}

async fn run_watch(
    app_state: &AppState<State>,
    farmer_id: u64,
    device: Option<String>,
    interval: u64,
    count: Option<u64>,
) -> Result<(), Error> {
    let session = DashboardSession::new(
        app_state.api_cache.clone(),
        Arc::clone(&app_state.http),
        app_state.config.debounce,
    );
    let mut ticker = time::interval(Duration::from_secs(interval.max(1)));
    let mut polls = 0;

    loop {
        ticker.tick().await;

        let mut query = DashboardQuery::new(farmer_id, RangeSelector::Latest);
        if let Some(device) = &device {
            query = query.device(device.as_str());
        }

        let Some(payload) = session.select(query).await?.completed() else {
            continue;
        };

        match &payload.latest {
            Some(reading) => {
                for metric in Metric::ALL {
                    let value = reading.value(metric);
                    let range = metric.range();
                    match value {
                        Some(value) if !range.contains(value) => {
                            println!(
                                "{} {} {} out of range ({} to {})",
                                reading.timestamp,
                                metric,
                                format_number(value, range.unit),
                                range.min,
                                range.max
                            );
                        },
                        _ => {},
                    }
                }
            },
            None => info!("No readings yet for farmer {}", farmer_id),
        }

        polls += 1;
        if count.is_some_and(|count| polls >= count) {
            break;
        }
    }

    Ok(())
}
