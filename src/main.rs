use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use plate_logger::location::LocationError;
use plate_logger::workflow::WorkflowError;
use plate_logger::{
    BackendHistory, CaptureOutcome, CaptureWorkflow, CommitOutcome, Config, Connectivity,
    ConnectivityProbe, DeviceLocation, FilePicker, FixedLocation, GeoLocation,
    HttpPlateRecognizer, HttpRecordStore, ImageSource, LocalHistoryStore, NoDeviceLocation,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[macro_use]
extern crate failure;

#[derive(Parser, Debug)]
#[command(name = "plate-logger")]
#[command(about = "Log license plates spotted in photos")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize the plate in a photo and save it to the backend
    Capture {
        image: PathBuf,
        /// Treat the photo as picked from the gallery instead of taken now
        #[arg(long)]
        gallery: bool,
        /// Replace the recognized plate before saving
        #[arg(long)]
        plate: Option<String>,
        /// Device position to use when the photo has no GPS metadata
        #[arg(long, requires = "longitude", allow_negative_numbers = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_negative_numbers = true)]
        longitude: Option<f64>,
        #[arg(long)]
        accuracy: Option<f64>,
        /// Stop after recognition and discard the result
        #[arg(long)]
        dry_run: bool,
    },
    /// List saved plates
    List,
    /// Search saved plates
    Search { query: String },
    /// Delete a saved plate
    Delete {
        id: i64,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Show plates recognized while offline
    History { query: Option<String> },
    /// Remove one offline entry
    HistoryRemove { id: String },
    /// Remove all offline entries
    HistoryClear {
        /// Confirm clearing the history
        #[arg(long)]
        yes: bool,
    },
    /// Check whether the backend is reachable
    Status,
}

/// Position given on the command line, if any.
struct CliLocation(Option<GeoLocation>);

impl DeviceLocation for CliLocation {
    async fn current_position(&self) -> Result<GeoLocation, LocationError> {
        match self.0 {
            Some(location) => FixedLocation(location).current_position().await,
            None => NoDeviceLocation.current_position().await,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), failure::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), failure::Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::from_env()?;
    info!("Using backend {}", config.backend_url);

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let store = HttpRecordStore::new(client.clone(), config.backend_url.clone());

    match args.command {
        Command::Capture {
            image,
            gallery,
            plate,
            latitude,
            longitude,
            accuracy,
            dry_run,
        } => {
            let device = match (latitude, longitude) {
                (Some(lat), Some(lon)) => {
                    let mut location = GeoLocation::new(lat, lon);
                    location.accuracy_meters = accuracy;
                    Some(location)
                }
                _ => None,
            };
            let source = if gallery {
                ImageSource::Gallery
            } else {
                ImageSource::Camera
            };
            capture(&config, client, store, image, source, device, plate, dry_run).await
        }
        Command::List => {
            let mut browser = BackendHistory::new(store);
            print_json(&browser.refresh().await?)
        }
        Command::Search { query } => print_json(&BackendHistory::new(store).search(&query).await?),
        Command::Delete { id, yes } => {
            let mut browser = BackendHistory::new(store);
            let pending = browser.request_delete(id);
            if !yes {
                return Err(format_err!(
                    "Refusing to delete record {} without --yes",
                    pending.id()
                ));
            }
            browser.confirm_delete(pending).await?;
            println!("Deleted record {}", id);
            Ok(())
        }
        Command::History { query } => {
            let history = LocalHistoryStore::open(&config.history_db)?;
            let entries = history.search(query.as_deref().unwrap_or("")).await?;
            print_json(&entries)
        }
        Command::HistoryRemove { id } => {
            let history = LocalHistoryStore::open(&config.history_db)?;
            if !history.remove(&id).await? {
                warn!("No history entry with id {}", id);
            }
            Ok(())
        }
        Command::HistoryClear { yes } => {
            if !yes {
                return Err(format_err!("Refusing to clear the history without --yes"));
            }
            LocalHistoryStore::open(&config.history_db)?.clear().await?;
            Ok(())
        }
        Command::Status => {
            let probe = ConnectivityProbe::new(
                client,
                config.backend_url.clone(),
                Connectivity::new(false),
            );
            let online = probe.probe_once().await;
            println!(
                "{} {}",
                config.backend_url,
                if online { "reachable" } else { "unreachable" }
            );
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn capture(
    config: &Config,
    client: reqwest::Client,
    store: HttpRecordStore,
    image: PathBuf,
    source: ImageSource,
    device: Option<GeoLocation>,
    plate: Option<String>,
    dry_run: bool,
) -> Result<(), failure::Error> {
    let connectivity = Connectivity::new(false);
    let probe = ConnectivityProbe::new(
        client.clone(),
        config.backend_url.clone(),
        connectivity.clone(),
    );
    probe.probe_once().await;
    let probe_task = tokio::spawn(probe.run(config.probe_interval));

    let recognizer = HttpPlateRecognizer::new(client, config.recognizer_url.clone())
        .with_token(config.recognizer_token.clone())
        .with_regions(config.recognizer_regions.clone());
    let history = Arc::new(LocalHistoryStore::open(&config.history_db)?);
    let workflow = CaptureWorkflow::new(
        recognizer,
        store,
        CliLocation(device),
        connectivity.clone(),
        Some(history),
    );

    let result = run_cycle(&workflow, image, source, plate, dry_run).await;
    probe_task.abort();
    if !connectivity.is_online() {
        warn!(
            "Backend was unreachable; the plate was kept in {}",
            config.history_db.display()
        );
    }
    result
}

async fn run_cycle(
    workflow: &CaptureWorkflow<HttpPlateRecognizer, HttpRecordStore, CliLocation>,
    image: PathBuf,
    source: ImageSource,
    plate: Option<String>,
    dry_run: bool,
) -> Result<(), failure::Error> {
    let picker = FilePicker::new(Some(image));
    let draft = match workflow.capture(&picker, source).await {
        Ok(CaptureOutcome::Review(draft)) => draft,
        Ok(outcome) => return Err(format_err!("No plate to review ({:?})", outcome)),
        Err(e) => {
            error!("{}", e);
            return Err(format_err!("{}", e.user_message()));
        }
    };
    println!(
        "Recognized {} ({:.0}%) at {}",
        draft.plate_text,
        draft.confidence * 100.0,
        match draft.location {
            Some(l) => format!("{:.5},{:.5}", l.latitude, l.longitude),
            None => "unknown position".to_string(),
        }
    );

    if let Some(plate) = plate {
        let edited = workflow.edit_plate(&plate).await?;
        println!("Plate changed to {}", edited.plate_text);
    }
    if dry_run {
        workflow.discard().await;
        return Ok(());
    }

    match workflow.commit().await {
        Ok(CommitOutcome::Saved(record)) => print_json(&record),
        Ok(outcome) => Err(format_err!("Plate was not saved ({:?})", outcome)),
        Err(e @ WorkflowError::Validation(_)) | Err(e @ WorkflowError::Offline) => {
            workflow.discard().await;
            Err(format_err!("{}", e.user_message()))
        }
        Err(e) => {
            error!("{}", e);
            workflow.discard().await;
            Err(format_err!("{}", e.user_message()))
        }
    }
}
