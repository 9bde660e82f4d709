pub mod db;
pub mod events;
pub mod models;
pub mod notification;
pub mod sensor;
pub mod service;
pub mod settings;
pub mod tracker;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use db::Database;
use events::{BroadcastSubscriber, HistoryRecorder, LogSubscriber, SubscriberSet};
use models::EpochKey;
use notification::LogNotificationSink;
use sensor::ChannelSensor;
use service::{commands, StepPublisher};
use settings::SettingsStore;

const EVENT_BUFFER: usize = 64;

/// Everything the command surface needs, wired once at startup.
pub struct AppState {
    pub(crate) db: Database,
    pub(crate) publisher: StepPublisher<Database>,
    pub(crate) settings: SettingsStore,
    sensor: Arc<ChannelSensor>,
    events: Arc<BroadcastSubscriber>,
}

impl AppState {
    pub fn initialize(data_dir: PathBuf, verbose_notifications: bool) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let db = Database::new(data_dir.join("stepwatch.sqlite3"))?;
        let settings = SettingsStore::new(data_dir.join("settings.json"))?;

        let sensor = Arc::new(ChannelSensor::new());
        let events = Arc::new(BroadcastSubscriber::new(EVENT_BUFFER));

        let subscribers = SubscriberSet::new();
        subscribers.add(events.clone());
        subscribers.add(Arc::new(HistoryRecorder::new(db.clone())));
        subscribers.add(Arc::new(LogSubscriber));

        let publisher = StepPublisher::new(
            db.clone(),
            sensor.clone(),
            Arc::new(LogNotificationSink::new(verbose_notifications)),
            subscribers,
            settings.tracker(),
        );

        Ok(Self {
            db,
            publisher,
            settings,
            sensor,
            events,
        })
    }

    pub fn sensor(&self) -> &ChannelSensor {
        &self.sensor
    }

    pub fn events(&self) -> &BroadcastSubscriber {
        &self.events
    }
}

fn data_dir_from_env() -> PathBuf {
    std::env::var_os("STEPWATCH_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stepwatch-data"))
}

fn debug_from_env() -> bool {
    std::env::var("STEPWATCH_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Headless host: stdin lines are either raw counter values or commands.
pub fn run() -> Result<()> {
    let debug_mode = debug_from_env();

    // Reads RUST_LOG; STEPWATCH_DEBUG raises the floor to debug.
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Stepwatch starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let state = AppState::initialize(data_dir_from_env(), debug_mode)?;

        // Yesterday's baselines can never be restored again.
        let today = EpochKey::now(state.settings.tracker().day_boundary);
        match state.db.prune_baselines_before(&today).await {
            Ok(0) => {}
            Ok(removed) => info!("Pruned {removed} stale baselines"),
            Err(err) => warn!("Failed to prune stale baselines: {err:#}"),
        }

        spawn_event_printer(&state);

        if let Err(err) = commands::start_service(&state).await {
            warn!("Step service did not start: {err}");
        }

        host_loop(&state).await?;

        if let Err(err) = commands::stop_service(&state).await {
            error!("Failed to stop step service: {err}");
        }
        info!("Stepwatch shut down");
        Ok(())
    })
}

fn spawn_event_printer(state: &AppState) {
    let mut rx = state.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(err) => warn!("Failed to encode event: {err}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged by {skipped}"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn host_loop(state: &AppState) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Ok(value) = line.parse::<f32>() {
            if !state.sensor().push_value(value, Utc::now()) {
                warn!("Reading {value} dropped; service is not running");
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();

        let reply = match command {
            "start" => to_json(commands::start_service(state).await),
            "stop" => to_json(commands::stop_service(state).await),
            "steps" => to_json(commands::get_current_steps(state).await),
            "reset" => to_json(commands::reset_epoch(state).await),
            "state" => to_json(commands::get_service_state(state).await),
            "week" => to_json(commands::get_weekly_steps(state).await),
            "month" => {
                to_json(commands::get_monthly_total(state, argument.map(str::to_string)).await)
            }
            "goal" => match argument.and_then(|raw| raw.parse::<u64>().ok()) {
                Some(goal) => to_json(commands::set_daily_goal(state, goal).await),
                None => "usage: goal <steps>".to_string(),
            },
            "quit" | "exit" => break,
            other => format!("unknown command '{other}'"),
        };
        println!("{reply}");
    }

    Ok(())
}

fn to_json<T: serde::Serialize>(result: Result<T, String>) -> String {
    let value = match result {
        Ok(value) => serde_json::json!({ "ok": value }),
        Err(err) => serde_json::json!({ "error": err }),
    };
    value.to_string()
}
