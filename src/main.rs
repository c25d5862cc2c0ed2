mod config;
mod dashboard;
mod error;
mod firebase;
mod history;
mod mirror;
mod mqtt;
mod remote;
mod store;
mod ui;

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use config::{Config, RemoteConfig};
use dashboard::Dashboard;
use history::ActivityLog;
use mirror::RemoteStateMirror;
use remote::{Delivery, RemoteWriter};
use store::FileStore;

/// Delay before the startup entry is added to the activity log.
const GREETING_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let store = match FileStore::open(&config.dashboard.state_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "Cannot open state directory {}: {e}",
                config.dashboard.state_dir.display()
            );
            std::process::exit(1);
        }
    };

    // The terminal belongs to the dashboard, so diagnostics go to a file.
    let log_file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.dashboard.log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!(
                "Cannot open log file {}: {e}",
                config.dashboard.log_file.display()
            );
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .init();

    info!(
        "Starting led-dashboard (backend={}, key={}, state={})",
        config.remote.backend_name(),
        config.led_key,
        store.dir().display(),
    );

    if let Err(e) = run(config, store).await {
        error!("Dashboard terminated: {}", e);
        eprintln!("Dashboard terminated: {e}");
        std::process::exit(1);
    }
    info!("led-dashboard stopped");
}

async fn run(config: Config, store: FileStore) -> std::io::Result<()> {
    // Channels
    let (delivery_tx, mut delivery_rx) = mpsc::channel::<Delivery>(32);
    let (write_tx, mut write_rx) = mpsc::channel::<mirror::WriteResult>(32);

    // One subscription for the whole session, torn down on exit.
    let (writer, listener) = match &config.remote {
        RemoteConfig::Firebase(fb) => {
            let client = firebase::client::FirebaseClient::new(fb, &config.led_key);
            info!("Firebase endpoint: {}", client.key_url());
            let writer: Arc<dyn RemoteWriter> = Arc::new(client.clone());
            let handle = tokio::spawn(async move { client.run(delivery_tx).await });
            (writer, handle)
        }
        RemoteConfig::Mqtt(mqtt_config) => {
            let client = mqtt::client::MqttClient::new(mqtt_config, &config.led_key);
            let writer: Arc<dyn RemoteWriter> = Arc::new(client.writer());
            let handle = tokio::spawn(client.run(delivery_tx));
            (writer, handle)
        }
    };

    let mirror = RemoteStateMirror::new(writer, write_tx);
    let history = ActivityLog::restore(Box::new(store));
    let mut dashboard = Dashboard::new(
        mirror,
        history,
        config.dashboard.project.clone(),
        config.remote.backend_name(),
        config.led_key.clone(),
    );

    let mut terminal = ui::Terminal::new()?;
    let mut events = EventStream::new();

    let mut uptime = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    uptime.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let greeting = tokio::time::sleep(GREETING_DELAY);
    tokio::pin!(greeting);
    let mut greeted = false;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        terminal.draw(&dashboard)?;

        tokio::select! {
            Some(delivery) = delivery_rx.recv() => dashboard.handle_delivery(delivery),
            Some(done) = write_rx.recv() => dashboard.handle_write_result(done),
            _ = uptime.tick() => dashboard.tick(),
            _ = &mut greeting, if !greeted => {
                greeted = true;
                dashboard.greet();
            }
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(command) = ui::command_for_key(key, dashboard.alert().is_some()) {
                        if dashboard.handle_command(command).is_break() {
                            info!("Quit requested");
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!("Terminal input error: {}", e),
                None => {
                    warn!("Terminal input closed, shutting down");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    listener.abort();
    drop(terminal);
    Ok(())
}
