mod api;
mod runtime;

use crate::runtime::start_frame_task;
use audio::capture::{CaptureEngine, CaptureEvent, CaptureFailure};
use audio::levels::SharedLevels;
use audio::tempo::TempoReport;
use axum::serve;
use blob_core::config::EngineConfig;
use blob_core::engine::BlobEngine;
use blob_core::error::{DetectorError, InputError};
use blob_core::events::Event;
use blob_core::gravity::Viewport;
use blob_core::tempo::TempoEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Config {
    frame_hz: f64,
    port: u16,
    viewport_width: f64,
    viewport_height: f64,
    seed: u64,
    engine_config_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_hz: 60.0,
            port: 3000,
            viewport_width: 1280.0,
            viewport_height: 720.0,
            seed: 0,
            engine_config_path: None,
        }
    }
}

impl Config {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            frame_hz: env_or("FRAME_HZ", defaults.frame_hz),
            port: env_or("PORT", defaults.port),
            viewport_width: env_or("VIEWPORT_WIDTH", defaults.viewport_width),
            viewport_height: env_or("VIEWPORT_HEIGHT", defaults.viewport_height),
            seed: env_or("BLOB_SEED", defaults.seed),
            engine_config_path: std::env::var("BLOB_CONFIG").ok(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

/// Reads a JSON engine config; missing fields keep their defaults.
fn load_engine_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&text)?;
    config.validate()?;
    info!("Loaded engine config from {}", path);
    Ok(config)
}

fn input_error(err: &anyhow::Error) -> InputError {
    match err.downcast_ref::<CaptureFailure>() {
        Some(failure) => failure_input_error(failure),
        None => InputError::Stream(err.to_string()),
    }
}

fn failure_input_error(failure: &CaptureFailure) -> InputError {
    match failure {
        CaptureFailure::NoDevice => InputError::Unavailable,
        CaptureFailure::PermissionDenied(_) => InputError::PermissionDenied,
        CaptureFailure::Stream(message) => InputError::Stream(message.clone()),
    }
}

/// Translates a capture report into the engine event it stands for.
fn capture_event(event: CaptureEvent) -> Event {
    match event {
        CaptureEvent::Tempo(report) => Event::Tempo(tempo_event(report)),
        CaptureEvent::StreamFailed(failure) => Event::InputFailed(failure_input_error(&failure)),
        CaptureEvent::AnalysisStopped(message) => {
            Event::DetectorFailed(DetectorError::Runtime(message))
        }
    }
}

fn tempo_event(report: TempoReport) -> TempoEvent {
    match report {
        TempoReport::Candidate {
            tempo,
            support_count,
        } => TempoEvent::Candidate {
            tempo: tempo as f64,
            support_count,
        },
        TempoReport::Stable { tempo } => TempoEvent::Stable {
            tempo: tempo as f64,
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup tracing with timestamped logs
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("Starting...");

    let config = Config::from_env();
    let engine_config = match load_engine_config(config.engine_config_path.as_deref()) {
        Ok(engine_config) => engine_config,
        Err(e) => {
            warn!("Engine config could not be loaded ({}), using defaults", e);
            EngineConfig::default()
        }
    };
    let viewport = Viewport::new(config.viewport_width, config.viewport_height);
    let engine = BlobEngine::new(engine_config, viewport, config.seed)?;

    // Create channels
    let (event_tx, event_rx) = mpsc::channel(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
    let levels = Arc::new(SharedLevels::default());

    // Start audio capture early (with error handling)
    let capture_tx = event_tx.clone();
    let capture_result = CaptureEngine::start(Arc::clone(&levels), move |event| {
        if capture_tx.try_send(capture_event(event)).is_err() {
            debug!("Dropped capture event: event channel full or closed");
        }
    });
    let _capture = match capture_result {
        Ok(capture) => {
            info!("Audio capture started at {} Hz", capture.sample_rate());
            Some(capture)
        }
        Err(e) => {
            warn!(
                "Audio capture failed to start ({}), continuing on neutral input",
                e
            );
            event_tx.send(Event::InputFailed(input_error(&e))).await?;
            None
        }
    };

    info!("Frame rate: {:.0} Hz", config.frame_hz);
    tokio::spawn(start_frame_task(
        event_rx,
        snapshot_tx,
        engine,
        Arc::clone(&levels),
        config.frame_hz,
    ));

    // State logger task: log snapshot every 1 second
    let snapshot_rx_clone = snapshot_rx.clone();
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let borrowed = snapshot_rx_clone.borrow();
            let analyzer = borrowed.analyzer();
            info!(
                "State: intensity={:.3}, inertia={:.3}, tempo={:.1}, confidence={:.2}, alive={}, visible={}",
                analyzer.intensity,
                analyzer.inertia_intensity,
                analyzer.tempo,
                analyzer.tempo_confidence,
                borrowed.alive(),
                borrowed.visible()
            );
        }
    });

    // Start API server
    // Create shared snapshot for API handlers
    let initial_snapshot = snapshot_rx.borrow().clone();
    let current_snapshot = Arc::new(RwLock::new(initial_snapshot));

    // Start snapshot task to keep API snapshot updated
    tokio::spawn(api::start_snapshot_task(
        snapshot_rx.clone(),
        Arc::clone(&current_snapshot),
    ));

    let app = api::create_router(event_tx, current_snapshot, snapshot_rx);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("API server listening on http://localhost:{}", config.port);
    tokio::spawn(async move {
        if let Err(e) = serve(listener, app).await {
            warn!("API server stopped: {}", e);
        }
    });

    // Keep the main task alive
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_engine_config_uses_defaults() {
        assert_eq!(load_engine_config(None).unwrap(), EngineConfig::default());
        assert!(load_engine_config(Some("/nonexistent/blob.json")).is_err());
    }

    #[test]
    fn test_capture_failure_maps_to_input_error() {
        let err = anyhow::Error::new(CaptureFailure::NoDevice);
        assert_eq!(input_error(&err), InputError::Unavailable);
        let err = anyhow::Error::new(CaptureFailure::PermissionDenied("denied".to_string()));
        assert_eq!(input_error(&err), InputError::PermissionDenied);
        let err = anyhow::anyhow!("host exploded");
        assert_eq!(input_error(&err), InputError::Stream("host exploded".to_string()));
    }

    #[test]
    fn test_tempo_report_conversion() {
        assert_eq!(
            tempo_event(TempoReport::Stable { tempo: 120.0 }),
            TempoEvent::Stable { tempo: 120.0 }
        );
    }

    #[test]
    fn test_capture_events_map_to_engine_events() {
        assert_eq!(
            capture_event(CaptureEvent::Tempo(TempoReport::Candidate {
                tempo: 124.0,
                support_count: 12
            })),
            Event::Tempo(TempoEvent::Candidate {
                tempo: 124.0,
                support_count: 12
            })
        );
        assert_eq!(
            capture_event(CaptureEvent::StreamFailed(CaptureFailure::NoDevice)),
            Event::InputFailed(InputError::Unavailable)
        );
        assert_eq!(
            capture_event(CaptureEvent::StreamFailed(CaptureFailure::Stream(
                "device unplugged".to_string()
            ))),
            Event::InputFailed(InputError::Stream("device unplugged".to_string()))
        );
        assert_eq!(
            capture_event(CaptureEvent::AnalysisStopped("fft exploded".to_string())),
            Event::DetectorFailed(DetectorError::Runtime("fft exploded".to_string()))
        );
    }
}
