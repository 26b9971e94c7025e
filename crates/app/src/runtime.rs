use audio::levels::SharedLevels;
use blob_core::analyzer::AudioFeatureSample;
use blob_core::engine::BlobEngine;
use blob_core::events::Event;
use blob_core::snapshot::FrameSnapshot;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::info;

/// Starts the frame task that owns the engine.
///
/// This task:
/// - Runs at the specified frequency (Hz).
/// - Drains every queued event before each frame, so asynchronous inputs
///   land in arrival order ahead of the frame that observes them.
/// - Reads the latest band levels and applies one `Event::Frame`.
/// - Sends the resulting snapshot to the state channel.
/// - Exits gracefully if the event channel closes.
pub async fn start_frame_task(
    mut event_rx: mpsc::Receiver<Event>,
    snapshot_tx: watch::Sender<FrameSnapshot>,
    mut engine: BlobEngine,
    levels: Arc<SharedLevels>,
    hz: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let interval_secs = 1.0 / hz.clamp(1.0, 240.0);
    let mut interval = interval(Duration::from_secs_f64(interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_time = Instant::now();
    info!(
        "Frame task started with frequency {:.2} Hz (interval {:.3}s)",
        hz, interval_secs
    );

    loop {
        interval.tick().await;

        loop {
            match event_rx.try_recv() {
                Ok(event) => engine.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Event channel closed, exiting frame task");
                    return Ok(());
                }
            }
        }

        let now = Instant::now();
        let dt_ms = now.duration_since(last_time).as_secs_f64() * 1000.0;
        last_time = now;

        let band = levels.get();
        let sample = AudioFeatureSample::new(
            band.amplitude as f64,
            band.bass as f64,
            band.mid as f64,
            band.treble as f64,
        );
        engine.apply(Event::Frame { dt_ms, sample });
        snapshot_tx.send(engine.snapshot())?;
    }
}
