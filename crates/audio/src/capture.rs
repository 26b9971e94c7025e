use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{FFT_SIZE, FeatureExtractor};
use crate::levels::{BandLevels, SharedLevels};
use crate::tempo::{OnsetTempoDetector, TempoReport};

/// How often the analysis thread measures the latest window.
const ANALYSIS_INTERVAL: Duration = Duration::from_millis(20);

/// Mono samples retained for analysis.
const BUFFER_CAPACITY: usize = FFT_SIZE * 4;

/// Why capture could not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureFailure {
    #[error("no default input device")]
    NoDevice,

    #[error("input permission denied: {0}")]
    PermissionDenied(String),

    #[error("input stream failed: {0}")]
    Stream(String),
}

impl CaptureFailure {
    /// Sorts a backend error message into a failure kind.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("permission")
            || lower.contains("denied")
            || lower.contains("not authorized")
        {
            Self::PermissionDenied(message)
        } else if lower.contains("available") || lower.contains("no device") {
            Self::NoDevice
        } else {
            Self::Stream(message)
        }
    }
}

/// What a running capture reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Tempo(TempoReport),
    /// The stream failed mid-session. Levels read as silence from now on.
    StreamFailed(CaptureFailure),
    /// The analysis thread panicked. No further tempo reports will follow.
    AnalysisStopped(String),
}

type Reporter = Arc<dyn Fn(CaptureEvent) + Send + Sync>;

/// Latches the first stream failure and silences the shared levels.
struct StreamHealth {
    failed: AtomicBool,
    levels: Arc<SharedLevels>,
    report: Reporter,
}

impl StreamHealth {
    fn new(levels: Arc<SharedLevels>, report: Reporter) -> Self {
        Self {
            failed: AtomicBool::new(false),
            levels,
            report,
        }
    }

    /// Backends may call this repeatedly; only the first failure is reported.
    fn fail(&self, failure: CaptureFailure) {
        self.levels.set(BandLevels::default());
        if !self.failed.swap(true, Ordering::AcqRel) {
            warn!("Input stream failed: {}", failure);
            (self.report)(CaptureEvent::StreamFailed(failure));
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Captures the default input device and keeps `SharedLevels` current.
pub struct CaptureEngine {
    _stream: Stream, // Keep stream alive
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureEngine {
    /// Starts capture and the analysis thread.
    ///
    /// `on_event` receives tempo reports from the analysis thread and
    /// failures from whichever thread notices them.
    pub fn start<F>(shared_levels: Arc<SharedLevels>, on_event: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(CaptureEvent) + Send + Sync + 'static,
    {
        let report: Reporter = Arc::new(on_event);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureFailure::NoDevice)?;

        // Select a config with f32 sample format
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| CaptureFailure::classify(e.to_string()))?
            .find(|config| config.sample_format() == SampleFormat::F32)
            .ok_or_else(|| CaptureFailure::Stream("no f32 input config found".to_string()))?;
        let config = supported_config.with_max_sample_rate().config();

        let sample_rate = config.sample_rate as u32;
        let channels = config.channels.max(1) as usize;

        info!(
            "Selected input device: {}, config: {} Hz, {} channels",
            device.description()?,
            sample_rate,
            channels
        );

        let buffer = Arc::new(Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)));
        let buffer_for_stream = Arc::clone(&buffer);
        let health = Arc::new(StreamHealth::new(
            Arc::clone(&shared_levels),
            Arc::clone(&report),
        ));
        let health_for_stream = Arc::clone(&health);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buffer) = buffer_for_stream.lock() {
                        mix_to_mono(data, channels, &mut buffer, BUFFER_CAPACITY);
                    }
                },
                move |err| health_for_stream.fail(CaptureFailure::classify(err.to_string())),
                None,
            )
            .map_err(|e| CaptureFailure::classify(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureFailure::classify(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let running_for_worker = Arc::clone(&running);
        let worker = std::thread::Builder::new()
            .name("audio-analysis".to_string())
            .spawn(move || {
                supervise(&shared_levels, &report, || {
                    let mut extractor = FeatureExtractor::new(sample_rate as f32);
                    let mut detector = OnsetTempoDetector::default();
                    let mut window = Vec::with_capacity(FFT_SIZE);
                    let mut silenced = false;
                    let started = Instant::now();

                    while running_for_worker.load(Ordering::Relaxed) {
                        std::thread::sleep(ANALYSIS_INTERVAL);
                        if health.is_failed() {
                            // The buffer holds stale audio once the stream is gone.
                            if !silenced {
                                detector.reset();
                                silenced = true;
                            }
                            shared_levels.set(BandLevels::default());
                            continue;
                        }

                        window.clear();
                        if let Ok(buffer) = buffer.lock() {
                            let skip = buffer.len().saturating_sub(FFT_SIZE);
                            window.extend(buffer.iter().skip(skip).copied());
                        }

                        let levels = extractor.process(&window);
                        shared_levels.set(levels);
                        let now = started.elapsed().as_secs_f64();
                        for tempo in detector.process(levels.bass, now) {
                            report(CaptureEvent::Tempo(tempo));
                        }
                    }
                });
            })?;

        Ok(Self {
            _stream: stream,
            running,
            worker: Some(worker),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Runs the analysis body, turning a panic into silence plus an
/// `AnalysisStopped` report.
fn supervise(levels: &SharedLevels, report: &Reporter, body: impl FnOnce()) {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => info!("Audio analysis thread stopped"),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Audio analysis thread panicked: {}", message);
            levels.set(BandLevels::default());
            report(CaptureEvent::AnalysisStopped(message));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Averages interleaved frames into `out`, evicting the oldest samples past
/// `capacity`.
fn mix_to_mono(data: &[f32], channels: usize, out: &mut VecDeque<f32>, capacity: usize) {
    let channels = channels.max(1);
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().sum();
        out.push_back(sum / frame.len() as f32);
    }
    while out.len() > capacity {
        out.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_to_mono_averages_frames() {
        let mut out = VecDeque::new();
        mix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out, 16);
        assert_eq!(out, VecDeque::from(vec![0.5, 0.5, 0.0]));
    }

    #[test]
    fn test_mix_to_mono_evicts_oldest() {
        let mut out = VecDeque::new();
        let data: Vec<f32> = (0..10).map(|i| i as f32).collect();
        mix_to_mono(&data, 1, &mut out, 4);
        assert_eq!(out, VecDeque::from(vec![6.0, 7.0, 8.0, 9.0]));
    }

    fn recorder() -> (Reporter, Arc<Mutex<Vec<CaptureEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let report: Reporter =
            Arc::new(move |event: CaptureEvent| sink.lock().unwrap().push(event));
        (report, events)
    }

    fn loud() -> BandLevels {
        BandLevels {
            amplitude: 0.8,
            bass: 0.7,
            mid: 0.5,
            treble: 0.3,
        }
    }

    #[test]
    fn test_stream_failure_silences_levels_and_reports_once() {
        let levels = Arc::new(SharedLevels::new(loud()));
        let (report, events) = recorder();
        let health = StreamHealth::new(Arc::clone(&levels), report);
        assert!(!health.is_failed());

        let failure = CaptureFailure::classify("The requested device is no longer available");
        health.fail(failure.clone());
        health.fail(CaptureFailure::Stream("buffer overrun".to_string()));

        assert!(health.is_failed());
        assert_eq!(levels.get(), BandLevels::default());
        assert_eq!(*events.lock().unwrap(), vec![CaptureEvent::StreamFailed(failure)]);
    }

    #[test]
    fn test_supervise_reports_analysis_panic() {
        let levels = SharedLevels::new(loud());
        let (report, events) = recorder();
        supervise(&levels, &report, || panic!("fft exploded"));

        assert_eq!(levels.get(), BandLevels::default());
        assert_eq!(
            *events.lock().unwrap(),
            vec![CaptureEvent::AnalysisStopped("fft exploded".to_string())]
        );
    }

    #[test]
    fn test_supervise_is_quiet_on_clean_exit() {
        let levels = SharedLevels::new(loud());
        let (report, events) = recorder();
        supervise(&levels, &report, || {});

        assert_eq!(levels.get(), loud());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panic_message_formats() {
        let payload = panic::catch_unwind(|| panic!("{} failed", "window")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "window failed");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_classify_failures() {
        assert!(matches!(
            CaptureFailure::classify("Permission denied by the user"),
            CaptureFailure::PermissionDenied(_)
        ));
        assert_eq!(
            CaptureFailure::classify("The requested device is no longer available"),
            CaptureFailure::NoDevice
        );
        assert!(matches!(
            CaptureFailure::classify("buffer overrun"),
            CaptureFailure::Stream(_)
        ));
    }
}
