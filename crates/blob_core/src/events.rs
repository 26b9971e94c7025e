//! Defines the inputs the engine reacts to.

use crate::analyzer::AudioFeatureSample;
use crate::error::{DetectorError, InputError};
use crate::tempo::TempoEvent;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Event {
    /// One render frame with the band levels measured for it.
    Frame {
        dt_ms: f64,
        sample: AudioFeatureSample,
    },
    /// A report from the tempo detector, applied on the next frame.
    Tempo(TempoEvent),
    Resize {
        width: f64,
        height: f64,
    },
    InputFailed(InputError),
    InputRestored,
    DetectorFailed(DetectorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_event_frame_serialization() {
        let event = Event::Frame {
            dt_ms: 16.7,
            sample: AudioFeatureSample::new(0.4, 0.6, 0.3, 0.1),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_event_tempo_from_json() {
        let json = r#"{"Tempo":{"Candidate":{"tempo":124.0,"support_count":42}}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Event::Tempo(TempoEvent::Candidate {
                tempo: 124.0,
                support_count: 42
            })
        );
    }

    #[test]
    fn test_event_resize_from_json() {
        let json = r#"{"Resize":{"width":800.0,"height":600.0}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Event::Resize {
                width: 800.0,
                height: 600.0
            }
        );
    }

    #[test]
    fn test_failure_events_serialization() {
        let events = vec![
            Event::InputFailed(InputError::PermissionDenied),
            Event::InputFailed(InputError::Stream("overrun".to_string())),
            Event::InputRestored,
            Event::DetectorFailed(DetectorError::Runtime("panicked".to_string())),
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let deserialized: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(event, deserialized);
        }
    }
}
