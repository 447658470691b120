//! Recorder state machine states
//!
//! The five states of the recording lifecycle. Discriminants are fixed:
//! they are the first byte of every measurement record on the wire.

/// Lifecycle state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RecorderState {
    /// Resources are still being acquired.
    #[default]
    Uninitialized = 0,
    /// Capturing into the pre-roll window, waiting for the trigger.
    Waiting = 1,
    /// Sound detected; frames are draining into the encoder.
    Recording = 2,
    /// Recording, but silence has lasted half the grace period.
    RecordingSilence = 3,
    /// Terminal: the event loop exits and teardown runs.
    Stopping = 4,
}

impl RecorderState {
    /// The byte written into measurement records.
    pub fn wire_code(self) -> u8 {
        self as u8
    }

    /// Whether an encoder child is attached in this state.
    pub fn is_recording(self) -> bool {
        matches!(self, RecorderState::Recording | RecorderState::RecordingSilence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_fixed() {
        assert_eq!(RecorderState::Uninitialized.wire_code(), 0);
        assert_eq!(RecorderState::Waiting.wire_code(), 1);
        assert_eq!(RecorderState::Recording.wire_code(), 2);
        assert_eq!(RecorderState::RecordingSilence.wire_code(), 3);
        assert_eq!(RecorderState::Stopping.wire_code(), 4);
    }

    #[test]
    fn only_recording_states_have_an_encoder() {
        assert!(RecorderState::Recording.is_recording());
        assert!(RecorderState::RecordingSilence.is_recording());
        assert!(!RecorderState::Waiting.is_recording());
        assert!(!RecorderState::Stopping.is_recording());
    }
}
