//! Spoken feedback capability.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

/// Speaks short prompts to the user. Implementations must not block.
pub trait SpeechFeedback: Send + Sync {
    fn speak(&self, message: &str);
    /// Cut off anything still being spoken.
    fn cancel(&self);
}

/// Discards all feedback.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

impl SpeechFeedback for SilentSpeech {
    fn speak(&self, _message: &str) {}
    fn cancel(&self) {}
}

/// Writes feedback to the log instead of a speaker.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSpeech;

impl SpeechFeedback for TracingSpeech {
    fn speak(&self, message: &str) {
        tracing::info!(message, "speech");
    }

    fn cancel(&self) {
        tracing::debug!("speech cancelled");
    }
}

/// Speaks through an external synthesizer such as `espeak-ng`.
///
/// A new prompt interrupts the previous one.
pub struct CommandSpeech {
    program: String,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            current: Mutex::new(None),
        }
    }

    fn kill_current(slot: &mut Option<Child>) {
        if let Some(mut child) = slot.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl SpeechFeedback for CommandSpeech {
    fn speak(&self, message: &str) {
        let Ok(mut slot) = self.current.lock() else {
            return;
        };
        Self::kill_current(&mut slot);
        match Command::new(&self.program)
            .arg(message)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => *slot = Some(child),
            Err(e) => {
                tracing::warn!(
                    program = %self.program,
                    error = %e,
                    "speech synthesizer unavailable"
                )
            }
        }
    }

    fn cancel(&self) {
        if let Ok(mut slot) = self.current.lock() {
            Self::kill_current(&mut slot);
        }
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.cancel();
    }
}
