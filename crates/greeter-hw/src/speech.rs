//! Spoken announcements through an external speech synthesiser.
//!
//! At most one utterance is in flight. Speaking again kills the previous
//! synthesiser process before starting the next one.

use std::process::{Child, Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("failed to start speech synthesiser {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// Text-to-speech output.
pub trait Speaker: Send {
    /// Start speaking `text`, cancelling anything already being spoken.
    fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
    /// Stop the current utterance, if any.
    fn cancel(&mut self);
    /// Whether an utterance is still playing.
    fn is_speaking(&mut self) -> bool;
}

/// Speaker backed by a command-line synthesiser such as `espeak-ng` or `spd-say`.
///
/// The utterance text is passed as the final argument.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
        }
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        self.cancel();

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tracing::debug!(program = %self.program, pid = child.id(), "speaking");
        self.child = Some(child);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                tracing::debug!(pid = child.id(), "cancelling utterance");
                let _ = child.kill();
            }
            // Reap so the process does not linger as a zombie.
            let _ = child.wait();
        }
    }

    fn is_speaking(&mut self) -> bool {
        let Some(child) = &mut self.child else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    tracing::warn!(%status, program = %self.program, "speech synthesiser exited with failure");
                }
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll speech synthesiser");
                self.child = None;
                false
            }
        }
    }
}

impl Drop for CommandSpeaker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Speaker that only logs. Used when speech output is disabled.
#[derive(Debug, Default)]
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        tracing::info!(text, "speech disabled; skipping utterance");
        Ok(())
    }

    fn cancel(&mut self) {}

    fn is_speaking(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let mut speaker = CommandSpeaker::new("greeter-test-no-such-synth", vec![]);
        let err = speaker.speak("hello").unwrap_err();
        assert!(matches!(err, SpeechError::Spawn { .. }));
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn test_cancel_kills_in_flight_process() {
        // `sleep` stands in for a long utterance; the text argument is the duration.
        let mut speaker = CommandSpeaker::new("sleep", vec![]);
        speaker.speak("30").unwrap();
        assert!(speaker.is_speaking());
        speaker.cancel();
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn test_finished_process_is_not_speaking() {
        let mut speaker = CommandSpeaker::new("true", vec![]);
        speaker.speak("ignored").unwrap();
        if let Some(child) = speaker.child.as_mut() {
            child.wait().unwrap();
        }
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn test_silent_speaker() {
        let mut speaker = SilentSpeaker;
        speaker.speak("hello").unwrap();
        assert!(!speaker.is_speaking());
    }
}
