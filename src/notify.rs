//! Audible and haptic notification sinks.
//!
//! Cues are fire-and-forget. `QueuedSink` puts any sink behind a channel and a
//! worker thread so the detection cycle never waits on speech; utterances are
//! played in the order they were queued.

use anyhow::{anyhow, Context, Result};
use std::process::Command;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::direction::Zone;

/// Haptic pulse used to acknowledge allow-list changes.
pub const CONFIRM_VIBRATION: Duration = Duration::from_millis(200);

pub trait NotificationSink: Send + Sync {
    fn speak(&self, text: &str);
    fn vibrate(&self, duration: Duration);
}

/// Spoken text for a detection: label followed by its zone.
pub fn cue_text(label: &str, zone: Zone) -> String {
    format!("{} {}", label, zone)
}

/// Writes cues to the log. Default sink when no speech command is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn speak(&self, text: &str) {
        log::info!("cue: {}", text);
    }

    fn vibrate(&self, duration: Duration) {
        log::info!("vibrate: {} ms", duration.as_millis());
    }
}

/// Speaks by running an external program (e.g. `espeak`) with the text as
/// its final argument.
#[derive(Clone, Debug)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// Parse a whitespace-separated command line such as `"espeak -s 160"`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("speech command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn run(&self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()
            .with_context(|| format!("failed to run speech command {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("speech command exited with {}", status));
        }
        Ok(())
    }
}

impl NotificationSink for CommandSink {
    fn speak(&self, text: &str) {
        if let Err(e) = self.run(text) {
            log::warn!("speech failed: {:#}", e);
        }
    }

    fn vibrate(&self, duration: Duration) {
        log::debug!("no haptics available; skipping {} ms vibration", duration.as_millis());
    }
}

enum Cue {
    Speak(String),
    Vibrate(Duration),
}

/// Non-blocking wrapper: cues are queued and played by a worker thread.
pub struct QueuedSink {
    tx: Option<Sender<Cue>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedSink {
    pub fn spawn<S: NotificationSink + 'static>(sink: S) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Cue>();
        let worker = std::thread::Builder::new()
            .name("cue-queue".to_string())
            .spawn(move || {
                for cue in rx {
                    match cue {
                        Cue::Speak(text) => sink.speak(&text),
                        Cue::Vibrate(duration) => sink.vibrate(duration),
                    }
                }
            })
            .context("failed to start cue queue")?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    fn enqueue(&self, cue: Cue) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.send(cue).is_err() {
            log::warn!("cue queue closed; dropping cue");
        }
    }

    /// Play everything already queued, then stop the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("cue queue thread panicked"))?;
        }
        Ok(())
    }
}

impl NotificationSink for QueuedSink {
    fn speak(&self, text: &str) {
        self.enqueue(Cue::Speak(text.to_string()));
    }

    fn vibrate(&self, duration: Duration) {
        self.enqueue(Cue::Vibrate(duration));
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{}", e);
        }
    }
}
