//! Build/deploy log multiplexing.
//!
//! Each writer fans a line out twice: synchronously to the local stream so
//! the scheduler sees it immediately, and asynchronously to the event bus
//! through a bounded queue. A full queue drops bus lines rather than stall
//! the build. The current phase is a lock-protected assignment that takes
//! effect on subsequent writes.

use super::events::{EventBus, LogLineEvent};
use std::io::Write as _;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// Fan-out hub. One per job; hands out writers for stdout and stderr.
pub struct LogMultiplexer {
    phase: Arc<Mutex<String>>,
    sender: Mutex<Option<mpsc::Sender<LogLineEvent>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    deployment_id: String,
}

impl LogMultiplexer {
    pub fn new(bus: Option<Arc<dyn EventBus>>, deployment_id: impl Into<String>) -> Self {
        let deployment_id = deployment_id.into();
        let (sender, forwarder) = match bus {
            Some(bus) => {
                let (tx, mut rx) = mpsc::channel::<LogLineEvent>(QUEUE_CAPACITY);
                let handle = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Err(e) = bus.publish_log_line(event).await {
                            debug!(error = %e, "Dropped log line on bus publish failure");
                        }
                    }
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        Self {
            phase: Arc::new(Mutex::new(String::new())),
            sender: Mutex::new(sender),
            forwarder: Mutex::new(forwarder),
            deployment_id,
        }
    }

    /// Change the phase tag applied to subsequent writes.
    pub fn set_phase(&self, phase: &str) {
        *self.phase.lock().unwrap() = phase.to_string();
    }

    pub fn writer(&self, stream: LogStream) -> PhaseWriter {
        PhaseWriter {
            phase: Arc::clone(&self.phase),
            stream,
            sender: self.sender.lock().unwrap().clone(),
            deployment_id: self.deployment_id.clone(),
            buffer: Vec::new(),
        }
    }

    /// Close the queue and wait for buffered lines to reach the bus.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().unwrap().take());
        let handle = self.forwarder.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// `io::Write` adapter handed to plugin subprocesses.
pub struct PhaseWriter {
    phase: Arc<Mutex<String>>,
    stream: LogStream,
    sender: Option<mpsc::Sender<LogLineEvent>>,
    deployment_id: String,
    buffer: Vec<u8>,
}

impl PhaseWriter {
    fn emit_line(&self, line: &str) {
        // Local output first, synchronously.
        match self.stream {
            LogStream::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{}", line);
            }
            LogStream::Stderr => {
                let mut err = std::io::stderr().lock();
                let _ = writeln!(err, "{}", line);
            }
        }

        // Then the bus, without blocking; a full queue loses the line.
        if let Some(sender) = &self.sender {
            let event = LogLineEvent {
                deployment_id: self.deployment_id.clone(),
                phase: self.phase.lock().unwrap().clone(),
                stream: self.stream.as_str().to_string(),
                line: line.to_string(),
            };
            let _ = sender.try_send(event);
        }
    }
}

impl std::io::Write for PhaseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
            self.emit_line(&text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let line: Vec<u8> = std::mem::take(&mut self.buffer);
            let text = String::from_utf8_lossy(&line).to_string();
            self.emit_line(&text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::events::testing::RecordingBus;
    use std::io::Write;

    #[tokio::test]
    async fn test_lines_reach_the_bus_with_phase_tags() {
        let bus = Arc::new(RecordingBus::default());
        let mux = LogMultiplexer::new(Some(bus.clone()), "d-1");

        mux.set_phase("clone");
        let mut writer = mux.writer(LogStream::Stdout);
        writer.write_all(b"cloning repository\n").unwrap();

        mux.set_phase("build");
        writer.write_all(b"step 1/4\nstep 2/4\n").unwrap();

        drop(writer);
        mux.shutdown().await;

        assert_eq!(
            bus.topics(),
            vec![
                "log:clone:cloning repository",
                "log:build:step 1/4",
                "log:build:step 2/4"
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_lines_are_buffered_until_newline() {
        let bus = Arc::new(RecordingBus::default());
        let mux = LogMultiplexer::new(Some(bus.clone()), "d-1");
        mux.set_phase("build");

        let mut writer = mux.writer(LogStream::Stderr);
        writer.write_all(b"downloading").unwrap();
        writer.write_all(b" layers...\n").unwrap();
        writer.flush().unwrap();

        drop(writer);
        mux.shutdown().await;
        assert_eq!(bus.topics(), vec!["log:build:downloading layers..."]);
    }

    #[tokio::test]
    async fn test_without_bus_writes_do_not_fail() {
        let mux = LogMultiplexer::new(None, "d-1");
        let mut writer = mux.writer(LogStream::Stdout);
        writer.write_all(b"local only\n").unwrap();
        drop(writer);
        mux.shutdown().await;
    }
}
