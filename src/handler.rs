//! Stream handler for a forked worker process.
//!
//! Owns the worker's three pipe handles and turns the two readable ones into
//! an ordered stream of [`BusMessage`]s plus a buffer of raw diagnostic
//! text. Flow:
//!
//! 1. `start()` reads exactly one frame from nominal stdout: the bootstrap
//!    record. The record declares which pipe actually carries the event
//!    protocol; if it names stderr, the two pipe roles are swapped, once.
//! 2. Two background tasks run for the worker's lifetime: the diagnostic
//!    collector drains the non-event pipe into [`DiagnosticBuffer`], and the
//!    event pump decodes frames and posts them on the bus in decode order.
//! 3. `stop()` joins both tasks. There is no timeout; a blocked read only
//!    unblocks when the worker's pipe closes, so callers wanting bounded
//!    shutdown must terminate the worker process.
//!
//! A worker that crashes before completing the handshake degrades the
//! handler to diagnostics-only collection: no events are ever published, but
//! the crash output stays retrievable through `diagnostic_text()`.
//!
//! Known limitation, carried over from the protocol: the bootstrap frame is
//! always read from nominal stdout, even when it declares stderr as the
//! event channel. A worker that writes every frame to stderr from byte zero
//! will fail (or hang) the handshake.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::EventCodec;
use crate::bridge::protocol::{BootstrapRecord, EventChannel, WorkerCommand, WorkerEvent};
use crate::bus::{BusMessage, EventBus, IdleSignal};
use crate::diagnostics::{DiagnosticBuffer, decode_diagnostics};

type ReadPipe = Box<dyn AsyncRead + Send + Unpin>;
type WritePipe = Box<dyn AsyncWrite + Send + Unpin>;
type EventReader = FramedRead<ReadPipe, EventCodec<WorkerEvent>>;
type CommandWriter = FramedWrite<WritePipe, EventCodec<WorkerCommand>>;

/// Cloneable handle for handing the worker new work on its stdin pipe.
///
/// Shared with bus subscribers through [`IdleSignal`]; the internal mutex
/// serializes concurrent sends, so at most one frame is in flight at a time.
#[derive(Clone)]
pub struct WorkerStdin {
    writer: Arc<Mutex<CommandWriter>>,
}

impl WorkerStdin {
    fn new(pipe: WritePipe) -> Self {
        Self {
            writer: Arc::new(Mutex::new(FramedWrite::new(pipe, EventCodec::new()))),
        }
    }

    pub async fn send(&self, command: WorkerCommand) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(command).await
    }
}

impl std::fmt::Debug for WorkerStdin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStdin").finish_non_exhaustive()
    }
}

/// Lifecycle of a handler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Negotiating,
    /// Handshake succeeded; collector and pump are live.
    Running,
    /// Handshake failed; only diagnostics are collected and no events will
    /// ever be published for this worker.
    Degraded,
    Stopped,
}

/// Supervises one forked worker's pipes for the worker's whole lifetime.
pub struct WorkerStreamHandler {
    bus: Arc<EventBus>,
    stdout: Option<ReadPipe>,
    stderr: Option<ReadPipe>,
    stdin: Option<WorkerStdin>,
    bootstrap: Option<BootstrapRecord>,
    diagnostics: DiagnosticBuffer,
    pumps: Vec<(&'static str, JoinHandle<()>)>,
    state: HandlerState,
}

impl WorkerStreamHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            stdout: None,
            stderr: None,
            stdin: None,
            bootstrap: None,
            diagnostics: DiagnosticBuffer::new(),
            pumps: Vec::new(),
            state: HandlerState::Created,
        }
    }

    /// Attach the worker's stdout pipe (nominal carrier of the handshake).
    pub fn attach_output_pipe(&mut self, pipe: impl AsyncRead + Send + Unpin + 'static) {
        self.stdout = Some(Box::new(pipe));
    }

    /// Attach the worker's stderr pipe.
    pub fn attach_error_pipe(&mut self, pipe: impl AsyncRead + Send + Unpin + 'static) {
        self.stderr = Some(Box::new(pipe));
    }

    /// Attach the worker's stdin pipe, used to reply to idle workers.
    pub fn attach_input_pipe(&mut self, pipe: impl AsyncWrite + Send + Unpin + 'static) {
        self.stdin = Some(WorkerStdin::new(Box::new(pipe)));
    }

    /// Adopt all three captured pipes of a spawned worker.
    ///
    /// Pipes the child was spawned without are logged and left unattached;
    /// `start()` then degrades to diagnostics-only collection.
    pub fn attach_worker(&mut self, child: &mut tokio::process::Child) {
        match child.stdout.take() {
            Some(pipe) => self.attach_output_pipe(pipe),
            None => tracing::error!("worker stdout was not captured"),
        }
        match child.stderr.take() {
            Some(pipe) => self.attach_error_pipe(pipe),
            None => tracing::error!("worker stderr was not captured"),
        }
        match child.stdin.take() {
            Some(pipe) => self.attach_input_pipe(pipe),
            None => tracing::error!("worker stdin was not captured"),
        }
    }

    /// Perform the handshake and launch the background pump tasks.
    ///
    /// Never fails: every handshake problem is logged and degrades the
    /// handler instead of propagating. A misbehaving worker must not be able
    /// to abort the parent's supervision loop.
    pub async fn start(&mut self) {
        self.state = HandlerState::Negotiating;

        let (stdout, stderr, stdin) = match (
            self.stdout.take(),
            self.stderr.take(),
            self.stdin.clone(),
        ) {
            (Some(stdout), Some(stderr), Some(stdin)) => (stdout, stderr, stdin),
            (_, stderr, _) => {
                tracing::error!("worker pipes not fully attached; collecting diagnostics only");
                self.stderr = stderr;
                self.enter_degraded();
                return;
            }
        };

        let mut reader: EventReader = FramedRead::new(stdout, EventCodec::new());

        match reader.next().await {
            Some(Ok(WorkerEvent::Bootstrap(record))) => {
                tracing::debug!(
                    channel = ?record.event_channel,
                    charset = %record.charset,
                    "worker handshake complete"
                );

                // Subscribers may need the record before any other event.
                if let Err(e) = self.bus.post(&BusMessage::Bootstrap(record.clone())) {
                    tracing::warn!(error = %e, "bus dispatch failed for bootstrap record");
                }

                let (events, diagnostic_pipe) = match record.event_channel {
                    EventChannel::UsesStdout => (reader, stderr),
                    EventChannel::UsesStderr => {
                        // The event stream continues on what was attached as
                        // stderr; the handshake pipe becomes the diagnostic
                        // pipe. Bytes the framed reader already buffered past
                        // the bootstrap frame belong to the diagnostic pipe.
                        let parts = reader.into_parts();
                        self.diagnostics.append(&parts.read_buf);
                        (FramedRead::new(stderr, EventCodec::new()), parts.io)
                    }
                };

                self.bootstrap = Some(record);
                self.spawn_collector(diagnostic_pipe);
                self.spawn_pump(events, stdin);
                self.state = HandlerState::Running;
            }
            Some(Ok(other)) => {
                tracing::warn!(
                    event = ?other,
                    "worker sent an unexpected first event instead of the bootstrap record"
                );
                self.stderr = Some(stderr);
                self.enter_degraded();
            }
            Some(Err(e)) => {
                tracing::warn!(
                    error = ?e,
                    "couldn't establish event communication with the worker"
                );
                self.stderr = Some(stderr);
                self.enter_degraded();
            }
            None => {
                tracing::warn!("worker closed its output before sending the bootstrap record");
                self.stderr = Some(stderr);
                self.enter_degraded();
            }
        }
    }

    /// Wait for every launched pump task to finish.
    ///
    /// Panics inside a task surface here through the join and are logged with
    /// the task's identity; they never crash the caller.
    pub async fn stop(&mut self) {
        for (name, pump) in self.pumps.drain(..) {
            if let Err(e) = pump.await {
                tracing::error!(task = name, error = %e, "pump task aborted abnormally");
            }
        }
        self.state = HandlerState::Stopped;
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// The handshake record, if one was ever received.
    pub fn bootstrap(&self) -> Option<&BootstrapRecord> {
        self.bootstrap.as_ref()
    }

    pub fn has_diagnostic_output(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Decode everything collected from the diagnostic pipe so far.
    ///
    /// Uses the charset the worker declared during the handshake when it is
    /// a recognized encoding; otherwise falls back to 7-bit US-ASCII, so a
    /// string is producible even when the handshake never completed.
    pub fn diagnostic_text(&self) -> String {
        let charset = self.bootstrap.as_ref().map(|b| b.charset.as_str());
        decode_diagnostics(&self.diagnostics.snapshot(), charset)
    }

    fn enter_degraded(&mut self) {
        if let Some(stderr) = self.stderr.take() {
            self.spawn_collector(stderr);
        }
        self.state = HandlerState::Degraded;
    }

    fn spawn_collector(&mut self, pipe: ReadPipe) {
        let buffer = self.diagnostics.clone();
        self.pumps.push((
            "pump-diagnostics",
            tokio::spawn(async move { collect_diagnostics(pipe, buffer).await }),
        ));
    }

    fn spawn_pump(&mut self, events: EventReader, stdin: WorkerStdin) {
        let bus = Arc::clone(&self.bus);
        self.pumps.push((
            "pump-events",
            tokio::spawn(async move { pump_events(events, bus, stdin).await }),
        ));
    }
}

/// Drain the diagnostic pipe into the buffer until the pipe closes.
///
/// Read failures end the loop without propagating anywhere; the buffer
/// simply stops growing.
async fn collect_diagnostics(mut pipe: ReadPipe, buffer: DiagnosticBuffer) {
    let mut chunk = [0u8; 8 * 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("diagnostic pipe closed");
                break;
            }
            Ok(n) => buffer.append(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "diagnostic pipe read failed");
                break;
            }
        }
    }
}

/// Decode events from the event pipe and publish them until the pipe closes.
///
/// Idle events are replaced by an [`IdleSignal`] carrying the stdin handle;
/// everything else is forwarded unchanged. Dispatch failures are logged
/// per-event and never stop the stream.
async fn pump_events(mut events: EventReader, bus: Arc<EventBus>, stdin: WorkerStdin) {
    loop {
        let message = match events.next().await {
            Some(Ok(WorkerEvent::Idle)) => BusMessage::Idle(IdleSignal {
                stdin: stdin.clone(),
            }),
            Some(Ok(event)) => BusMessage::Event(event),
            Some(Err(e)) => {
                tracing::warn!(error = ?e, "event stream read failed");
                break;
            }
            None => {
                tracing::debug!("event stream closed");
                break;
            }
        };

        if let Err(e) = bus.post(&message) {
            tracing::warn!(error = %e, "bus dispatch failed; continuing the event stream");
        }
    }
}
