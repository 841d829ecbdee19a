//! forklink: event-stream supervision for forked test workers.
//!
//! A parent test runner forks worker processes and learns everything about a
//! worker through its two readable OS pipes. [`WorkerStreamHandler`]
//! negotiates which pipe carries the framed event protocol, pumps decoded
//! events onto an in-process [`EventBus`] in decode order, and buffers the
//! other pipe's raw output for post-mortem inspection.

pub mod bridge;
pub mod bus;
pub mod diagnostics;
pub mod handler;

pub use bridge::codec::EventCodec;
pub use bridge::protocol::{
    BootstrapRecord, EventChannel, OutputSource, TestStatus, WorkerCommand, WorkerEvent,
};
pub use bus::{BusMessage, DispatchError, EventBus, IdleSignal, Subscriber};
pub use diagnostics::DiagnosticBuffer;
pub use handler::{HandlerState, WorkerStdin, WorkerStreamHandler};
