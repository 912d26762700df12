// ── rscp-scp / scp module ─────────────────────────────────────────────────────
//
// SCP protocol client:
//   • `protocol` – frame reader/writer with bounded detail lines
//   • `sink`     – receiving state machine with a rooted destination cursor
//   • `source`   – sending engine with strict ack rendezvous
//   • `transport`– remote exec abstraction and command line building
//   • `progress` – per-file observers
//   • `service`  – orchestrator wiring endpoints, auth and engines

pub mod types;
pub mod protocol;
pub mod progress;
pub mod sink;
pub mod source;
pub mod transport;
pub mod service;

pub use types::*;
pub use progress::{LogProgress, NoProgress, ProgressObserver};
pub use sink::SinkEngine;
pub use source::SourceEngine;
pub use transport::{
    shell_escape, ConnectRequest, RemoteCommand, RemoteProcess, RemoteRole, RemoteSession,
    SessionConnector,
};
pub use service::ScpService;
