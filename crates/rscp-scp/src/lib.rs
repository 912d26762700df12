//! # rscp – SCP
//!
//! Client side of the SCP remote copy protocol:
//!   • Frame codec for the `C` / `D` / `E` / ack / error wire units
//!   • Sink engine receiving from a remote `scp -f`
//!   • Source engine driving a remote `scp -t`, recursing through directories
//!   • Transport collaborator traits (session, process, connector)
//!   • Progress observers
//!   • `ScpService` orchestrating direction, credentials and teardown

pub mod scp;
