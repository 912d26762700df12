//! # rscp
//!
//! SCP client library. Re-exports the workspace crates under one roof and
//! provides the logging bootstrap used by front ends:
//!   • `rscp_core` – errors, options, endpoint parsing (re-exported at the root)
//!   • `auth`      – trust store, key loading, keyring
//!   • `scp`       – protocol engines and `ScpService`
//!   • `logging`   – `tracing-subscriber` setup driven by `TransferOptions`

pub mod logging;

pub use rscp_auth as auth;
pub use rscp_core::*;
pub use rscp_scp::scp;

pub use logging::init_logging;
pub use rscp_scp::scp::ScpService;
