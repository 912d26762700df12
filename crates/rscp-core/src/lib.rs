//! # rscp – Core
//!
//! Types shared by every layer of the SCP client:
//!   • Error taxonomy (`ScpError`, `AuthError`)
//!   • Immutable transfer configuration (`TransferOptions`)
//!   • `[user@]host:path` endpoint parsing (`TransferEndpoint`)

pub mod endpoint;
pub mod error;
pub mod options;

pub use endpoint::TransferEndpoint;
pub use error::{AuthError, ScpError};
pub use options::TransferOptions;
