#![forbid(unsafe_code)]

//! Blocking HTTP transfer layer.
//!
//! A transfer is a single GET that follows redirects, fails on non-2xx
//! statuses, and streams the response through a [`TransferSink`]: one callback
//! per response header, one per body chunk, and an interrupt poll between
//! chunks so the owner can abort a transfer cooperatively.

mod error;
mod transfer;
mod types;

pub use error::{NetError, NetResult};
pub use transfer::{HttpTransfer, TransferSink};
pub use types::{Headers, NetOptions, DEFAULT_USER_AGENT};
