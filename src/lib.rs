//! LDT1 library
//!
//! Remote directory browsing and file download over a length-framed TCP
//! protocol: the wire codec, the sandboxed server, and the concurrent
//! download client.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod listing;
pub mod logger;
pub mod protocol;
pub mod sandbox;
pub mod streamer;

#[cfg(feature = "api_client")]
pub mod client;
#[cfg(feature = "api_client")]
pub mod download;
#[cfg(feature = "api_client")]
pub mod progress;
#[cfg(feature = "server")]
pub mod server;

pub use codec::Packet;
pub use error::{LdtError, Result};
pub use listing::DirectoryEntry;
pub use sandbox::Sandbox;
pub use streamer::ByteRange;

#[cfg(feature = "api_client")]
pub use client::Client;
#[cfg(feature = "api_client")]
pub use download::{DownloadManager, DownloadStatus, TaskId, TaskStore};
