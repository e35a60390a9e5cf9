//! Streams files onto byte sinks in fixed-size chunks, and a small blocking
//! HTTP/1.1 server that uses it to serve a directory.
//!
//! ```no_run
//! let mut sink = Vec::new();
//! match plug::send(&mut sink, "/tmp/hello.txt") {
//!     Ok(transfer) => println!("sent {} bytes", transfer.bytes),
//!     Err(err) if err.is_not_found() => println!("{err}"),
//!     Err(err) => return Err(err.into()),
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cli;
pub mod error;
pub mod fs;
pub mod sender;
pub mod server;
pub mod transfer;

pub use error::{RequestError, SendError};
pub use sender::{send, skip_missing, FileSender, OpenedFile, CHUNK_SIZE};
pub use transfer::{CancelToken, Transfer, TransferState};
