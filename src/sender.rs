use std::{
    io::{self, Read, Write},
    path::Path,
    time::Instant,
};

use crate::{
    error::SendError,
    fs::File,
    transfer::{CancelToken, Transfer, TransferState},
};

pub const CHUNK_SIZE: usize = 4096;

/// Copies a file onto a sink in bounded chunks.
///
/// Every read of at most `chunk_size` bytes is written to the sink in full
/// before the next read. A read of zero bytes ends the transfer. The length
/// sent is whatever the file holds while it is being read; concurrent writers
/// to the file are not excluded.
#[derive(Clone, Debug)]
pub struct FileSender {
    chunk_size: usize,
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl Default for FileSender {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            cancel: None,
            deadline: None,
        }
    }
}

/// Shorthand for `FileSender::default().send(sink, path)`.
pub fn send<W: Write + ?Sized>(sink: &mut W, path: impl AsRef<Path>) -> Result<Transfer, SendError> {
    FileSender::default().send(sink, path)
}

/// Reports a missing file the way a plain console tool would: one
/// `No such file: <path>` line and an empty transfer. Every other outcome is
/// passed through.
pub fn skip_missing(result: Result<Transfer, SendError>) -> Result<Transfer, SendError> {
    match result {
        Err(SendError::NotFound { path }) => {
            tracing::warn!("No such file: {}", path.display());
            Ok(Transfer::default())
        }
        other => other,
    }
}

impl FileSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        if chunk_size == 0 {
            panic!("chunk_size should be at least one.");
        }
        self.chunk_size = chunk_size;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn send<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        path: impl AsRef<Path>,
    ) -> Result<Transfer, SendError> {
        self.open(path)?.stream_to(sink)
    }

    /// Resolves `path` to an open regular file without touching any sink.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<OpenedFile<'_>, SendError> {
        let path = path.as_ref();
        let state = TransferState::NotStarted;
        match File::open(path) {
            Ok(file) => {
                let next = TransferState::Streaming { transferred: 0 };
                tracing::trace!(from = %state, to = %next, path = %path.display());
                Ok(OpenedFile { sender: self, file })
            }
            Err(err) => {
                let next = if err.is_not_found() {
                    TransferState::Skipped
                } else {
                    TransferState::Failed { transferred: 0 }
                };
                tracing::trace!(from = %state, to = %next, path = %path.display());
                Err(err)
            }
        }
    }

    /// The chunk loop over any reader.
    ///
    /// On failure the error carries the bytes of every chunk that was fully
    /// written; a chunk whose write failed halfway is not counted.
    pub fn stream<R, W>(&self, reader: &mut R, sink: &mut W) -> Result<Transfer, SendError>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut transfer = Transfer::default();
        let mut state = TransferState::Streaming { transferred: 0 };
        let mut short_read = false;

        loop {
            // After a short read the next read is most likely EOF, and a
            // transfer whose bytes all reached the sink must not turn into
            // `Cancelled`. A non-empty read is still checked before its write.
            if !short_read {
                self.check(transfer.bytes)
                    .map_err(|err| fail(&mut state, err))?;
            }

            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(fail(&mut state, SendError::io(transfer.bytes, err))),
            };
            short_read = read < buf.len();

            self.check(transfer.bytes)
                .map_err(|err| fail(&mut state, err))?;

            sink.write_all(&buf[..read])
                .map_err(|err| fail(&mut state, SendError::io(transfer.bytes, err)))?;
            transfer.bytes += read as u64;
            transfer.chunks += 1;
            state = TransferState::Streaming {
                transferred: transfer.bytes,
            };
            tracing::trace!(chunk = transfer.chunks, len = read, "Wrote chunk");
        }

        sink.flush()
            .map_err(|err| fail(&mut state, SendError::io(transfer.bytes, err)))?;

        let done = TransferState::Done {
            transferred: transfer.bytes,
        };
        tracing::trace!(from = %state, to = %done, chunks = transfer.chunks);
        Ok(transfer)
    }

    fn check(&self, transferred: u64) -> Result<(), SendError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SendError::Cancelled { transferred });
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SendError::TimedOut { transferred });
        }
        Ok(())
    }
}

fn fail(state: &mut TransferState, err: SendError) -> SendError {
    let failed = TransferState::Failed {
        transferred: err.transferred(),
    };
    tracing::debug!(from = %state, to = %failed, error = %err, "Transfer failed");
    *state = failed;
    err
}

/// A file that passed the existence check and is ready to stream. Dropping it
/// without streaming closes the file.
#[derive(Debug)]
pub struct OpenedFile<'a> {
    sender: &'a FileSender,
    file: File,
}

impl OpenedFile<'_> {
    /// Size reported by the filesystem at open time.
    pub fn size(&self) -> u64 {
        self.file.size
    }

    pub fn stream_to<W: Write + ?Sized>(self, sink: &mut W) -> Result<Transfer, SendError> {
        self.stream_at_most(u64::MAX, sink)
    }

    /// Streams no more than `limit` bytes, even if the file grew after it was
    /// opened. A file that shrank still ends early at EOF.
    pub fn stream_at_most<W: Write + ?Sized>(
        mut self,
        limit: u64,
        sink: &mut W,
    ) -> Result<Transfer, SendError> {
        let mut reader = (&mut self.file).take(limit);
        let transfer = self.sender.stream(&mut reader, sink)?;
        tracing::debug!(
            path = %self.file.path().display(),
            bytes = transfer.bytes,
            chunks = transfer.chunks,
            "Sent file"
        );
        Ok(transfer)
    }
}
