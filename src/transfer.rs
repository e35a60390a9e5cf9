use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Where a single send currently is.
///
/// `NotStarted` moves to `Streaming` once the source is open, or to `Skipped`
/// when the path does not name a regular file. `Streaming` ends in `Done` at
/// end of file, or in `Failed` when a read, write, cancellation or deadline
/// stops it. `Skipped`, `Done` and `Failed` are terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferState {
    NotStarted,
    Streaming { transferred: u64 },
    Skipped,
    Done { transferred: u64 },
    Failed { transferred: u64 },
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Skipped | TransferState::Done { .. } | TransferState::Failed { .. }
        )
    }

    pub fn transferred(self) -> u64 {
        match self {
            TransferState::NotStarted | TransferState::Skipped => 0,
            TransferState::Streaming { transferred }
            | TransferState::Done { transferred }
            | TransferState::Failed { transferred } => transferred,
        }
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_repr = match self {
            TransferState::NotStarted => "NotStarted",
            TransferState::Streaming { .. } => "Streaming",
            TransferState::Skipped => "Skipped",
            TransferState::Done { .. } => "Done",
            TransferState::Failed { .. } => "Failed",
        };
        f.write_str(str_repr)
    }
}

/// Summary of a finished transfer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Transfer {
    pub bytes: u64,
    pub chunks: u64,
}

impl Transfer {
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// Shared flag another thread can flip to stop an in-flight transfer.
/// Checked between chunk operations, never inside a blocking call.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
