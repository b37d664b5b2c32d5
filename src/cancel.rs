//! Cooperative cancellation for handlers and streams.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Why a handler or stream was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelCause {
    /// The engine ended the session with `Goodbye`.
    #[error("Goodbye")]
    Goodbye,
    /// The engine sent an Interrupt signal.
    #[error("received Interrupt signal")]
    Interrupt,
    /// The consumer sent `Drop` for the stream this handler produces into.
    #[error("received Drop stream message")]
    DropStream,
    /// The engine closed the input transport.
    #[error("plugin input closed")]
    InputClosed,
    /// The embedder requested shutdown.
    #[error("shutdown requested")]
    Requested,
    /// The session died of an unrecoverable transport failure.
    #[error("{0}")]
    Fatal(String),
}

struct Shared {
    cause: Mutex<Option<CancelCause>>,
    // dropping the sender disconnects every `done` receiver
    keeper: Mutex<Option<Sender<()>>>,
}

/// A cancellation scope. Cloning shares the scope; `cancel` makes every
/// clone's [`CancelToken::done`] channel fire.
#[derive(Clone)]
pub(crate) struct CancelToken {
    shared: Arc<Shared>,
    done: Receiver<()>,
}

impl CancelToken {
    pub(crate) fn new() -> CancelToken {
        let (tx, rx) = bounded(0);
        CancelToken {
            shared: Arc::new(Shared {
                cause: Mutex::new(None),
                keeper: Mutex::new(Some(tx)),
            }),
            done: rx,
        }
    }

    /// Cancel the scope. The first cause wins; later calls are no-ops.
    pub(crate) fn cancel(&self, cause: CancelCause) {
        {
            let mut slot = self.shared.cause.lock().unwrap();
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.shared.keeper.lock().unwrap().take();
    }

    /// A channel that becomes ready (disconnected) once the scope is
    /// cancelled; for use in `select!`.
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.shared.keeper.lock().unwrap().is_none()
    }

    pub(crate) fn cause(&self) -> Option<CancelCause> {
        self.shared.cause.lock().unwrap().clone()
    }

    /// True once this is the last live clone of the scope: every
    /// handler, stream loop and feeder holding it has finished.
    pub(crate) fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.cause())
            .finish()
    }
}
