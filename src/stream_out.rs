//! Output streams: data flowing from a command handler to the engine.
//!
//! Each live output stream runs a small state machine:
//!
//! ```text
//! Idle ── write ──► Waiting-Ack ── Ack ──► Idle
//!                        │
//!                        ├── Drop ──► Terminated (drop)
//!                        └── cancel ──► Terminated (cancelled)
//! Idle ── end-of-data ──► Emit-End ──► Terminated (normal)
//! ```
//!
//! The single-slot `sent` gate enforces at most one unacknowledged `Data`
//! frame per stream; a second send blocks until the consumer's `Ack`.

use std::io::{self, Write};

use crossbeam_channel::{bounded, Receiver, Sender, select};

use crate::cancel::{CancelCause, CancelToken};
use crate::codec::CodecError;

/// Failure modes of a handler writing into an output stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The runtime side of the stream is gone.
    #[error("stream closed")]
    Closed,
    /// The stream's scope was cancelled; the cause tells why (consumer
    /// drop, interrupt, goodbye, shutdown).
    #[error("{0}")]
    Cancelled(CancelCause),
}

/// The registry's handle to one output stream: how the dispatcher routes
/// `Ack` and `Drop` frames to it.
pub(crate) struct OutControl {
    ack_tx: Sender<()>,
    cancel: CancelToken,
}

impl OutControl {
    /// Release the sent gate. With no send outstanding the gate is full
    /// and the spurious ack is a protocol error.
    pub(crate) fn ack(&self) -> Result<(), LoneAck> {
        self.ack_tx.try_send(()).map_err(|_| LoneAck)
    }

    /// The consumer asked the producer to stop: cancel the producing
    /// scope with the drop-stream cause.
    pub(crate) fn dropped(&self) {
        self.cancel.cancel(CancelCause::DropStream);
    }
}

/// Marker error for an `Ack` with no outstanding send.
#[derive(Debug, thiserror::Error)]
#[error("received unexpected Ack")]
pub(crate) struct LoneAck;

/// How the producer loop ended; the dispatcher only logs these.
#[derive(Debug, PartialEq)]
pub(crate) enum OutExit {
    /// Producer closed its end; `End` was emitted.
    Ended,
    /// The scope was cancelled (drop-stream, interrupt, ...).
    Cancelled,
    /// Writing a frame failed.
    SendFailed(String),
}

/// Drive one output stream: pull items from the producer, emit each as a
/// `Data` frame, and hold the next send until the consumer's `Ack`.
pub(crate) fn run_output<T: Send>(
    data: Receiver<T>,
    ack: Receiver<()>,
    cancel: CancelToken,
    on_send: impl Fn(T) -> Result<(), CodecError>,
    on_end: impl FnOnce(),
) -> OutExit {
    loop {
        let item = select! {
            recv(data) -> r => match r {
                Ok(item) => item,
                Err(_) => break,
            },
            recv(cancel.done()) -> _ => return OutExit::Cancelled,
        };
        if let Err(e) = on_send(item) {
            return OutExit::SendFailed(e.to_string());
        }
        select! {
            recv(ack) -> r => {
                if r.is_err() {
                    return OutExit::SendFailed("ack channel closed".into());
                }
            }
            recv(cancel.done()) -> _ => return OutExit::Cancelled,
        }
    }
    on_end();
    OutExit::Ended
}

/// Create the channel pair for one output stream. Returns the registry
/// control, the producer-side item sender, a keeper clone of the sender
/// (held by the call context so the stream survives until the handler's
/// error, if any, has been delivered), and the receivers the run loop
/// consumes.
pub(crate) fn output_channels<T>(
    cancel: CancelToken,
) -> (OutControl, Sender<T>, Sender<T>, Receiver<T>, Receiver<()>) {
    // rendezvous so that a producer's send completes only when the run
    // loop has taken the item; nothing queues past the sent gate
    let (data_tx, data_rx) = bounded::<T>(0);
    let (ack_tx, ack_rx) = bounded::<()>(1);
    let control = OutControl {
        ack_tx,
        cancel,
    };
    let keeper = data_tx.clone();
    (control, data_tx, keeper, data_rx, ack_rx)
}

/// Producer half of a list output stream, handed to command handlers.
/// Dropping it (or letting it fall out of scope when the handler returns)
/// ends the stream and emits `End`.
pub struct ListStreamSender {
    tx: Sender<crate::value::Value>,
    cancel: CancelToken,
}

impl ListStreamSender {
    pub(crate) fn new(tx: Sender<crate::value::Value>, cancel: CancelToken) -> Self {
        ListStreamSender { tx, cancel }
    }

    /// Send one value. Blocks while a previous item is unacknowledged.
    /// A cancelled stream (consumer drop included) is ordinary stream
    /// termination from the producer's point of view.
    pub fn send(&self, value: crate::value::Value) -> Result<(), StreamError> {
        select! {
            send(self.tx, value) -> res => res.map_err(|_| StreamError::Closed),
            recv(self.cancel.done()) -> _ => Err(StreamError::Cancelled(
                self.cancel.cause().unwrap_or(CancelCause::Requested),
            )),
        }
    }
}

/// Producer half of a byte output stream, handed to command handlers.
///
/// Writes collect into a buffer; a full buffer is flushed as one `Data`
/// frame and the writer blocks until the consumer acknowledges it.
/// Dropping the writer flushes any residue and ends the stream.
pub struct ByteStreamWriter {
    tx: Option<Sender<Vec<u8>>>,
    cancel: CancelToken,
    buf: Vec<u8>,
    capacity: usize,
}

impl ByteStreamWriter {
    pub(crate) fn new(tx: Sender<Vec<u8>>, cancel: CancelToken, capacity: usize) -> Self {
        ByteStreamWriter {
            tx: Some(tx),
            cancel,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn send_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buf);
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, StreamError::Closed))?;
        select! {
            send(tx, chunk) -> res => res.map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, StreamError::Closed)
            }),
            recv(self.cancel.done()) -> _ => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                StreamError::Cancelled(self.cancel.cause().unwrap_or(CancelCause::Requested)),
            )),
        }
    }

    /// Flush the residue and end the stream, reporting any final write
    /// failure. Equivalent to dropping the writer except for the error.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_chunk()?;
        self.tx.take();
        Ok(())
    }
}

impl Write for ByteStreamWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.capacity - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == self.capacity {
                self.send_chunk()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

impl Drop for ByteStreamWriter {
    fn drop(&mut self) {
        let _ = self.send_chunk();
        self.tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Harness {
        control: OutControl,
        sender: ListStreamSender,
        keeper: Sender<Value>,
        sent: Arc<Mutex<Vec<Value>>>,
        ended: Arc<AtomicUsize>,
        run: std::thread::JoinHandle<OutExit>,
    }

    fn harness(cancel: CancelToken) -> Harness {
        let (control, tx, keeper, data_rx, ack_rx) = output_channels::<Value>(cancel.clone());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(AtomicUsize::new(0));
        let sent_in_run = Arc::clone(&sent);
        let ended_in_run = Arc::clone(&ended);
        let run = std::thread::spawn(move || {
            run_output(
                data_rx,
                ack_rx,
                cancel,
                move |v| {
                    sent_in_run.lock().unwrap().push(v);
                    Ok(())
                },
                move || {
                    ended_in_run.fetch_add(1, Ordering::SeqCst);
                },
            )
        });
        Harness {
            control,
            sender: ListStreamSender::new(tx, CancelToken::new()),
            keeper,
            sent,
            ended,
            run,
        }
    }

    #[test]
    fn second_send_blocks_until_ack() {
        let cancel = CancelToken::new();
        let h = harness(cancel);

        h.sender.send(Value::int(1)).unwrap();

        // the second send must not complete before the first is acked
        let sender = h.sender;
        let second = std::thread::spawn(move || {
            sender.send(Value::int(2)).unwrap();
            sender
        });
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(h.sent.lock().unwrap().len(), 1, "second Data before Ack");

        h.control.ack().unwrap();
        let sender = second.join().unwrap();
        h.control.ack().unwrap();

        drop(sender);
        drop(h.keeper);
        assert_eq!(h.run.join().unwrap(), OutExit::Ended);
        assert_eq!(
            *h.sent.lock().unwrap(),
            vec![Value::int(1), Value::int(2)]
        );
        assert_eq!(h.ended.load(Ordering::SeqCst), 1, "End emitted once");
    }

    #[test]
    fn close_without_sending_emits_end() {
        let cancel = CancelToken::new();
        let h = harness(cancel);
        drop(h.sender);
        drop(h.keeper);
        assert_eq!(h.run.join().unwrap(), OutExit::Ended);
        assert!(h.sent.lock().unwrap().is_empty());
        assert_eq!(h.ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spurious_ack_is_reported() {
        let cancel = CancelToken::new();
        let h = harness(cancel);
        // gate is empty: the first stray ack is absorbed by the slot,
        // the second has nowhere to go
        assert!(h.control.ack().is_ok());
        let err = h.control.ack().unwrap_err();
        assert_eq!(err.to_string(), "received unexpected Ack");
        drop(h.sender);
        drop(h.keeper);
        h.run.join().unwrap();
    }

    #[test]
    fn drop_cancels_the_scope_and_stops_the_loop() {
        let cancel = CancelToken::new();
        let (control, tx, keeper, data_rx, ack_rx) = output_channels::<Value>(cancel.clone());
        let run = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                run_output(data_rx, ack_rx, cancel, |_| Ok(()), || {})
            })
        };
        let sender = ListStreamSender::new(tx, cancel.clone());

        sender.send(Value::int(1)).unwrap();
        // consumer loses interest
        control.dropped();
        assert_eq!(cancel.cause(), Some(CancelCause::DropStream));
        assert_eq!(run.join().unwrap(), OutExit::Cancelled);

        // the producer sees ordinary termination with the drop cause
        match sender.send(Value::int(2)) {
            Err(StreamError::Cancelled(CancelCause::DropStream)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        drop(keeper);
    }

    #[test]
    fn byte_writer_coalesces_until_buffer_is_full() {
        let cancel = CancelToken::new();
        let (_control, tx, keeper, data_rx, ack_rx) = output_channels::<Vec<u8>>(cancel.clone());
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let chunks_in_run = Arc::clone(&chunks);
        let run = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                run_output(
                    data_rx,
                    ack_rx,
                    cancel,
                    move |c: Vec<u8>| {
                        chunks_in_run.lock().unwrap().push(c);
                        Ok(())
                    },
                    || {},
                )
            })
        };

        let mut writer = ByteStreamWriter::new(tx, cancel.clone(), 16);
        writer.write_all(b"first").unwrap();
        writer.write_all(b"second").unwrap();
        // 11 bytes buffered, capacity 16: nothing sent yet
        std::thread::sleep(Duration::from_millis(100));
        assert!(chunks.lock().unwrap().is_empty());

        writer.finish().unwrap();
        drop(keeper);
        assert_eq!(run.join().unwrap(), OutExit::Ended);
        assert_eq!(*chunks.lock().unwrap(), vec![b"firstsecond".to_vec()]);
    }

    #[test]
    fn byte_writer_splits_at_capacity() {
        let cancel = CancelToken::new();
        let (control, tx, keeper, data_rx, ack_rx) = output_channels::<Vec<u8>>(cancel.clone());
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let chunks_in_run = Arc::clone(&chunks);
        let run = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                run_output(
                    data_rx,
                    ack_rx,
                    cancel,
                    move |c: Vec<u8>| {
                        chunks_in_run.lock().unwrap().push(c);
                        Ok(())
                    },
                    || {},
                )
            })
        };

        // acks arrive promptly so the writer never stalls
        let acker = std::thread::spawn({
            let control = control;
            move || {
                for _ in 0..3 {
                    while control.ack().is_err() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        });

        let mut writer = ByteStreamWriter::new(tx, cancel.clone(), 4);
        writer.write_all(b"abcdefgh").unwrap();
        writer.write_all(b"ij").unwrap();
        writer.finish().unwrap();
        drop(keeper);

        assert_eq!(run.join().unwrap(), OutExit::Ended);
        assert_eq!(
            *chunks.lock().unwrap(),
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
        );
        acker.join().unwrap();
    }

    #[test]
    fn cancelled_writer_reports_drop_stream() {
        let cancel = CancelToken::new();
        let (_control, tx, _keeper, _data_rx, _ack_rx) = output_channels::<Vec<u8>>(cancel.clone());
        cancel.cancel(CancelCause::DropStream);

        let mut writer = ByteStreamWriter::new(tx, cancel, 4);
        let err = writer.write_all(b"too much data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.to_string().contains("Drop stream"), "got: {err}");
    }
}
