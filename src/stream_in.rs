//! Input streams: data flowing from the engine to a command handler.
//!
//! Both kinds follow the same flow-control contract: an incoming item is
//! queued, a worker hands it to the consumer, and only once the consumer
//! has accepted it is `Ack` emitted back to the producer. The bounded
//! queue in front of the worker absorbs the engine occasionally sending a
//! second `Data` before the previous `Ack` went out.

use std::io::Read;

use crossbeam_channel::{bounded, Receiver, Sender, select};

use crate::cancel::CancelToken;
use crate::error::LabeledError;
use crate::message::DataBody;
use crate::value::Value;

/// Callback emitting `Ack(id)` for this stream.
pub(crate) type AckFn = Box<dyn Fn() + Send>;

/// The registry's handle to one input stream; the dispatcher feeds it
/// from decoded `Data` frames.
#[derive(Clone)]
pub(crate) enum InHandle {
    List(Sender<Value>),
    Raw(Sender<Result<Vec<u8>, LabeledError>>),
}

impl InHandle {
    /// Enqueue one item. Blocks when the prebuffer is full, which is the
    /// backpressure the protocol expects. A payload of the wrong kind for
    /// the stream is a protocol error; an `Err` payload on a raw stream
    /// travels in-band to the consumer.
    pub(crate) fn received(&self, body: DataBody) -> Result<(), LabeledError> {
        match (self, body) {
            (InHandle::List(tx), DataBody::List(v)) => {
                let _ = tx.send(v);
                Ok(())
            }
            (InHandle::List(_), DataBody::Raw(_)) => Err(LabeledError::new(
                "list stream input must be a List value, got raw data",
            )),
            (InHandle::Raw(tx), DataBody::Raw(chunk)) => {
                let _ = tx.send(chunk);
                Ok(())
            }
            (InHandle::Raw(_), DataBody::List(_)) => Err(LabeledError::new(
                "raw stream input must be raw data, got a List value",
            )),
        }
    }
}

/// An ordered, finite, non-restartable sequence of [`Value`]s consumed by
/// a command handler.
pub struct ListStreamReader {
    rx: Receiver<Value>,
}

impl Iterator for ListStreamReader {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.rx.recv().ok()
    }
}

/// A readable byte stream consumed by a command handler. End of stream
/// corresponds to the producer's `End` frame; an in-band stream error
/// surfaces as a read failure.
pub struct ByteStreamReader {
    rx: Receiver<Result<Vec<u8>, LabeledError>>,
    leftover: Vec<u8>,
    pos: usize,
}

impl Read for ByteStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.leftover.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.leftover = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.leftover.len() - self.pos);
        buf[..n].copy_from_slice(&self.leftover[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Create a list input stream: the registry handle, the consumer-facing
/// reader, and a worker that forwards queued items and acknowledges each
/// one once the consumer has taken it.
pub(crate) fn list_input(
    buffer: usize,
    cancel: CancelToken,
    on_ack: AckFn,
) -> (InHandle, ListStreamReader, impl FnOnce() + Send) {
    let (buf_tx, buf_rx) = bounded::<Value>(buffer.max(1));
    // rendezvous: the send completes exactly when the consumer accepts
    let (out_tx, out_rx) = bounded::<Value>(0);

    let worker = move || forward(buf_rx, out_tx, cancel, on_ack);
    (
        InHandle::List(buf_tx),
        ListStreamReader { rx: out_rx },
        worker,
    )
}

/// Create a raw input stream; same contract as [`list_input`] with byte
/// chunks instead of values.
pub(crate) fn raw_input(
    buffer: usize,
    cancel: CancelToken,
    on_ack: AckFn,
) -> (InHandle, ByteStreamReader, impl FnOnce() + Send) {
    let (buf_tx, buf_rx) = bounded::<Result<Vec<u8>, LabeledError>>(buffer.max(1));
    let (out_tx, out_rx) = bounded::<Result<Vec<u8>, LabeledError>>(0);

    let worker = move || forward(buf_rx, out_tx, cancel, on_ack);
    (
        InHandle::Raw(buf_tx),
        ByteStreamReader {
            rx: out_rx,
            leftover: Vec::new(),
            pos: 0,
        },
        worker,
    )
}

/// Forward queued items to the consumer, acknowledging each delivery.
/// When the consumer has gone away the remaining items are discarded but
/// still acknowledged, so the producer can reach its `End`.
fn forward<T: Send>(buf: Receiver<T>, out: Sender<T>, cancel: CancelToken, on_ack: AckFn) {
    loop {
        let item = select! {
            recv(buf) -> r => match r {
                Ok(item) => item,
                // end of data: dropping `out` closes the consumer side
                Err(_) => return,
            },
            recv(cancel.done()) -> _ => return,
        };
        select! {
            send(out, item) -> res => {
                // consumer accepted (or went away; either way the item is
                // off the queue and the producer may send the next one)
                let _ = res;
                on_ack();
            }
            recv(cancel.done()) -> _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn items_arrive_in_order_and_each_is_acked() {
        let acks = Arc::new(AtomicUsize::new(0));
        let acks_in_worker = Arc::clone(&acks);
        let cancel = CancelToken::new();
        let (handle, reader, worker) = list_input(
            4,
            cancel,
            Box::new(move || {
                acks_in_worker.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let worker = std::thread::spawn(worker);

        for i in 0..5 {
            handle.received(DataBody::List(Value::int(i))).unwrap();
        }
        drop(handle);

        let got: Vec<Value> = reader.collect();
        assert_eq!(
            got,
            (0..5).map(Value::int).collect::<Vec<_>>(),
            "delivery order equals receive order"
        );
        worker.join().unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 5, "one ack per delivered item");
    }

    #[test]
    fn ack_is_emitted_only_after_delivery() {
        let acks = Arc::new(AtomicUsize::new(0));
        let acks_in_worker = Arc::clone(&acks);
        let cancel = CancelToken::new();
        let (handle, mut reader, worker) = list_input(
            1,
            cancel,
            Box::new(move || {
                acks_in_worker.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::spawn(worker);

        handle.received(DataBody::List(Value::int(1))).unwrap();
        // nobody has consumed the item yet
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(acks.load(Ordering::SeqCst), 0, "no ack before delivery");

        assert_eq!(reader.next(), Some(Value::int(1)));
        // delivery happened; the ack follows promptly
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while acks.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "ack never emitted");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn tolerates_data_before_previous_ack() {
        // the engine may send a second Data without waiting for Ack; the
        // prebuffer absorbs it without blocking the dispatcher
        let cancel = CancelToken::new();
        let (handle, mut reader, worker) = list_input(1, cancel, Box::new(|| {}));
        std::thread::spawn(worker);

        handle.received(DataBody::List(Value::int(1))).unwrap();
        let handle2 = std::thread::spawn(move || {
            handle.received(DataBody::List(Value::int(2))).unwrap();
            handle
        });
        assert_eq!(reader.next(), Some(Value::int(1)));
        let handle = handle2.join().unwrap();
        assert_eq!(reader.next(), Some(Value::int(2)));
        drop(handle);
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn byte_stream_reader_concatenates_chunks() {
        let cancel = CancelToken::new();
        let (handle, mut reader, worker) = raw_input(4, cancel, Box::new(|| {}));
        std::thread::spawn(worker);

        handle
            .received(DataBody::Raw(Ok(b"first".to_vec())))
            .unwrap();
        handle
            .received(DataBody::Raw(Ok(b"second".to_vec())))
            .unwrap();
        drop(handle);

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"firstsecond");
    }

    #[test]
    fn small_reads_drain_a_large_chunk() {
        let cancel = CancelToken::new();
        let (handle, mut reader, worker) = raw_input(4, cancel, Box::new(|| {}));
        std::thread::spawn(worker);

        handle
            .received(DataBody::Raw(Ok(b"abcdef".to_vec())))
            .unwrap();
        drop(handle);

        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            match reader.read(&mut buf).unwrap() {
                0 => break,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn wrong_payload_kind_is_a_protocol_error() {
        let cancel = CancelToken::new();
        let (handle, _reader, _worker) = list_input(1, cancel.clone(), Box::new(|| {}));
        let err = handle.received(DataBody::Raw(Ok(vec![1]))).unwrap_err();
        assert!(err.msg.contains("list stream input"), "got: {}", err.msg);

        let (handle, _reader, _worker) = raw_input(1, cancel, Box::new(|| {}));
        let err = handle.received(DataBody::List(Value::int(1))).unwrap_err();
        assert!(err.msg.contains("raw stream input"), "got: {}", err.msg);
    }

    #[test]
    fn raw_error_chunk_surfaces_as_read_failure() {
        let cancel = CancelToken::new();
        let (handle, mut reader, worker) = raw_input(4, cancel, Box::new(|| {}));
        std::thread::spawn(worker);

        handle.received(DataBody::Raw(Ok(b"ok".to_vec()))).unwrap();
        handle
            .received(DataBody::Raw(Err(LabeledError::new("disk on fire"))))
            .unwrap();
        drop(handle);

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
        let err = reader.read(&mut buf).unwrap_err();
        assert!(err.to_string().contains("disk on fire"), "got: {err}");
    }

    #[test]
    fn cancellation_stops_the_worker() {
        let cancel = CancelToken::new();
        let (_handle, mut reader, worker) = list_input(1, cancel.clone(), Box::new(|| {}));
        let worker = std::thread::spawn(worker);

        cancel.cancel(crate::cancel::CancelCause::Interrupt);
        worker.join().unwrap();
        assert_eq!(reader.next(), None, "consumer sees end of stream");
    }
}
