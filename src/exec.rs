//! The per-call handle passed to command handlers.

use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::cancel::CancelToken;
use crate::codec::Span;
use crate::error::LabeledError;
use crate::message::{
    self, ByteStreamType, Named, PipelineDataHeader, PipelineMetadata,
};
use crate::plugin::PluginCore;
use crate::stream_in::{ByteStreamReader, ListStreamReader};
use crate::stream_out::{ByteStreamWriter, ListStreamSender};
use crate::value::Value;

/// The input the engine piped into a command invocation.
pub enum Input {
    /// No input.
    Empty,
    /// A single value.
    Value(Value),
    /// A finite ordered stream of values.
    ListStream(ListStreamReader),
    /// A raw byte stream.
    ByteStream(ByteStreamReader),
    /// The engine delivered an error as the input.
    Error(LabeledError),
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Empty => f.write_str("Empty"),
            Input::Value(v) => write!(f, "Value({v:?})"),
            Input::ListStream(_) => f.write_str("ListStream"),
            Input::ByteStream(_) => f.write_str("ByteStream"),
            Input::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Options for a byte-stream response.
#[derive(Debug, Clone)]
pub struct ByteStreamOptions {
    /// Desired coalescing buffer size; writes collect into the buffer
    /// before being sent to the consumer. Values below 512 are raised.
    pub buffer_size: usize,
    /// Declared data type of the stream.
    pub ty: ByteStreamType,
    /// Pipeline metadata announced with the stream.
    pub metadata: Option<PipelineMetadata>,
}

impl Default for ByteStreamOptions {
    fn default() -> Self {
        ByteStreamOptions {
            buffer_size: 1024,
            ty: ByteStreamType::Unknown,
            metadata: None,
        }
    }
}

impl ByteStreamOptions {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(512);
        self
    }

    pub fn binary(mut self) -> Self {
        self.ty = ByteStreamType::Binary;
        self
    }

    pub fn string(mut self) -> Self {
        self.ty = ByteStreamType::String;
        self
    }

    pub fn metadata(mut self, metadata: PipelineMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Which response lane a call has committed to. The keepers hold the
/// stream's producer channel open until the call context is dropped, so a
/// handler error can still be delivered inside the stream before `End`.
pub(crate) enum ResponseLane {
    Value,
    ListStream {
        id: i64,
        _keeper: Sender<Value>,
    },
    ByteStream {
        id: i64,
        _keeper: Sender<Vec<u8>>,
    },
}

/// The handle a command handler works with: the invocation's arguments
/// and input, the response lanes, and the engine-call surface.
///
/// Exactly one response may be sent per call; none at all is also fine,
/// in which case the runtime reports empty pipeline data.
pub struct CallContext {
    pub(crate) core: Arc<PluginCore>,
    pub(crate) call_id: i64,
    pub(crate) name: String,
    pub(crate) head: Span,
    pub(crate) positional: Vec<Value>,
    pub(crate) named: Named,
    pub(crate) input: Option<Input>,
    pub(crate) cancel: CancelToken,
    pub(crate) lane: Mutex<Option<ResponseLane>>,
}

impl CallContext {
    /// Name of the invoked command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span of the command invocation in the engine's source.
    pub fn head(&self) -> Span {
        self.head
    }

    /// Values of positional arguments, in declaration order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Named arguments and flags as passed by the user.
    pub fn named(&self) -> &Named {
        &self.named
    }

    /// Take the command's input. Subsequent calls return [`Input::Empty`].
    pub fn take_input(&mut self) -> Input {
        self.input.take().unwrap_or(Input::Empty)
    }

    /// Whether this call's scope has been cancelled (consumer drop,
    /// interrupt, goodbye or shutdown).
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the user passed the flag explicitly.
    pub fn flag_set(&self, name: &str) -> bool {
        self.named.contains(name)
    }

    /// Resolve a flag to a value, applying toggle-flag semantics and the
    /// declared default:
    ///
    /// - passed with a value: that value
    /// - passed without a value: `Bool(true)`
    /// - absent, declared with a default: the default
    /// - absent toggle flag: `Bool(false)`
    /// - not declared at all: `None`
    pub fn flag_value(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.named.get(name) {
            if v.is_nothing() {
                return Some(Value::bool(true));
            }
            return Some(v.clone());
        }
        let cmd = self.core.find_command(&self.name)?;
        let flag = cmd.signature.named.iter().find(|f| f.long == name)?;
        if flag.shape.is_none() {
            return Some(Value::bool(false));
        }
        flag.default_value.clone()
    }

    fn claim_lane(
        &self,
        make: impl FnOnce() -> Result<ResponseLane, LabeledError>,
    ) -> Result<(), LabeledError> {
        let mut lane = self.lane.lock().unwrap();
        if lane.is_some() {
            return Err(LabeledError::new("response has been already sent"));
        }
        *lane = Some(make()?);
        Ok(())
    }

    /// Respond with a single value.
    pub fn return_value(&self, value: Value) -> Result<(), LabeledError> {
        self.claim_lane(|| Ok(ResponseLane::Value))?;
        let body = message::pipeline_data_body(
            &PipelineDataHeader::Value(value, None),
            &self.core.cx(),
        )?;
        self.core
            .send_frame(message::call_response_frame(self.call_id, body))?;
        Ok(())
    }

    /// Respond with a stream of values. The stream ends (and `End` is
    /// sent) when the returned sender is dropped.
    pub fn return_list_stream(&self) -> Result<ListStreamSender, LabeledError> {
        let mut out = None;
        self.claim_lane(|| {
            let (info, sender, keeper) = self.core.start_list_output(&self.cancel, self.head);
            let id = info.id;
            let header = PipelineDataHeader::ListStream(info);
            let body = message::pipeline_data_body(&header, &self.core.cx())?;
            self.core
                .send_frame(message::call_response_frame(self.call_id, body))?;
            out = Some(sender);
            Ok(ResponseLane::ListStream {
                id,
                _keeper: keeper,
            })
        })?;
        Ok(out.expect("lane claimed"))
    }

    /// Respond with a byte stream. The stream ends when the returned
    /// writer is dropped or [`ByteStreamWriter::finish`]ed.
    pub fn return_byte_stream(
        &self,
        options: ByteStreamOptions,
    ) -> Result<ByteStreamWriter, LabeledError> {
        let mut out = None;
        self.claim_lane(|| {
            let (info, writer, keeper) =
                self.core
                    .start_raw_output(&self.cancel, self.head, &options);
            let id = info.id;
            let header = PipelineDataHeader::ByteStream(info);
            let body = message::pipeline_data_body(&header, &self.core.cx())?;
            self.core
                .send_frame(message::call_response_frame(self.call_id, body))?;
            out = Some(writer);
            Ok(ResponseLane::ByteStream {
                id,
                _keeper: keeper,
            })
        })?;
        Ok(out.expect("lane claimed"))
    }

    /// Deliver a handler failure through the appropriate lane: as an
    /// error response when no stream is open, in-band otherwise.
    pub(crate) fn deliver_error(&self, err: LabeledError) {
        let mut lane = self.lane.lock().unwrap();
        // (stream id, is list stream) when a response stream is open
        let stream: Option<(i64, bool)> = match &*lane {
            Some(ResponseLane::ListStream { id, .. }) => Some((*id, true)),
            Some(ResponseLane::ByteStream { id, .. }) => Some((*id, false)),
            _ => None,
        };
        let result = match stream {
            Some((id, true)) => self
                .core
                .send_data_frame(id, &message::DataBody::List(Value::error(err))),
            Some((id, false)) => self
                .core
                .send_data_frame(id, &message::DataBody::Raw(Err(err))),
            None => {
                if lane.is_none() {
                    *lane = Some(ResponseLane::Value);
                }
                self.core.send_frame(message::call_response_frame(
                    self.call_id,
                    message::error_body(&err),
                ))
            }
        };
        if let Err(e) = result {
            tracing::error!(call_id = self.call_id, error = %e, "sending error response");
        }
    }

    /// Called after the handler returned: a call that never responded
    /// reports empty pipeline data.
    pub(crate) fn finish(&self) {
        let mut lane = self.lane.lock().unwrap();
        if lane.is_some() {
            return;
        }
        *lane = Some(ResponseLane::Value);
        drop(lane);
        let result = message::pipeline_data_body(&PipelineDataHeader::Empty, &self.core.cx())
            .and_then(|body| {
                self.core
                    .send_frame(message::call_response_frame(self.call_id, body))
            });
        if let Err(e) = result {
            tracing::error!(call_id = self.call_id, error = %e, "sending empty response");
        }
    }
}
