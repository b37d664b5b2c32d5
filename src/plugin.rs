//! The plugin runtime: single-reader dispatch loop, shared single-writer
//! transport, stream/call registries, and session lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use rmpv::Value as Wire;

use crate::cancel::{CancelCause, CancelToken};
use crate::codec::{self, wrap, CodecError, Span};
use crate::command::Command;
use crate::config::{Config, IoPair};
use crate::custom::{CustomStore, CustomValueOp, IdSource};
use crate::error::LabeledError;
use crate::exec::{ByteStreamOptions, CallContext, Input};
use crate::message::{
    self, ByteStreamInfo, CallBody, DataBody, EngineMsg, EngineReply, Hello, ListStreamInfo,
    PipelineDataHeader, FORMAT_MARKER,
};
use crate::stream_in::{self, InHandle};
use crate::stream_out::{self, ByteStreamWriter, ListStreamSender, OutExit};
use crate::value::{Value, ValueCx};

/// Unrecoverable runtime failures: the session cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// How the session ended. None of these is a failure: the engine ends
/// every session with `Goodbye`, an interrupt, or by closing the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The engine closed the input transport.
    Eof,
    /// The engine sent `Goodbye`.
    Goodbye,
    /// The engine sent an Interrupt signal.
    Interrupt,
    /// The embedder requested shutdown.
    Cancelled,
}

pub(crate) struct PluginCore {
    cmds: BTreeMap<String, Arc<Command>>,
    version: String,
    pub(crate) ids: IdSource,
    pub(crate) customs: CustomStore,
    registry: Mutex<Registry>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Mutex<Vec<(i64, CancelToken)>>,
    shutdown: CancelToken,
    list_buffer: usize,
    raw_buffer: usize,
}

/// All per-session routing state, guarded by one mutex: live output and
/// input streams and in-flight engine calls. Read-modify-write sequences
/// hold the lock for their entirety.
#[derive(Default)]
struct Registry {
    outs: HashMap<i64, stream_out::OutControl>,
    ins: HashMap<i64, InHandle>,
    engine_calls: HashMap<i64, Sender<EngineReply>>,
}

impl PluginCore {
    pub(crate) fn cx(&self) -> ValueCx<'_> {
        ValueCx {
            ids: &self.ids,
            customs: &self.customs,
        }
    }

    pub(crate) fn find_command(&self, name: &str) -> Option<Arc<Command>> {
        self.cmds.get(name).cloned()
    }

    /// Write one frame. The writer mutex is held for the duration of the
    /// serialization and write, so frames never interleave on the wire.
    pub(crate) fn send_frame(&self, frame: Wire) -> Result<(), CodecError> {
        let mut guard = self.writer.lock().unwrap();
        let writer = guard
            .as_mut()
            .ok_or_else(|| CodecError::invalid("plugin output is not attached"))?;
        codec::write_frame(writer.as_mut(), &frame)
    }

    pub(crate) fn send_data_frame(&self, id: i64, body: &DataBody) -> Result<(), CodecError> {
        let frame = message::data_frame(id, body, &self.cx())?;
        self.send_frame(frame)
    }

    /// Spawn a runtime thread; its handle is kept so shutdown can wait
    /// for it.
    pub(crate) fn spawn(&self, name: &str, f: impl FnOnce() + Send + 'static) {
        let handle = std::thread::Builder::new()
            .name(format!("nuplug-{name}"))
            .spawn(f)
            .expect("spawning runtime thread");
        self.threads.lock().unwrap().push(handle);
    }

    fn reap_threads(&self) {
        self.threads.lock().unwrap().retain(|h| !h.is_finished());
        self.purge_in_flight();
    }

    fn drain_threads(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut threads = self.threads.lock().unwrap();
                threads.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
    }

    pub(crate) fn register_engine_call(&self) -> (i64, Receiver<EngineReply>) {
        let id = self.ids.next() as i64;
        let (tx, rx) = bounded(1);
        self.registry.lock().unwrap().engine_calls.insert(id, tx);
        (id, rx)
    }

    pub(crate) fn forget_engine_call(&self, id: i64) {
        self.registry.lock().unwrap().engine_calls.remove(&id);
    }

    fn register_in_flight(&self, call_id: i64, cancel: CancelToken) {
        self.in_flight.lock().unwrap().push((call_id, cancel));
    }

    /// A call's record lives until every thread of the call (handler,
    /// stream loops, closure feeders) has dropped its cancel scope, so
    /// a session shutdown can always reach stragglers.
    fn purge_in_flight(&self) {
        self.in_flight
            .lock()
            .unwrap()
            .retain(|(_, token)| !token.is_orphaned());
    }

    fn cancel_in_flight(&self, cause: CancelCause) {
        for (_, token) in self.in_flight.lock().unwrap().iter() {
            token.cancel(cause.clone());
        }
    }

    /// Allocate and register a list output stream; returns the header
    /// info, the producer handle for the handler, and the keeper clone
    /// that ties the stream's lifetime to the call context.
    pub(crate) fn start_list_output(
        self: &Arc<Self>,
        cancel: &CancelToken,
        span: Span,
    ) -> (ListStreamInfo, ListStreamSender, Sender<Value>) {
        let id = self.ids.next() as i64;
        let (control, tx, keeper, data_rx, ack_rx) =
            stream_out::output_channels::<Value>(cancel.clone());
        self.registry.lock().unwrap().outs.insert(id, control);

        let core = Arc::clone(self);
        let run_cancel = cancel.clone();
        self.spawn("list-output", move || {
            let exit = stream_out::run_output(
                data_rx,
                ack_rx,
                run_cancel,
                |v| core.send_data_frame(id, &DataBody::List(v)),
                || {
                    if let Err(e) = core.send_frame(message::end_frame(id)) {
                        tracing::error!(stream_id = id, error = %e, "sending End");
                    }
                },
            );
            if let OutExit::SendFailed(e) = exit {
                tracing::error!(stream_id = id, error = %e, "output stream run exit");
            }
        });

        let info = ListStreamInfo {
            id,
            span,
            metadata: None,
        };
        (info, ListStreamSender::new(tx, cancel.clone()), keeper)
    }

    /// Allocate and register a byte output stream.
    pub(crate) fn start_raw_output(
        self: &Arc<Self>,
        cancel: &CancelToken,
        span: Span,
        options: &ByteStreamOptions,
    ) -> (ByteStreamInfo, ByteStreamWriter, Sender<Vec<u8>>) {
        let id = self.ids.next() as i64;
        let (control, tx, keeper, data_rx, ack_rx) =
            stream_out::output_channels::<Vec<u8>>(cancel.clone());
        self.registry.lock().unwrap().outs.insert(id, control);

        let core = Arc::clone(self);
        let run_cancel = cancel.clone();
        self.spawn("raw-output", move || {
            let exit = stream_out::run_output(
                data_rx,
                ack_rx,
                run_cancel,
                |chunk| core.send_data_frame(id, &DataBody::Raw(Ok(chunk))),
                || {
                    if let Err(e) = core.send_frame(message::end_frame(id)) {
                        tracing::error!(stream_id = id, error = %e, "sending End");
                    }
                },
            );
            if let OutExit::SendFailed(e) = exit {
                tracing::error!(stream_id = id, error = %e, "output stream run exit");
            }
        });

        let info = ByteStreamInfo {
            id,
            span,
            ty: options.ty,
            metadata: options.metadata.clone(),
        };
        let capacity = options.buffer_size.max(512).min(self.raw_buffer.max(512));
        (
            info,
            ByteStreamWriter::new(tx, cancel.clone(), capacity),
            keeper,
        )
    }

    /// Turn a pipeline-data header into the input handle a handler
    /// consumes. Stream headers register the stream and start its worker.
    pub(crate) fn materialize_input(
        self: &Arc<Self>,
        header: PipelineDataHeader,
        cancel: &CancelToken,
    ) -> Input {
        match header {
            PipelineDataHeader::Empty => Input::Empty,
            PipelineDataHeader::Value(Value::Error { val, .. }, _) => Input::Error(val),
            PipelineDataHeader::Value(v, _) => Input::Value(v),
            PipelineDataHeader::ListStream(info) => {
                let id = info.id;
                let core = Arc::clone(self);
                let (handle, reader, worker) = stream_in::list_input(
                    self.list_buffer,
                    cancel.clone(),
                    Box::new(move || {
                        if let Err(e) = core.send_frame(message::ack_frame(id)) {
                            tracing::error!(stream_id = id, error = %e, "sending Ack");
                        }
                    }),
                );
                self.registry.lock().unwrap().ins.insert(id, handle);
                self.spawn("list-input", worker);
                Input::ListStream(reader)
            }
            PipelineDataHeader::ByteStream(info) => {
                let id = info.id;
                let core = Arc::clone(self);
                let (handle, reader, worker) = stream_in::raw_input(
                    self.list_buffer,
                    cancel.clone(),
                    Box::new(move || {
                        if let Err(e) = core.send_frame(message::ack_frame(id)) {
                            tracing::error!(stream_id = id, error = %e, "sending Ack");
                        }
                    }),
                );
                self.registry.lock().unwrap().ins.insert(id, handle);
                self.spawn("raw-input", worker);
                Input::ByteStream(reader)
            }
        }
    }
}

/// The plugin runtime. One instance hosts any number of named commands
/// and drives the protocol session over a byte pipe supplied by the
/// embedder.
pub struct PluginRuntime {
    core: Arc<PluginCore>,
}

impl PluginRuntime {
    /// Register the plugin's commands. Every command gets the automatic
    /// `--help` flag; duplicate names and invalid signatures are
    /// rejected.
    pub fn new(
        commands: Vec<Command>,
        version: impl Into<String>,
        config: Config,
    ) -> Result<PluginRuntime, RuntimeError> {
        let mut cmds = BTreeMap::new();
        for mut cmd in commands {
            let name = cmd.signature.name.clone();
            if cmds.contains_key(&name) {
                return Err(RuntimeError::InvalidCommand(format!(
                    "command {name:?} already registered"
                )));
            }
            if let Err(e) = cmd.signature.add_help() {
                tracing::warn!(command = %name, error = %e, "adding help flag");
            }
            cmd.signature.validate().map_err(|e| {
                RuntimeError::InvalidCommand(format!("invalid command {name:?}: {e}"))
            })?;
            cmds.insert(name, Arc::new(cmd));
        }
        if cmds.is_empty() {
            return Err(RuntimeError::InvalidCommand(
                "no commands registered".into(),
            ));
        }

        Ok(PluginRuntime {
            core: Arc::new(PluginCore {
                cmds,
                version: version.into(),
                ids: IdSource::default(),
                customs: CustomStore::default(),
                registry: Mutex::new(Registry::default()),
                writer: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
                in_flight: Mutex::new(Vec::new()),
                shutdown: CancelToken::new(),
                list_buffer: config.list_buffer.max(1),
                raw_buffer: config.raw_buffer.max(512),
            }),
        })
    }

    /// Ask the running session to stop. The main loop notices between
    /// frames, cancels all in-flight handlers, and returns
    /// [`Shutdown::Cancelled`].
    pub fn request_shutdown(&self) {
        self.core.shutdown.cancel(CancelCause::Requested);
    }

    /// Drive the protocol session until the engine ends it.
    ///
    /// Writes the encoding marker and `Hello`, then dispatches inbound
    /// frames until `Goodbye`, an Interrupt signal, EOF, or a requested
    /// shutdown. All in-flight handlers are cancelled with the
    /// terminating cause and waited for before this returns.
    pub fn run(&self, io: IoPair) -> Result<Shutdown, RuntimeError> {
        let IoPair {
            mut reader, writer, ..
        } = io;
        {
            let mut guard = self.core.writer.lock().unwrap();
            let writer = guard.insert(writer);
            writer.write_all(FORMAT_MARKER)?;
            writer.flush()?;
        }
        self.core
            .send_frame(Hello::local(cfg!(unix)).to_wire())?;

        // the engine's own Hello is not waited for; frames are processed
        // as they come
        let result = self.msg_loop(reader.as_mut());

        let cause = match &result {
            Ok(Shutdown::Goodbye) => CancelCause::Goodbye,
            Ok(Shutdown::Interrupt) => CancelCause::Interrupt,
            Ok(Shutdown::Eof) => CancelCause::InputClosed,
            Ok(Shutdown::Cancelled) => self
                .core
                .shutdown
                .cause()
                .unwrap_or(CancelCause::Requested),
            Err(e) => CancelCause::Fatal(e.to_string()),
        };
        tracing::debug!(?cause, "main input loop exit");

        self.core.shutdown.cancel(cause.clone());
        self.core.cancel_in_flight(cause);
        self.core.drain_threads();
        result
    }

    fn msg_loop(&self, mut reader: &mut (dyn Read + Send)) -> Result<Shutdown, RuntimeError> {
        loop {
            self.core.reap_threads();
            if self.core.shutdown.is_cancelled() {
                return Ok(Shutdown::Cancelled);
            }

            let frame = match codec::read_frame(&mut reader)? {
                Some(frame) => frame,
                None => return Ok(Shutdown::Eof),
            };

            let msg = match message::decode_engine_msg(frame, &self.core.cx()) {
                Ok(msg) => msg,
                Err(e) => {
                    // in-frame decode failure: framing is intact, report
                    // and keep the session alive
                    tracing::error!(error = %e, "decoding top-level message");
                    continue;
                }
            };

            match msg {
                EngineMsg::Goodbye => return Ok(Shutdown::Goodbye),
                EngineMsg::Signal(signal) if signal == "Interrupt" => {
                    return Ok(Shutdown::Interrupt)
                }
                EngineMsg::Signal(signal) => {
                    tracing::info!(%signal, "got Signal");
                }
                EngineMsg::Hello(hello) => {
                    tracing::debug!(protocol = %hello.protocol, version = %hello.version, "engine hello");
                }
                other => {
                    if let Err(e) = self.handle_message(other) {
                        tracing::error!(error = %e, "handling message");
                    }
                }
            }
        }
    }

    fn handle_message(&self, msg: EngineMsg) -> Result<(), LabeledError> {
        match msg {
            EngineMsg::Call { id, body } => {
                if let Err(e) = self.handle_call(id, body) {
                    tracing::error!(call_id = id, error = %e, "responding with error to a Call");
                    self.core
                        .send_frame(message::call_response_frame(id, message::error_body(&e)))
                        .map_err(|se| {
                            LabeledError::new(format!(
                                "sending error response to a Call: {se}"
                            ))
                        })?;
                }
                Ok(())
            }
            EngineMsg::Ack(id) => {
                let registry = self.core.registry.lock().unwrap();
                match registry.outs.get(&id) {
                    Some(control) => control
                        .ack()
                        .map_err(|e| LabeledError::new(e.to_string())),
                    None => Err(LabeledError::new(format!(
                        "no output stream with id {id}"
                    ))),
                }
            }
            EngineMsg::Data { id, body } => {
                let handle = {
                    let registry = self.core.registry.lock().unwrap();
                    registry.ins.get(&id).cloned()
                };
                match handle {
                    Some(handle) => handle.received(body),
                    None => Err(LabeledError::new(format!("unknown input stream {id}"))),
                }
            }
            EngineMsg::End(id) => {
                let removed = self.core.registry.lock().unwrap().ins.remove(&id);
                if removed.is_none() {
                    return Err(LabeledError::new(format!("unknown input stream {id}")));
                }
                // dropping the handle closes the stream's queue; the
                // worker drains what is left and closes the consumer
                drop(removed);
                self.core
                    .send_frame(message::drop_frame(id))
                    .map_err(LabeledError::from)
            }
            EngineMsg::Drop(id) => {
                let removed = self.core.registry.lock().unwrap().outs.remove(&id);
                match removed {
                    Some(control) => {
                        control.dropped();
                        Ok(())
                    }
                    None => Err(LabeledError::new(format!(
                        "no output stream with id {id}"
                    ))),
                }
            }
            EngineMsg::EngineCallResponse { id, reply } => {
                let tx = self.core.registry.lock().unwrap().engine_calls.remove(&id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(reply);
                        Ok(())
                    }
                    None => Err(LabeledError::new(format!(
                        "received unregistered Engine Call Response with ID {id}"
                    ))),
                }
            }
            // handled by the main loop
            EngineMsg::Hello(_) | EngineMsg::Signal(_) | EngineMsg::Goodbye => Ok(()),
        }
    }

    fn handle_call(&self, call_id: i64, body: CallBody) -> Result<(), LabeledError> {
        match body {
            CallBody::Signature => {
                let cx = self.core.cx();
                let sigs = self
                    .core
                    .cmds
                    .values()
                    .map(|cmd| cmd.to_wire(&cx))
                    .collect::<Result<Vec<_>, _>>()?;
                self.core
                    .send_frame(message::call_response_frame(
                        call_id,
                        wrap("Signature", Wire::Array(sigs)),
                    ))
                    .map_err(LabeledError::from)
            }
            CallBody::Metadata => self
                .core
                .send_frame(message::call_response_frame(
                    call_id,
                    message::metadata_body(&self.core.version),
                ))
                .map_err(LabeledError::from),
            CallBody::Run(run) => self.handle_run(call_id, run),
            CallBody::CustomValueOp(call) => self.handle_custom_value_op(call_id, call),
        }
    }

    fn handle_run(&self, call_id: i64, run: message::RunCall) -> Result<(), LabeledError> {
        let cmd = self.core.find_command(&run.name).ok_or_else(|| {
            LabeledError::new(format!("unknown Run target {:?}", run.name))
        })?;

        let cancel = CancelToken::new();
        let input = self.core.materialize_input(run.input, &cancel);
        let ctx = CallContext {
            core: Arc::clone(&self.core),
            call_id,
            name: run.name,
            head: run.head,
            positional: run.positional,
            named: run.named,
            input: Some(input),
            cancel: cancel.clone(),
            lane: Mutex::new(None),
        };

        self.core.register_in_flight(call_id, cancel);
        self.core.spawn("handler", move || {
            let mut ctx = ctx;
            if let Err(e) = (cmd.run)(&mut ctx) {
                ctx.deliver_error(e);
            }
            ctx.finish();
            // dropping the context closes any open response stream,
            // which makes its run loop emit End
        });
        Ok(())
    }

    fn handle_custom_value_op(
        &self,
        call_id: i64,
        call: crate::custom::CustomCall,
    ) -> Result<(), LabeledError> {
        tracing::debug!(id = call.id, name = %call.name, op = ?call.op, "handling custom value operation");
        let cv = self.core.customs.get(call.id).ok_or_else(|| {
            LabeledError::new(format!(
                "custom value operation on unknown variable {{{}, {}}}",
                call.name, call.id
            ))
        })?;

        let respond_value = |v: Value| -> Result<(), LabeledError> {
            let body =
                message::pipeline_data_body(&PipelineDataHeader::Value(v, None), &self.core.cx())?;
            self.core
                .send_frame(message::call_response_frame(call_id, body))
                .map_err(LabeledError::from)
        };

        match call.op {
            CustomValueOp::ToBaseValue => respond_value(cv.to_base_value()?),
            CustomValueOp::FollowPathInt { item, optional } => {
                respond_value(cv.follow_path_int(item, optional)?)
            }
            CustomValueOp::FollowPathString {
                item,
                optional,
                insensitive,
            } => respond_value(cv.follow_path_string(&item, optional, !insensitive)?),
            CustomValueOp::Operation(op, rhs) => respond_value(cv.operation(op, rhs)?),
            CustomValueOp::PartialCmp(rhs) => {
                let ordering = cv.partial_cmp(&rhs);
                self.core
                    .send_frame(message::call_response_frame(
                        call_id,
                        message::ordering_body(ordering),
                    ))
                    .map_err(LabeledError::from)
            }
            CustomValueOp::Dropped => {
                // the handle is released whether or not the capability
                // reports a problem
                self.core.customs.remove(call.id);
                let body = match cv.dropped() {
                    Ok(()) => message::pipeline_data_body(
                        &PipelineDataHeader::Empty,
                        &self.core.cx(),
                    )?,
                    Err(e) => message::error_body(&e),
                };
                self.core
                    .send_frame(message::call_response_frame(call_id, body))
                    .map_err(LabeledError::from)
            }
            CustomValueOp::Save { path } => {
                let body = match cv.save(Path::new(&path)) {
                    Ok(()) => message::ok_body(),
                    Err(e) => message::error_body(&e),
                };
                self.core
                    .send_frame(message::call_response_frame(call_id, body))
                    .map_err(LabeledError::from)
            }
        }
    }
}
