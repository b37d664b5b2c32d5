//! Engine calls: requests the plugin makes back to the engine while a
//! command is running.
//!
//! Each call registers a single-shot response channel under a fresh
//! engine-call id, sends an `EngineCall` frame citing the originating
//! call, and blocks until the matching `EngineCallResponse` arrives or
//! the call's scope is cancelled.

use std::io::Read;

use crossbeam_channel::{select, Receiver};
use rmpv::Value as Wire;

use crate::codec::{map_of, wrap, Span};
use crate::error::LabeledError;
use crate::exec::{ByteStreamOptions, CallContext, Input};
use crate::message::{EngineReply, PipelineDataHeader};
use crate::record::Record;
use crate::value::Value;

/// Input piped into an [`eval_closure`](CallContext::eval_closure) call.
pub enum ClosureInput {
    Empty,
    Value(Value),
    /// Stream the items as a list stream fed from this iterator.
    List(Box<dyn Iterator<Item = Value> + Send>),
    /// Stream the reader's bytes as a raw stream.
    Raw(Box<dyn Read + Send>),
}

/// A closure evaluation request for the engine.
pub struct ClosureCall {
    closure: Value,
    positional: Vec<Value>,
    input: ClosureInput,
    redirect_stdout: bool,
    redirect_stderr: bool,
}

impl ClosureCall {
    /// The value must be a [`Value::Closure`]; anything else fails at
    /// evaluation time.
    pub fn new(closure: Value) -> ClosureCall {
        ClosureCall {
            closure,
            positional: Vec::new(),
            input: ClosureInput::Empty,
            redirect_stdout: false,
            redirect_stderr: false,
        }
    }

    /// Positional arguments for the closure.
    pub fn positional(mut self, args: Vec<Value>) -> Self {
        self.positional = args;
        self
    }

    /// Single-value input for the closure.
    pub fn input_value(mut self, value: Value) -> Self {
        self.input = ClosureInput::Value(value);
        self
    }

    /// List-stream input fed from an iterator.
    pub fn input_list<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        self.input = ClosureInput::List(Box::new(items.into_iter()));
        self
    }

    /// Raw-stream input fed from a reader.
    pub fn input_raw(mut self, reader: impl Read + Send + 'static) -> Self {
        self.input = ClosureInput::Raw(Box::new(reader));
        self
    }

    pub fn redirect_stdout(mut self) -> Self {
        self.redirect_stdout = true;
        self
    }

    pub fn redirect_stderr(mut self) -> Self {
        self.redirect_stderr = true;
        self
    }
}

impl CallContext {
    /// Send an engine call and wait for its reply, honoring cancellation.
    fn engine_call(&self, call: Wire) -> Result<EngineReply, LabeledError> {
        let (id, rx) = self.core.register_engine_call();
        if let Err(e) = self
            .core
            .send_frame(crate::message::engine_call_frame(id, self.call_id, call))
        {
            self.core.forget_engine_call(id);
            return Err(LabeledError::new(format!("sending engine call: {e}")));
        }
        self.wait_reply(rx)
    }

    fn wait_reply(&self, rx: Receiver<EngineReply>) -> Result<EngineReply, LabeledError> {
        select! {
            recv(rx) -> reply => {
                reply.map_err(|_| LabeledError::new("engine call response channel closed"))
            }
            recv(self.cancel.done()) -> _ => Err(LabeledError::new(
                self.cancel
                    .cause()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "call cancelled".into()),
            )),
        }
    }

    /// Reduce a reply to its optional single value.
    fn value_reply(&self, reply: EngineReply) -> Result<Option<Value>, LabeledError> {
        match reply {
            EngineReply::PipelineData(PipelineDataHeader::Empty) => Ok(None),
            EngineReply::PipelineData(PipelineDataHeader::Value(v, _)) => Ok(Some(v)),
            EngineReply::Identifier(n) => Ok(Some(Value::int(n as i64))),
            EngineReply::Error(e) => Err(e),
            other => Err(LabeledError::new(format!(
                "unexpected engine response {other:?}"
            ))),
        }
    }

    /// The plugin's configuration from the engine's `$env.config.plugins`
    /// section; `None` when no configuration is set.
    pub fn get_plugin_config(&self) -> Result<Option<Value>, LabeledError> {
        let reply = self.engine_call(Wire::from("GetPluginConfig"))?;
        self.value_reply(reply)
    }

    /// The engine's configuration record, opaque to the runtime.
    pub fn get_config(&self) -> Result<Wire, LabeledError> {
        match self.engine_call(Wire::from("GetConfig"))? {
            EngineReply::Config(cfg) => Ok(cfg),
            EngineReply::Error(e) => Err(e),
            other => Err(LabeledError::new(format!(
                "unexpected engine response {other:?}"
            ))),
        }
    }

    /// An environment variable from the caller's scope, or `None` when it
    /// is not present.
    pub fn get_env_var(&self, name: &str) -> Result<Option<Value>, LabeledError> {
        let reply = self.engine_call(wrap("GetEnvVar", Wire::from(name)))?;
        self.value_reply(reply)
    }

    /// All environment variables from the caller's scope.
    pub fn get_env_vars(&self) -> Result<Record, LabeledError> {
        match self.engine_call(Wire::from("GetEnvVars"))? {
            EngineReply::ValueMap(rec) => Ok(rec),
            EngineReply::PipelineData(PipelineDataHeader::Empty) => Ok(Record::new()),
            EngineReply::Error(e) => Err(e),
            other => Err(LabeledError::new(format!(
                "unexpected engine response {other:?}"
            ))),
        }
    }

    /// Set an environment variable in the caller's scope. Only propagates
    /// if called before the call's response is sent.
    pub fn add_env_var(&self, name: &str, value: Value) -> Result<(), LabeledError> {
        let value = value.to_wire(&self.core.cx())?;
        let reply = self.engine_call(wrap(
            "AddEnvVar",
            Wire::Array(vec![Wire::from(name), value]),
        ))?;
        match self.value_reply(reply)? {
            None => Ok(()),
            Some(v) => Err(LabeledError::new(format!(
                "unexpected return value {v:?}"
            ))),
        }
    }

    /// The current directory of the caller's scope, always absolute.
    pub fn get_current_dir(&self) -> Result<String, LabeledError> {
        let reply = self.engine_call(Wire::from("GetCurrentDir"))?;
        match self.value_reply(reply)? {
            Some(v) => v
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| {
                    LabeledError::new(format!("expected string, got {}", v.type_name()))
                }),
            None => Ok(String::new()),
        }
    }

    /// Fully formatted help text for the current command.
    pub fn get_help(&self) -> Result<String, LabeledError> {
        let reply = self.engine_call(Wire::from("GetHelp"))?;
        match self.value_reply(reply)? {
            Some(v) => v
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| {
                    LabeledError::new(format!("expected string, got {}", v.type_name()))
                }),
            None => Ok(String::new()),
        }
    }

    /// The source text the given span refers to.
    pub fn get_span_contents(&self, span: Span) -> Result<Vec<u8>, LabeledError> {
        let reply = self.engine_call(wrap("GetSpanContents", span.to_wire()))?;
        match self.value_reply(reply)? {
            Some(Value::Binary { val, .. }) => Ok(val),
            Some(v) => Err(LabeledError::new(format!(
                "expected binary, got {}",
                v.type_name()
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// Move the plugin to the foreground process group for direct
    /// terminal access. Returns the process group id the plugin should
    /// join, when the engine supplies one; applying it is the embedder's
    /// job. Fails if the plugin is already in the foreground.
    pub fn enter_foreground(&self) -> Result<Option<i64>, LabeledError> {
        let reply = self.engine_call(Wire::from("EnterForeground"))?;
        match self.value_reply(reply)? {
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                LabeledError::new(format!("expected pgid to be int, got {}", v.type_name()))
            }),
            None => Ok(None),
        }
    }

    /// Reset the state set by [`enter_foreground`](Self::enter_foreground).
    pub fn leave_foreground(&self) -> Result<(), LabeledError> {
        let reply = self.engine_call(Wire::from("LeaveForeground"))?;
        match self.value_reply(reply)? {
            None => Ok(()),
            Some(v) => Err(LabeledError::new(format!(
                "unexpected non-empty response: {v:?}"
            ))),
        }
    }

    /// Ask the engine to evaluate a closure. The result follows the same
    /// shape universe as command input: nothing, a single value, or a
    /// stream.
    pub fn eval_closure(&self, call: ClosureCall) -> Result<Input, LabeledError> {
        let Value::Closure {
            val: closure,
            span: closure_span,
        } = &call.closure
        else {
            return Err(LabeledError::new(format!(
                "closure value must be of type Closure, got {}",
                call.closure.type_name()
            )));
        };

        // a stream input registers its output stream here; its id is
        // introduced by the EngineCall payload sent below, and only then
        // does the feeder start producing Data frames
        let mut feeder: Option<Box<dyn FnOnce() + Send>> = None;
        let input_header = match call.input {
            ClosureInput::Empty => PipelineDataHeader::Empty,
            ClosureInput::Value(v) => PipelineDataHeader::Value(v, None),
            ClosureInput::List(items) => {
                let (info, sender, _keeper) =
                    self.core.start_list_output(&self.cancel, *closure_span);
                let header = PipelineDataHeader::ListStream(info);
                feeder = Some(Box::new(move || {
                    for v in items {
                        if sender.send(v).is_err() {
                            break;
                        }
                    }
                }));
                header
            }
            ClosureInput::Raw(mut reader) => {
                let (info, mut writer, _keeper) = self.core.start_raw_output(
                    &self.cancel,
                    *closure_span,
                    &ByteStreamOptions::default(),
                );
                let header = PipelineDataHeader::ByteStream(info);
                feeder = Some(Box::new(move || {
                    if let Err(e) = std::io::copy(&mut reader, &mut writer) {
                        tracing::error!(error = %e, "feeding closure raw input");
                    }
                }));
                header
            }
        };

        let cx = self.core.cx();
        let positional = call
            .positional
            .iter()
            .map(|v| v.to_wire(&cx))
            .collect::<Result<Vec<_>, _>>()?;
        let query = wrap(
            "EvalClosure",
            map_of(vec![
                (
                    "closure",
                    map_of(vec![
                        ("item", closure.to_wire()),
                        ("span", closure_span.to_wire()),
                    ]),
                ),
                ("positional", Wire::Array(positional)),
                ("input", input_header.to_wire(&cx)?),
                ("redirect_stdout", Wire::from(call.redirect_stdout)),
                ("redirect_stderr", Wire::from(call.redirect_stderr)),
            ]),
        );

        let (id, rx) = self.core.register_engine_call();
        if let Err(e) = self
            .core
            .send_frame(crate::message::engine_call_frame(id, self.call_id, query))
        {
            self.core.forget_engine_call(id);
            return Err(LabeledError::new(format!("sending engine call: {e}")));
        }
        if let Some(feed) = feeder {
            self.core.spawn("closure-input", feed);
        }

        match self.wait_reply(rx)? {
            EngineReply::PipelineData(header) => {
                Ok(self.core.materialize_input(header, &self.cancel))
            }
            EngineReply::Error(e) => Err(e),
            other => Err(LabeledError::new(format!(
                "unexpected engine response {other:?}"
            ))),
        }
    }
}
