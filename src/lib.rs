//! nuplug: the Nushell plugin protocol runtime
//!
//! This library implements the plugin side of the shell's plugin
//! protocol: a framed, self-describing MessagePack codec, a multiplexed
//! streaming layer with per-item flow control, and a threaded dispatch
//! core that drives command handlers concurrently over a single byte
//! pipe.
//!
//! ## Architecture
//!
//! ```text
//! engine ──bytes──► reader thread ──► dispatch ──► handler thread × N
//!                                        │              │
//!                                        ▼              ▼
//!                                  input streams   output streams
//!                                        └──── writer mutex ────► bytes ──► engine
//! ```
//!
//! ## Protocol overview
//!
//! 1. The plugin writes the encoding marker and a `Hello` frame
//! 2. The engine invokes commands with `Call` frames; the plugin answers
//!    each with exactly one `CallResponse`
//! 3. Streamed data flows as `Data` frames under `Ack`/`End`/`Drop` flow
//!    control, one unacknowledged frame per stream
//! 4. Handlers may interrogate the engine mid-call via `EngineCall`
//! 5. The session ends on `Goodbye`, an Interrupt signal, or EOF
//!
//! ## Example
//!
//! ```no_run
//! use nuplug::{
//!     Command, Config, IoPair, PluginRuntime, Signature, Type, Value,
//! };
//!
//! let inc = Command::new(
//!     Signature::build("inc")
//!         .description("add one to the input")
//!         .category("Experimental")
//!         .search_terms(vec!["math".into()])
//!         .input_output(Type::Int, Type::Int),
//!     |ctx| {
//!         let n = match ctx.take_input() {
//!             nuplug::Input::Value(v) => v.as_int().unwrap_or(0),
//!             _ => 0,
//!         };
//!         ctx.return_value(Value::int(n + 1))?;
//!         Ok(())
//!     },
//! );
//!
//! let runtime = PluginRuntime::new(vec![inc], "0.1.0", Config::default())?;
//! runtime.run(IoPair::from_args(std::env::args())?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cancel;
mod cell_path;
mod codec;
mod command;
mod config;
mod convert;
mod custom;
mod engine_call;
mod error;
mod exec;
mod message;
mod operator;
mod plugin;
mod range;
mod record;
mod shape;
mod stream_in;
mod stream_out;
mod ty;
mod value;


pub use cancel::CancelCause;
pub use cell_path::{Casing, CellPath, PathMember};
pub use codec::{CodecError, Span};
pub use command::{Command, Example, Flag, Handler, PositionalArg, Signature};
pub use config::{Config, IoPair};
pub use convert::{to_value, IntoValue};
pub use custom::{CustomValue, Ordering};
pub use engine_call::{ClosureCall, ClosureInput};
pub use error::{ErrorLabel, LabeledError};
pub use exec::{ByteStreamOptions, CallContext, Input};
pub use message::{
    ByteStreamType, DataSource, Features, Hello, Named, PipelineMetadata,
};
pub use operator::Operator;
pub use plugin::{PluginRuntime, RuntimeError, Shutdown};
pub use range::{IntRange, IntRangeIter, RangeBound};
pub use record::Record;
pub use shape::SyntaxShape;
pub use stream_in::{ByteStreamReader, ListStreamReader};
pub use stream_out::{ByteStreamWriter, ListStreamSender, StreamError};
pub use ty::Type;
pub use value::{Closure, Value};

// closure captures and the engine config are carried as raw MessagePack
// trees; re-exported so embedders can name the type
pub use rmpv;
