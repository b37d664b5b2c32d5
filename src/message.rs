//! Top-level protocol messages and their envelopes.
//!
//! Everything the engine can send is decoded into [`EngineMsg`]; everything
//! the plugin sends is built by the `*_frame` helpers. With the single
//! exception of the literal string `"Goodbye"`, every top-level message is
//! a single-entry wrapper map.

use rmpv::Value as Wire;

use crate::codec::{
    expect_array, expect_i64, expect_map, expect_str, expect_u64, map_of, unwrap_map,
    unwrap_tuple, wrap, wrap_tuple, CodecError, Span,
};
use crate::custom::{CustomCall, Ordering};
use crate::error::LabeledError;
use crate::record::Record;
use crate::value::{Value, ValueCx};

pub(crate) const PROTOCOL_NAME: &str = "nu-plugin";
pub(crate) const PROTOCOL_VERSION: &str = "0.95.0";

/// The encoding marker written once at startup: one length byte then the
/// ASCII format name.
pub(crate) const FORMAT_MARKER: &[u8] = b"\x07msgpack";

/// The `Hello` message exchanged by both sides at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub protocol: String,
    pub version: String,
    pub features: Features,
}

/// Optional protocol features advertised in [`Hello`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub local_socket: bool,
}

impl Hello {
    pub(crate) fn local(local_socket: bool) -> Hello {
        Hello {
            protocol: PROTOCOL_NAME.into(),
            version: PROTOCOL_VERSION.into(),
            features: Features { local_socket },
        }
    }

    pub(crate) fn to_wire(&self) -> Wire {
        let mut features = Vec::new();
        if self.features.local_socket {
            features.push(map_of(vec![("name", Wire::from("LocalSocket"))]));
        }
        wrap(
            "Hello",
            map_of(vec![
                ("protocol", Wire::from(self.protocol.as_str())),
                ("version", Wire::from(self.version.as_str())),
                ("features", Wire::Array(features)),
            ]),
        )
    }

    pub(crate) fn from_wire(w: Wire) -> Result<Hello, CodecError> {
        let entries = expect_map(w, "Hello")?;
        let mut hello = Hello {
            protocol: String::new(),
            version: String::new(),
            features: Features::default(),
        };
        for (k, v) in entries {
            let key = expect_str(k, "Hello key")?;
            match key.as_str() {
                "protocol" => hello.protocol = expect_str(v, "Hello protocol")?,
                "version" => hello.version = expect_str(v, "Hello version")?,
                "features" => {
                    for item in expect_array(v, "Hello features")? {
                        let feature = expect_map(item, "Hello feature")?;
                        for (fk, fv) in feature {
                            let fkey = expect_str(fk, "feature key")?;
                            if fkey == "name" {
                                let name = expect_str(fv, "feature name")?;
                                hello.features.local_socket =
                                    hello.features.local_socket || name == "LocalSocket";
                            }
                        }
                    }
                }
                // tolerate additions from newer engines
                _ => {}
            }
        }
        Ok(hello)
    }
}

/// Where the data in a stream came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    FilePath(String),
    Named(String),
}

/// Metadata attached to pipeline values and byte streams.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineMetadata {
    pub data_source: Option<DataSource>,
    pub content_type: Option<String>,
}

impl PipelineMetadata {
    fn is_empty(&self) -> bool {
        self.data_source.is_none() && self.content_type.is_none()
    }

    pub(crate) fn to_wire(&self) -> Wire {
        if self.is_empty() {
            return Wire::Nil;
        }
        let source = match &self.data_source {
            Some(DataSource::FilePath(path)) => wrap("FilePath", Wire::from(path.as_str())),
            Some(DataSource::Named(name)) => Wire::from(name.as_str()),
            None => Wire::from(""),
        };
        let content_type = match &self.content_type {
            Some(ct) => Wire::from(ct.as_str()),
            None => Wire::Nil,
        };
        map_of(vec![
            ("data_source", source),
            ("content_type", content_type),
        ])
    }

    pub(crate) fn from_wire(w: Wire) -> Result<Option<PipelineMetadata>, CodecError> {
        let entries = match w {
            Wire::Nil => return Ok(None),
            Wire::Map(entries) => entries,
            other => {
                return Err(CodecError::invalid(format!(
                    "unexpected pipeline metadata, got {}",
                    crate::codec::kind_of(&other)
                )))
            }
        };
        let mut md = PipelineMetadata::default();
        for (k, v) in entries {
            let key = expect_str(k, "metadata key")?;
            match key.as_str() {
                "data_source" => match v {
                    Wire::String(_) => {
                        let name = expect_str(v, "data_source")?;
                        if !name.is_empty() {
                            md.data_source = Some(DataSource::Named(name));
                        }
                    }
                    Wire::Map(_) => {
                        let (name, path) = unwrap_map(v, "data_source")?;
                        let path = expect_str(path, "data_source value")?;
                        md.data_source = Some(match name.as_str() {
                            "FilePath" => DataSource::FilePath(path),
                            other => DataSource::Named(other.to_string()),
                        });
                    }
                    Wire::Nil => {}
                    other => {
                        return Err(CodecError::invalid(format!(
                            "unexpected value of data_source, got {}",
                            crate::codec::kind_of(&other)
                        )))
                    }
                },
                "content_type" => {
                    md.content_type = match v {
                        Wire::Nil => None,
                        other => Some(expect_str(other, "content_type")?),
                    }
                }
                other => {
                    return Err(CodecError::invalid(format!(
                        "unexpected metadata key {other:?}"
                    )))
                }
            }
        }
        Ok(Some(md))
    }
}

/// Declared data type of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteStreamType {
    /// Binary data of unknown encoding.
    Binary,
    /// Valid UTF-8 text.
    String,
    #[default]
    Unknown,
}

impl ByteStreamType {
    fn as_str(self) -> &'static str {
        match self {
            ByteStreamType::Binary => "Binary",
            ByteStreamType::String => "String",
            ByteStreamType::Unknown => "Unknown",
        }
    }

    fn parse(s: &str) -> Result<ByteStreamType, CodecError> {
        match s {
            "Binary" => Ok(ByteStreamType::Binary),
            "String" => Ok(ByteStreamType::String),
            "Unknown" => Ok(ByteStreamType::Unknown),
            other => Err(CodecError::invalid(format!(
                "unknown byte stream type {other:?}"
            ))),
        }
    }
}

/// Header announcing a list stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListStreamInfo {
    pub id: i64,
    pub span: Span,
    pub metadata: Option<PipelineMetadata>,
}

/// Header announcing a byte stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ByteStreamInfo {
    pub id: i64,
    pub span: Span,
    pub ty: ByteStreamType,
    pub metadata: Option<PipelineMetadata>,
}

/// The header of a `PipelineData` body: either no data, a single value, or
/// the announcement of a stream whose items follow as `Data` frames.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineDataHeader {
    Empty,
    Value(Value, Option<PipelineMetadata>),
    ListStream(ListStreamInfo),
    ByteStream(ByteStreamInfo),
}

impl PipelineDataHeader {
    pub(crate) fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        Ok(match self {
            PipelineDataHeader::Empty => Wire::from("Empty"),
            PipelineDataHeader::Value(v, md) => {
                let md = match md {
                    Some(md) => md.to_wire(),
                    None => Wire::Nil,
                };
                wrap("Value", Wire::Array(vec![v.to_wire(cx)?, md]))
            }
            PipelineDataHeader::ListStream(info) => wrap(
                "ListStream",
                map_of(vec![
                    ("id", Wire::from(info.id)),
                    ("span", info.span.to_wire()),
                    (
                        "metadata",
                        info.metadata
                            .as_ref()
                            .map(PipelineMetadata::to_wire)
                            .unwrap_or(Wire::Nil),
                    ),
                ]),
            ),
            PipelineDataHeader::ByteStream(info) => wrap(
                "ByteStream",
                map_of(vec![
                    ("id", Wire::from(info.id)),
                    ("span", info.span.to_wire()),
                    ("type", Wire::from(info.ty.as_str())),
                    (
                        "metadata",
                        info.metadata
                            .as_ref()
                            .map(PipelineMetadata::to_wire)
                            .unwrap_or(Wire::Nil),
                    ),
                ]),
            ),
        })
    }

    pub(crate) fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<PipelineDataHeader, CodecError> {
        match w {
            Wire::String(_) => {
                let name = expect_str(w, "PipelineDataHeader")?;
                if name == "Empty" {
                    Ok(PipelineDataHeader::Empty)
                } else {
                    Err(CodecError::invalid(format!(
                        "expected PipelineHeader Empty, got {name:?}"
                    )))
                }
            }
            Wire::Map(_) => {
                let (tag, body) = unwrap_map(w, "PipelineDataHeader")?;
                match tag.as_str() {
                    "Value" => {
                        let mut items = expect_array(body, "PipelineDataHeader Value")?;
                        if items.len() != 2 {
                            return Err(CodecError::invalid(format!(
                                "expected two item tuple, got {} items",
                                items.len()
                            )));
                        }
                        let md = PipelineMetadata::from_wire(items.pop().unwrap())
                            .map_err(|e| e.context("decoding Value's metadata"))?;
                        let value = Value::from_wire(items.pop().unwrap(), cx)
                            .map_err(|e| e.context("decoding Value"))?;
                        Ok(PipelineDataHeader::Value(value, md))
                    }
                    "ListStream" => {
                        let mut info = ListStreamInfo::default();
                        for (k, v) in expect_map(body, "ListStream")? {
                            let key = expect_str(k, "ListStream key")?;
                            match key.as_str() {
                                "id" => info.id = expect_i64(v, "ListStream id")?,
                                "span" => info.span = Span::from_wire(v)?,
                                "metadata" => info.metadata = PipelineMetadata::from_wire(v)?,
                                other => {
                                    return Err(CodecError::invalid(format!(
                                        "unexpected key {other:?} in ListStream"
                                    )))
                                }
                            }
                        }
                        Ok(PipelineDataHeader::ListStream(info))
                    }
                    "ByteStream" => {
                        let mut info = ByteStreamInfo::default();
                        for (k, v) in expect_map(body, "ByteStream")? {
                            let key = expect_str(k, "ByteStream key")?;
                            match key.as_str() {
                                "id" => info.id = expect_i64(v, "ByteStream id")?,
                                "span" => info.span = Span::from_wire(v)?,
                                "type" => {
                                    info.ty =
                                        ByteStreamType::parse(&expect_str(v, "ByteStream type")?)?
                                }
                                "metadata" => info.metadata = PipelineMetadata::from_wire(v)?,
                                other => {
                                    return Err(CodecError::invalid(format!(
                                        "unexpected key {other:?} in ByteStream"
                                    )))
                                }
                            }
                        }
                        Ok(PipelineDataHeader::ByteStream(info))
                    }
                    other => Err(CodecError::invalid(format!(
                        "unknown PipelineDataHeader value {other:?}"
                    ))),
                }
            }
            other => Err(CodecError::invalid(format!(
                "unexpected type {} in PipelineDataHeader",
                crate::codec::kind_of(&other)
            ))),
        }
    }
}

/// Named arguments of a command invocation, in the order received.
/// A flag passed without a value decodes as [`Value::Nothing`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Named {
    items: Vec<(String, Value)>,
}

impl Named {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.items.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<Named, CodecError> {
        let items = expect_array(w, "named parameters")?;
        let mut named = Named::default();
        for (idx, item) in items.into_iter().enumerate() {
            let mut tuple = expect_array(item, "named parameter")?;
            if tuple.len() != 2 {
                return Err(CodecError::invalid(format!(
                    "NamedParams tuple should have 2 items, got {} for [{idx}]",
                    tuple.len()
                )));
            }
            let value = tuple.pop().unwrap();
            let key = tuple.pop().unwrap();

            let mut name = String::new();
            for (k, v) in expect_map(key, "named parameter key")? {
                let field = expect_str(k, "named parameter key field")?;
                match field.as_str() {
                    "item" => name = expect_str(v, "named parameter name")?,
                    "span" => {
                        Span::from_wire(v)?;
                    }
                    other => {
                        return Err(CodecError::invalid(format!(
                            "unexpected key {other:?} in named parameter"
                        )))
                    }
                }
            }

            let value = match value {
                Wire::Nil => Value::nothing(),
                other => Value::from_wire(other, cx)
                    .map_err(|e| e.context(format!("reading named params [{idx}] value")))?,
            };
            named.items.push((name, value));
        }
        Ok(named)
    }
}

impl FromIterator<(String, Value)> for Named {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Named {
            items: iter.into_iter().collect(),
        }
    }
}

/// A decoded `Call/Run` invocation.
#[derive(Debug)]
pub(crate) struct RunCall {
    pub name: String,
    pub head: Span,
    pub positional: Vec<Value>,
    pub named: Named,
    pub input: PipelineDataHeader,
}

impl RunCall {
    fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<RunCall, CodecError> {
        let mut run = RunCall {
            name: String::new(),
            head: Span::unknown(),
            positional: Vec::new(),
            named: Named::default(),
            input: PipelineDataHeader::Empty,
        };
        for (k, v) in expect_map(w, "Run")? {
            let key = expect_str(k, "Run key")?;
            match key.as_str() {
                "name" => run.name = expect_str(v, "Run name")?,
                "call" => {
                    for (ck, cv) in expect_map(v, "Run call")? {
                        let ckey = expect_str(ck, "Run call key")?;
                        match ckey.as_str() {
                            "head" => run.head = Span::from_wire(cv)?,
                            "positional" => {
                                let items = expect_array(cv, "positional parameters")?;
                                run.positional = items
                                    .into_iter()
                                    .enumerate()
                                    .map(|(i, item)| {
                                        Value::from_wire(item, cx).map_err(|e| {
                                            e.context(format!("decoding positional [{i}]"))
                                        })
                                    })
                                    .collect::<Result<_, _>>()?;
                            }
                            "named" => run.named = Named::from_wire(cv, cx)?,
                            other => {
                                return Err(CodecError::invalid(format!(
                                    "unknown key {other:?} under Run call"
                                )))
                            }
                        }
                    }
                }
                "input" => run.input = PipelineDataHeader::from_wire(v, cx)?,
                other => {
                    return Err(CodecError::invalid(format!(
                        "unknown key {other:?} under Run"
                    )))
                }
            }
        }
        Ok(run)
    }
}

/// The body of an engine-initiated `Call`.
#[derive(Debug)]
pub(crate) enum CallBody {
    Signature,
    Metadata,
    Run(RunCall),
    CustomValueOp(CustomCall),
}

/// The payload of a `Data` frame.
#[derive(Debug)]
pub(crate) enum DataBody {
    List(Value),
    Raw(Result<Vec<u8>, LabeledError>),
}

impl DataBody {
    fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<DataBody, CodecError> {
        let (tag, body) = unwrap_map(w, "Data")?;
        match tag.as_str() {
            "List" => Ok(DataBody::List(Value::from_wire(body, cx)?)),
            "Raw" => {
                let (result, payload) = unwrap_map(body, "Raw")?;
                match result.as_str() {
                    "Ok" => Ok(DataBody::Raw(Ok(crate::codec::expect_bin(
                        payload,
                        "raw data",
                    )?))),
                    "Err" => Ok(DataBody::Raw(Err(LabeledError::from_wire(payload)?))),
                    other => Err(CodecError::invalid(format!(
                        "unexpected key {other:?} under Raw"
                    ))),
                }
            }
            other => Err(CodecError::invalid(format!(
                "unexpected key {other:?} under Data"
            ))),
        }
    }

    pub(crate) fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        Ok(match self {
            DataBody::List(v) => wrap("List", v.to_wire(cx)?),
            DataBody::Raw(Ok(bytes)) => wrap("Raw", wrap("Ok", Wire::Binary(bytes.clone()))),
            DataBody::Raw(Err(e)) => wrap("Raw", wrap("Err", e.to_wire())),
        })
    }
}

/// The body of an `EngineCallResponse`.
#[derive(Debug)]
pub(crate) enum EngineReply {
    PipelineData(PipelineDataHeader),
    ValueMap(Record),
    Config(Wire),
    Identifier(u64),
    Error(LabeledError),
}

impl EngineReply {
    fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<EngineReply, CodecError> {
        let (tag, body) = unwrap_map(w, "EngineCallResponse")?;
        match tag.as_str() {
            "PipelineData" => Ok(EngineReply::PipelineData(
                PipelineDataHeader::from_wire(body, cx)
                    .map_err(|e| e.context("decoding PipelineData of EngineCallResponse"))?,
            )),
            "ValueMap" => {
                let entries = expect_map(body, "ValueMap")?;
                let mut rec = Record::with_capacity(entries.len());
                for (k, v) in entries {
                    let name = expect_str(k, "ValueMap key")?;
                    let value = Value::from_wire(v, cx)
                        .map_err(|e| e.context(format!("decoding ValueMap entry {name}")))?;
                    rec.insert(name, value);
                }
                Ok(EngineReply::ValueMap(rec))
            }
            "Config" => Ok(EngineReply::Config(body)),
            "Identifier" => Ok(EngineReply::Identifier(expect_u64(body, "Identifier")?)),
            "Error" => Ok(EngineReply::Error(LabeledError::from_wire(body)?)),
            other => Err(CodecError::invalid(format!(
                "unexpected EngineCallResponse key {other:?}"
            ))),
        }
    }
}

/// A decoded top-level message from the engine.
#[derive(Debug)]
pub(crate) enum EngineMsg {
    Hello(Hello),
    Call { id: i64, body: CallBody },
    Data { id: i64, body: DataBody },
    Ack(i64),
    End(i64),
    Drop(i64),
    EngineCallResponse { id: i64, reply: EngineReply },
    Signal(String),
    Goodbye,
}

/// Decode one top-level frame into an [`EngineMsg`].
pub(crate) fn decode_engine_msg(frame: Wire, cx: &ValueCx<'_>) -> Result<EngineMsg, CodecError> {
    if let Wire::String(_) = &frame {
        let s = expect_str(frame, "message")?;
        return if s == "Goodbye" {
            Ok(EngineMsg::Goodbye)
        } else {
            Err(CodecError::invalid(format!("unknown message {s:?}")))
        };
    }

    let (tag, body) = unwrap_map(frame, "decode message's map")?;
    match tag.as_str() {
        "Hello" => Ok(EngineMsg::Hello(Hello::from_wire(body)?)),
        "Call" => {
            let (id, payload) = unwrap_tuple(body, "Call")?;
            let call = match payload {
                Wire::String(_) => {
                    let name = expect_str(payload, "Call command")?;
                    match name.as_str() {
                        "Signature" => CallBody::Signature,
                        "Metadata" => CallBody::Metadata,
                        other => {
                            return Err(CodecError::invalid(format!(
                                "unknown Call command {other:?}"
                            )))
                        }
                    }
                }
                Wire::Map(_) => {
                    let (kind, inner) = unwrap_map(payload, "Call")?;
                    match kind.as_str() {
                        "Run" => CallBody::Run(
                            RunCall::from_wire(inner, cx).map_err(|e| e.context("decoding Run"))?,
                        ),
                        "CustomValueOp" => {
                            CallBody::CustomValueOp(CustomCall::from_wire(inner, cx)?)
                        }
                        other => {
                            return Err(CodecError::invalid(format!(
                                "unknown Call type {other:?}"
                            )))
                        }
                    }
                }
                other => {
                    return Err(CodecError::invalid(format!(
                        "unsupported Call value: {}",
                        crate::codec::kind_of(&other)
                    )))
                }
            };
            Ok(EngineMsg::Call { id, body: call })
        }
        "Data" => {
            let (id, payload) = unwrap_tuple(body, "Data")?;
            Ok(EngineMsg::Data {
                id,
                body: DataBody::from_wire(payload, cx)?,
            })
        }
        "Ack" => Ok(EngineMsg::Ack(expect_i64(body, "Ack")?)),
        "End" => Ok(EngineMsg::End(expect_i64(body, "End")?)),
        "Drop" => Ok(EngineMsg::Drop(expect_i64(body, "Drop")?)),
        "EngineCallResponse" => {
            let (id, payload) = unwrap_tuple(body, "EngineCallResponse")?;
            Ok(EngineMsg::EngineCallResponse {
                id,
                reply: EngineReply::from_wire(payload, cx)
                    .map_err(|e| e.context("decode value type of EngineCallResponse"))?,
            })
        }
        "Signal" => Ok(EngineMsg::Signal(expect_str(body, "Signal")?)),
        other => Err(CodecError::invalid(format!("unknown message {other:?}"))),
    }
}

// ---------------------------------------------------------------------------
// outbound frames
// ---------------------------------------------------------------------------

pub(crate) fn call_response_frame(id: i64, body: Wire) -> Wire {
    wrap_tuple("CallResponse", id, body)
}

pub(crate) fn pipeline_data_body(
    header: &PipelineDataHeader,
    cx: &ValueCx<'_>,
) -> Result<Wire, CodecError> {
    Ok(wrap("PipelineData", header.to_wire(cx)?))
}

pub(crate) fn error_body(err: &LabeledError) -> Wire {
    wrap("Error", err.to_wire())
}

pub(crate) fn metadata_body(version: &str) -> Wire {
    wrap("Metadata", map_of(vec![("version", Wire::from(version))]))
}

pub(crate) fn ordering_body(ordering: Ordering) -> Wire {
    ordering.to_wire()
}

pub(crate) fn ok_body() -> Wire {
    Wire::from("Ok")
}

pub(crate) fn data_frame(id: i64, body: &DataBody, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
    Ok(wrap_tuple("Data", id, body.to_wire(cx)?))
}

pub(crate) fn ack_frame(id: i64) -> Wire {
    wrap("Ack", Wire::from(id))
}

pub(crate) fn end_frame(id: i64) -> Wire {
    wrap("End", Wire::from(id))
}

pub(crate) fn drop_frame(id: i64) -> Wire {
    wrap("Drop", Wire::from(id))
}

pub(crate) fn engine_call_frame(id: i64, context: i64, call: Wire) -> Wire {
    wrap(
        "EngineCall",
        map_of(vec![
            ("id", Wire::from(id)),
            ("context", Wire::from(context)),
            ("call", call),
        ]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::{CustomStore, IdSource};

    fn cx_parts() -> (IdSource, CustomStore) {
        (IdSource::default(), CustomStore::default())
    }

    #[test]
    fn hello_roundtrip() {
        for local_socket in [false, true] {
            let hello = Hello::local(local_socket);
            let wire = hello.to_wire();
            let (tag, body) = unwrap_map(wire, "message").unwrap();
            assert_eq!(tag, "Hello");
            let back = Hello::from_wire(body).unwrap();
            assert_eq!(hello, back);
        }
    }

    #[test]
    fn goodbye_is_a_bare_string() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let msg = decode_engine_msg(Wire::from("Goodbye"), &cx).unwrap();
        assert!(matches!(msg, EngineMsg::Goodbye));

        let err = decode_engine_msg(Wire::from("farewell"), &cx).unwrap_err();
        assert_eq!(err.to_string(), "unknown message \"farewell\"");
    }

    #[test]
    fn unknown_top_level_tag_is_diagnosed() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let err = decode_engine_msg(wrap("Wave", Wire::Nil), &cx).unwrap_err();
        assert_eq!(err.to_string(), "unknown message \"Wave\"");
    }

    #[test]
    fn signature_and_metadata_calls_decode() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let msg = decode_engine_msg(wrap_tuple("Call", 1, Wire::from("Signature")), &cx).unwrap();
        assert!(matches!(
            msg,
            EngineMsg::Call {
                id: 1,
                body: CallBody::Signature
            }
        ));

        let msg = decode_engine_msg(wrap_tuple("Call", 2, Wire::from("Metadata")), &cx).unwrap();
        assert!(matches!(
            msg,
            EngineMsg::Call {
                id: 2,
                body: CallBody::Metadata
            }
        ));

        let err = decode_engine_msg(wrap_tuple("Call", 3, Wire::from("Dance")), &cx).unwrap_err();
        assert_eq!(err.to_string(), "unknown Call command \"Dance\"");
    }

    #[test]
    fn run_call_decodes() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let run = map_of(vec![
            ("name", Wire::from("inc")),
            (
                "call",
                map_of(vec![
                    ("head", Span::new(5, 8).to_wire()),
                    (
                        "positional",
                        Wire::Array(vec![Value::string("arg").to_wire(&cx).unwrap()]),
                    ),
                    (
                        "named",
                        Wire::Array(vec![Wire::Array(vec![
                            map_of(vec![
                                ("item", Wire::from("fast")),
                                ("span", Span::unknown().to_wire()),
                            ]),
                            Wire::Nil,
                        ])]),
                    ),
                ]),
            ),
            ("input", Wire::from("Empty")),
        ]);
        let frame = wrap_tuple("Call", 7, wrap("Run", run));
        let msg = decode_engine_msg(frame, &cx).unwrap();
        match msg {
            EngineMsg::Call {
                id: 7,
                body: CallBody::Run(run),
            } => {
                assert_eq!(run.name, "inc");
                assert_eq!(run.head, Span::new(5, 8));
                assert_eq!(run.positional, vec![Value::string("arg")]);
                // a flag passed with wire-nil value decodes as Nothing
                assert_eq!(run.named.get("fast"), Some(&Value::nothing()));
                assert_eq!(run.input, PipelineDataHeader::Empty);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn data_frames_roundtrip() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let list = DataBody::List(Value::string("v1"));
        let frame = data_frame(4, &list, &cx).unwrap();
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::Data {
                id: 4,
                body: DataBody::List(v),
            } => assert_eq!(v, Value::string("v1")),
            other => panic!("unexpected {other:?}"),
        }

        let raw = DataBody::Raw(Ok(b"chunk".to_vec()));
        let frame = data_frame(5, &raw, &cx).unwrap();
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::Data {
                id: 5,
                body: DataBody::Raw(Ok(bytes)),
            } => assert_eq!(bytes, b"chunk"),
            other => panic!("unexpected {other:?}"),
        }

        let raw_err = DataBody::Raw(Err(LabeledError::new("stream failed")));
        let frame = data_frame(6, &raw_err, &cx).unwrap();
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::Data {
                id: 6,
                body: DataBody::Raw(Err(e)),
            } => assert_eq!(e.msg, "stream failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ack_end_drop_roundtrip() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        assert!(matches!(
            decode_engine_msg(ack_frame(1), &cx).unwrap(),
            EngineMsg::Ack(1)
        ));
        assert!(matches!(
            decode_engine_msg(end_frame(2), &cx).unwrap(),
            EngineMsg::End(2)
        ));
        assert!(matches!(
            decode_engine_msg(drop_frame(3), &cx).unwrap(),
            EngineMsg::Drop(3)
        ));
    }

    #[test]
    fn pipeline_header_roundtrip() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let headers = vec![
            PipelineDataHeader::Empty,
            PipelineDataHeader::Value(Value::int(42), None),
            PipelineDataHeader::Value(
                Value::string("x"),
                Some(PipelineMetadata {
                    data_source: Some(DataSource::FilePath("/tmp/data.json".into())),
                    content_type: Some("application/json".into()),
                }),
            ),
            PipelineDataHeader::ListStream(ListStreamInfo {
                id: 9,
                span: Span::new(1, 2),
                metadata: None,
            }),
            PipelineDataHeader::ByteStream(ByteStreamInfo {
                id: 10,
                span: Span::unknown(),
                ty: ByteStreamType::String,
                metadata: None,
            }),
        ];
        for header in headers {
            let wire = header.to_wire(&cx).unwrap();
            let back = PipelineDataHeader::from_wire(wire, &cx).unwrap();
            assert_eq!(header, back);
        }
    }

    #[test]
    fn pipeline_header_rejects_unknown_tag() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let err = PipelineDataHeader::from_wire(wrap("TupleStream", Wire::Nil), &cx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown PipelineDataHeader value \"TupleStream\""
        );

        let err = PipelineDataHeader::from_wire(Wire::from("Full"), &cx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected PipelineHeader Empty, got \"Full\""
        );
    }

    #[test]
    fn engine_call_response_bodies_decode() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let frame = wrap_tuple(
            "EngineCallResponse",
            1,
            wrap("PipelineData", Wire::from("Empty")),
        );
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::EngineCallResponse {
                id: 1,
                reply: EngineReply::PipelineData(PipelineDataHeader::Empty),
            } => {}
            other => panic!("unexpected {other:?}"),
        }

        let frame = wrap_tuple(
            "EngineCallResponse",
            2,
            wrap(
                "ValueMap",
                map_of(vec![(
                    "HOME",
                    Value::string("/home/u").to_wire(&cx).unwrap(),
                )]),
            ),
        );
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::EngineCallResponse {
                id: 2,
                reply: EngineReply::ValueMap(rec),
            } => assert_eq!(rec["HOME"], Value::string("/home/u")),
            other => panic!("unexpected {other:?}"),
        }

        let frame = wrap_tuple(
            "EngineCallResponse",
            3,
            wrap("Identifier", Wire::from(88u64)),
        );
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::EngineCallResponse {
                id: 3,
                reply: EngineReply::Identifier(88),
            } => {}
            other => panic!("unexpected {other:?}"),
        }

        let frame = wrap_tuple(
            "EngineCallResponse",
            4,
            wrap("Error", LabeledError::new("nope").to_wire()),
        );
        match decode_engine_msg(frame, &cx).unwrap() {
            EngineMsg::EngineCallResponse {
                id: 4,
                reply: EngineReply::Error(e),
            } => assert_eq!(e.msg, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn metadata_empty_encodes_as_nil() {
        let md = PipelineMetadata::default();
        assert_eq!(md.to_wire(), Wire::Nil);
        assert_eq!(PipelineMetadata::from_wire(Wire::Nil).unwrap(), None);
    }
}
