//! The tagged value universe exchanged with the engine.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use rmpv::Value as Wire;

use crate::cell_path::CellPath;
use crate::codec::{
    expect_bin, expect_bool, expect_f64, expect_i64, expect_map, expect_str, expect_u64, map_of,
    unwrap_map, wrap, CodecError, Span,
};
use crate::custom::{decode_custom_value, encode_custom_value, CustomStore, CustomValue, IdSource};
use crate::error::LabeledError;
use crate::range::IntRange;
use crate::record::Record;

/// A reference to a parsed block of engine code with captured variables.
///
/// The captures are opaque to the plugin and round-tripped exactly; the
/// intended use of a closure is as an argument to the `EvalClosure`
/// engine call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Closure {
    pub block_id: u64,
    /// Raw capture data, `None` when the engine sent wire-nil.
    pub captures: Option<Wire>,
}

impl Closure {
    pub(crate) fn to_wire(&self) -> Wire {
        map_of(vec![
            ("block_id", Wire::from(self.block_id)),
            (
                "captures",
                self.captures.clone().unwrap_or(Wire::Nil),
            ),
        ])
    }

    fn from_wire(w: Wire) -> Result<Closure, CodecError> {
        let entries = expect_map(w, "Closure")?;
        if entries.len() != 2 {
            return Err(CodecError::invalid(format!(
                "expected Closure to contain 2 keys, got {}",
                entries.len()
            )));
        }
        let mut closure = Closure::default();
        for (k, v) in entries {
            let key = expect_str(k, "Closure key")?;
            match key.as_str() {
                "block_id" => closure.block_id = expect_u64(v, "Closure block_id")?,
                "captures" => {
                    closure.captures = match v {
                        Wire::Nil => None,
                        other => Some(other),
                    }
                }
                other => {
                    return Err(CodecError::invalid(format!(
                        "unexpected key {other:?} in Closure"
                    )))
                }
            }
        }
        Ok(closure)
    }
}

/// Context threaded through value encode/decode: the process-wide id
/// counter and the live custom-value table. Encoding a custom value
/// assigns a handle and registers the instance; decoding one resolves the
/// handle back to the live instance.
pub(crate) struct ValueCx<'a> {
    pub(crate) ids: &'a IdSource,
    pub(crate) customs: &'a CustomStore,
}

/// A value in the engine's data model.
///
/// Exactly one variant tag is encoded as the single key of a wrapper map;
/// every variant carries its payload and a [`Span`].
#[derive(Debug, Clone)]
pub enum Value {
    Nothing {
        span: Span,
    },
    Bool {
        val: bool,
        span: Span,
    },
    Int {
        val: i64,
        span: Span,
    },
    Float {
        val: f64,
        span: Span,
    },
    /// A count of bytes.
    Filesize {
        val: i64,
        span: Span,
    },
    /// Nanoseconds.
    Duration {
        val: i64,
        span: Span,
    },
    Date {
        val: DateTime<FixedOffset>,
        span: Span,
    },
    String {
        val: String,
        span: Span,
    },
    Binary {
        val: Vec<u8>,
        span: Span,
    },
    Record {
        val: Record,
        span: Span,
    },
    List {
        vals: Vec<Value>,
        span: Span,
    },
    /// A filesystem glob; `no_expand` disables wildcard expansion.
    Glob {
        val: String,
        no_expand: bool,
        span: Span,
    },
    Closure {
        val: Closure,
        span: Span,
    },
    /// An engine block handle.
    Block {
        val: u64,
        span: Span,
    },
    Range {
        val: IntRange,
        span: Span,
    },
    CellPath {
        val: CellPath,
        span: Span,
    },
    Error {
        val: LabeledError,
        span: Span,
    },
    Custom {
        val: Arc<dyn CustomValue>,
        span: Span,
    },
}

impl Value {
    pub fn nothing() -> Value {
        Value::Nothing {
            span: Span::unknown(),
        }
    }

    pub fn bool(val: bool) -> Value {
        Value::Bool {
            val,
            span: Span::unknown(),
        }
    }

    pub fn int(val: i64) -> Value {
        Value::Int {
            val,
            span: Span::unknown(),
        }
    }

    pub fn float(val: f64) -> Value {
        Value::Float {
            val,
            span: Span::unknown(),
        }
    }

    pub fn filesize(val: i64) -> Value {
        Value::Filesize {
            val,
            span: Span::unknown(),
        }
    }

    /// Duration in nanoseconds.
    pub fn duration(val: i64) -> Value {
        Value::Duration {
            val,
            span: Span::unknown(),
        }
    }

    pub fn date(val: DateTime<FixedOffset>) -> Value {
        Value::Date {
            val,
            span: Span::unknown(),
        }
    }

    pub fn string(val: impl Into<String>) -> Value {
        Value::String {
            val: val.into(),
            span: Span::unknown(),
        }
    }

    pub fn binary(val: impl Into<Vec<u8>>) -> Value {
        Value::Binary {
            val: val.into(),
            span: Span::unknown(),
        }
    }

    pub fn record(val: Record) -> Value {
        Value::Record {
            val,
            span: Span::unknown(),
        }
    }

    pub fn list(vals: Vec<Value>) -> Value {
        Value::List {
            vals,
            span: Span::unknown(),
        }
    }

    pub fn glob(val: impl Into<String>, no_expand: bool) -> Value {
        Value::Glob {
            val: val.into(),
            no_expand,
            span: Span::unknown(),
        }
    }

    pub fn closure(val: Closure) -> Value {
        Value::Closure {
            val,
            span: Span::unknown(),
        }
    }

    pub fn block(val: u64) -> Value {
        Value::Block {
            val,
            span: Span::unknown(),
        }
    }

    pub fn range(val: IntRange) -> Value {
        Value::Range {
            val,
            span: Span::unknown(),
        }
    }

    pub fn cell_path(val: CellPath) -> Value {
        Value::CellPath {
            val,
            span: Span::unknown(),
        }
    }

    pub fn error(val: LabeledError) -> Value {
        Value::Error {
            val,
            span: Span::unknown(),
        }
    }

    pub fn custom(val: Arc<dyn CustomValue>) -> Value {
        Value::Custom {
            val,
            span: Span::unknown(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Value {
        *self.span_mut() = span;
        self
    }

    pub fn span(&self) -> Span {
        *match self {
            Value::Nothing { span }
            | Value::Bool { span, .. }
            | Value::Int { span, .. }
            | Value::Float { span, .. }
            | Value::Filesize { span, .. }
            | Value::Duration { span, .. }
            | Value::Date { span, .. }
            | Value::String { span, .. }
            | Value::Binary { span, .. }
            | Value::Record { span, .. }
            | Value::List { span, .. }
            | Value::Glob { span, .. }
            | Value::Closure { span, .. }
            | Value::Block { span, .. }
            | Value::Range { span, .. }
            | Value::CellPath { span, .. }
            | Value::Error { span, .. }
            | Value::Custom { span, .. } => span,
        }
    }

    fn span_mut(&mut self) -> &mut Span {
        match self {
            Value::Nothing { span }
            | Value::Bool { span, .. }
            | Value::Int { span, .. }
            | Value::Float { span, .. }
            | Value::Filesize { span, .. }
            | Value::Duration { span, .. }
            | Value::Date { span, .. }
            | Value::String { span, .. }
            | Value::Binary { span, .. }
            | Value::Record { span, .. }
            | Value::List { span, .. }
            | Value::Glob { span, .. }
            | Value::Closure { span, .. }
            | Value::Block { span, .. }
            | Value::Range { span, .. }
            | Value::CellPath { span, .. }
            | Value::Error { span, .. }
            | Value::Custom { span, .. } => span,
        }
    }

    /// The wrapper-map tag this value encodes under.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing { .. } => "Nothing",
            Value::Bool { .. } => "Bool",
            Value::Int { .. } => "Int",
            Value::Float { .. } => "Float",
            Value::Filesize { .. } => "Filesize",
            Value::Duration { .. } => "Duration",
            Value::Date { .. } => "Date",
            Value::String { .. } => "String",
            Value::Binary { .. } => "Binary",
            Value::Record { .. } => "Record",
            Value::List { .. } => "List",
            Value::Glob { .. } => "Glob",
            Value::Closure { .. } => "Closure",
            Value::Block { .. } => "Block",
            Value::Range { .. } => "Range",
            Value::CellPath { .. } => "CellPath",
            Value::Error { .. } => "Error",
            Value::Custom { .. } => "Custom",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String { val, .. } => Some(val),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int { val, .. } => Some(*val),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float { val, .. } => Some(*val),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool { val, .. } => Some(*val),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary { val, .. } => Some(val),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record { val, .. } => Some(val),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List { vals, .. } => Some(vals),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match self {
            Value::Closure { val, .. } => Some(val),
            _ => None,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing { .. })
    }

    pub(crate) fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let span = ("span", self.span().to_wire());
        let wire = match self {
            Value::Nothing { .. } => wrap("Nothing", map_of(vec![span])),
            Value::Bool { val, .. } => {
                wrap("Bool", map_of(vec![("val", Wire::from(*val)), span]))
            }
            Value::Int { val, .. } => wrap("Int", map_of(vec![("val", Wire::from(*val)), span])),
            Value::Float { val, .. } => {
                wrap("Float", map_of(vec![("val", Wire::F64(*val)), span]))
            }
            Value::Filesize { val, .. } => {
                wrap("Filesize", map_of(vec![("val", Wire::from(*val)), span]))
            }
            Value::Duration { val, .. } => {
                wrap("Duration", map_of(vec![("val", Wire::from(*val)), span]))
            }
            Value::Date { val, .. } => wrap(
                "Date",
                map_of(vec![
                    (
                        "val",
                        Wire::from(val.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                    ),
                    span,
                ]),
            ),
            Value::String { val, .. } => {
                wrap("String", map_of(vec![("val", Wire::from(val.as_str())), span]))
            }
            // a zero-length bin, never wire-nil: the engine rejects nil here
            Value::Binary { val, .. } => wrap(
                "Binary",
                map_of(vec![("val", Wire::Binary(val.clone())), span]),
            ),
            Value::Record { val, .. } => {
                let mut entries = Vec::with_capacity(val.len());
                for (k, v) in val.iter() {
                    let vw = v
                        .to_wire(cx)
                        .map_err(|e| e.context(format!("encode record field {k} value")))?;
                    entries.push((Wire::from(k), vw));
                }
                wrap(
                    "Record",
                    map_of(vec![("val", Wire::Map(entries)), span]),
                )
            }
            Value::List { vals, .. } => {
                let items = vals
                    .iter()
                    .map(|v| v.to_wire(cx))
                    .collect::<Result<Vec<_>, _>>()?;
                wrap("List", map_of(vec![("vals", Wire::Array(items)), span]))
            }
            Value::Glob {
                val, no_expand, ..
            } => wrap(
                "Glob",
                map_of(vec![
                    ("val", Wire::from(val.as_str())),
                    ("no_expand", Wire::from(*no_expand)),
                    span,
                ]),
            ),
            Value::Closure { val, .. } => {
                wrap("Closure", map_of(vec![("val", val.to_wire()), span]))
            }
            Value::Block { val, .. } => {
                wrap("Block", map_of(vec![("val", Wire::from(*val)), span]))
            }
            Value::Range { val, .. } => {
                wrap("Range", map_of(vec![("val", val.to_wire()?), span]))
            }
            Value::CellPath { val, .. } => {
                wrap("CellPath", map_of(vec![("val", val.to_wire()), span]))
            }
            Value::Error { val, .. } => {
                wrap("Error", map_of(vec![("error", val.to_wire()), span]))
            }
            Value::Custom { val, .. } => wrap(
                "Custom",
                map_of(vec![
                    ("val", encode_custom_value(val, cx.ids, cx.customs)),
                    span,
                ]),
            ),
        };
        Ok(wire)
    }

    pub(crate) fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<Value, CodecError> {
        let (tag, body) = unwrap_map(w, "Value")?;
        let entries = expect_map(body, tag.as_str())?;

        let mut span = Span::unknown();
        let mut val: Option<Value> = None;
        let mut glob_no_expand = false;

        for (k, v) in entries {
            let field = expect_str(k, "Value field name")?;
            match field.as_str() {
                "span" => span = Span::from_wire(v)?,
                "val" => {
                    val = Some(decode_val(&tag, v, cx).map_err(|e| {
                        e.context(format!("decoding field val of {tag}"))
                    })?)
                }
                "vals" => {
                    if tag != "List" {
                        return Err(CodecError::invalid(format!(
                            "expected type to be 'List', got {tag:?}"
                        )));
                    }
                    val = Some(Value::list(decode_value_list(v, cx)?));
                }
                "error" => {
                    val = Some(Value::error(LabeledError::from_wire(v).map_err(|e| {
                        e.context(format!("decoding field error of {tag}"))
                    })?))
                }
                "no_expand" => glob_no_expand = expect_bool(v, "Glob no_expand")?,
                other => {
                    return Err(CodecError::invalid(format!(
                        "unsupported field {other:?} in {tag} Value"
                    )))
                }
            }
        }

        let mut value = match (val, tag.as_str()) {
            (Some(v), _) => v,
            (None, "Nothing") => Value::nothing(),
            (None, other) => {
                return Err(CodecError::invalid(format!(
                    "{other} Value is missing its payload"
                )))
            }
        };
        if let Value::Glob { no_expand, .. } = &mut value {
            *no_expand = glob_no_expand;
        }
        *value.span_mut() = span;
        Ok(value)
    }
}

fn decode_val(tag: &str, v: Wire, cx: &ValueCx<'_>) -> Result<Value, CodecError> {
    Ok(match tag {
        "Bool" => Value::bool(expect_bool(v, "Bool")?),
        "Int" => Value::int(expect_i64(v, "Int")?),
        "Float" => Value::float(expect_f64(v, "Float")?),
        "Filesize" => Value::filesize(expect_i64(v, "Filesize")?),
        "Duration" => Value::duration(expect_i64(v, "Duration")?),
        "Date" => {
            let s = expect_str(v, "Date")?;
            let parsed = DateTime::parse_from_rfc3339(&s).map_err(|e| {
                CodecError::invalid(format!("parsing Date {s:?} as RFC 3339: {e}"))
            })?;
            Value::date(parsed)
        }
        "String" => Value::string(expect_str(v, "String")?),
        "Binary" => Value::binary(expect_bin(v, "Binary")?),
        "Record" => {
            let entries = expect_map(v, "Record")?;
            let mut rec = Record::with_capacity(entries.len());
            for (k, item) in entries {
                let name = expect_str(k, "Record field name")?;
                let value = Value::from_wire(item, cx)
                    .map_err(|e| e.context(format!("decoding field {name} value")))?;
                rec.insert(name, value);
            }
            Value::record(rec)
        }
        "Glob" => Value::glob(expect_str(v, "Glob")?, false),
        "Closure" => Value::closure(Closure::from_wire(v)?),
        "Block" => Value::block(expect_u64(v, "Block")?),
        "Range" => Value::range(IntRange::from_wire(v)?),
        "CellPath" => Value::cell_path(CellPath::from_wire(v)?),
        "Custom" => Value::custom(decode_custom_value(v, cx.customs)?),
        other => {
            return Err(CodecError::invalid(format!(
                "unsupported Value type {other:?}"
            )))
        }
    })
}

fn decode_value_list(v: Wire, cx: &ValueCx<'_>) -> Result<Vec<Value>, CodecError> {
    let items = crate::codec::expect_array(v, "List vals")?;
    let total = items.len();
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            Value::from_wire(item, cx)
                .map_err(|e| e.context(format!("decoding List item [{}/{total}]", i + 1)))
        })
        .collect()
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nothing { span: a }, Value::Nothing { span: b }) => a == b,
            (
                Value::Bool { val: a, span: sa },
                Value::Bool { val: b, span: sb },
            ) => a == b && sa == sb,
            (Value::Int { val: a, span: sa }, Value::Int { val: b, span: sb }) => {
                a == b && sa == sb
            }
            (
                Value::Float { val: a, span: sa },
                Value::Float { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Filesize { val: a, span: sa },
                Value::Filesize { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Duration { val: a, span: sa },
                Value::Duration { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Date { val: a, span: sa },
                Value::Date { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::String { val: a, span: sa },
                Value::String { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Binary { val: a, span: sa },
                Value::Binary { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Record { val: a, span: sa },
                Value::Record { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::List { vals: a, span: sa },
                Value::List { vals: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Glob {
                    val: a,
                    no_expand: na,
                    span: sa,
                },
                Value::Glob {
                    val: b,
                    no_expand: nb,
                    span: sb,
                },
            ) => a == b && na == nb && sa == sb,
            (
                Value::Closure { val: a, span: sa },
                Value::Closure { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Block { val: a, span: sa },
                Value::Block { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Range { val: a, span: sa },
                Value::Range { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::CellPath { val: a, span: sa },
                Value::CellPath { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Error { val: a, span: sa },
                Value::Error { val: b, span: sb },
            ) => a == b && sa == sb,
            (
                Value::Custom { val: a, span: sa },
                Value::Custom { val: b, span: sb },
            ) => Arc::ptr_eq(a, b) && sa == sb,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_path::PathMember;
    use crate::range::RangeBound;
    use crate::record;

    fn cx_parts() -> (IdSource, CustomStore) {
        (IdSource::default(), CustomStore::default())
    }

    fn roundtrip(v: &Value) -> Value {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let wire = v.to_wire(&cx).expect("encode");
        Value::from_wire(wire, &cx).expect("decode")
    }

    #[test]
    fn every_variant_roundtrips() {
        let date = DateTime::parse_from_rfc3339("2024-05-25T14:55:06+00:00").unwrap();
        let cases = vec![
            Value::nothing(),
            Value::nothing().with_span(Span::new(2, 7)),
            Value::int(1),
            Value::int(1).with_span(Span::new(1020, 1050)),
            Value::int(-1),
            Value::int(i64::MAX),
            Value::float(1.0 / 32.0),
            Value::bool(true),
            Value::bool(false),
            Value::string(""),
            Value::string("foo bar"),
            Value::binary(vec![0u8, 1, 2, 127, 128, 254, 255]),
            Value::filesize(1001),
            Value::duration(11 * 60 * 1_000_000_000),
            Value::date(date),
            Value::record(record! {
                "foo" => Value::string("bar"),
                "int" => Value::int(12),
            }),
            Value::list(vec![Value::string("first"), Value::int(13)]),
            Value::list(vec![]),
            Value::closure(Closure {
                block_id: 8,
                captures: None,
            }),
            Value::closure(Closure {
                block_id: 8,
                captures: Some(Wire::Array(vec![])),
            }),
            Value::glob("[a-z].txt", false),
            Value::glob("**/*.txt", true),
            Value::glob("foo.txt", false).with_span(Span::new(1, 8)),
            Value::block(42),
            Value::range(IntRange {
                start: 0,
                step: 2,
                end: 10,
                bound: RangeBound::Included,
            }),
            Value::cell_path(
                CellPath::new()
                    .with(PathMember::string("foo"))
                    .with(PathMember::int(1).optional()),
            ),
            Value::error(LabeledError::new("oops").with_code("E::1")),
        ];
        for case in cases {
            assert_eq!(roundtrip(&case), case, "{}", case.type_name());
        }
    }

    #[test]
    fn reencode_is_byte_identical() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let values = vec![
            Value::int(5),
            Value::string("stable"),
            Value::record(record! { "a" => Value::int(1), "b" => Value::int(2) }),
            Value::list(vec![Value::bool(true), Value::nothing()]),
        ];
        for v in values {
            let first = v.to_wire(&cx).unwrap();
            let mut buf1 = Vec::new();
            rmpv::encode::write_value(&mut buf1, &first).unwrap();

            let decoded = Value::from_wire(first, &cx).unwrap();
            let second = decoded.to_wire(&cx).unwrap();
            let mut buf2 = Vec::new();
            rmpv::encode::write_value(&mut buf2, &second).unwrap();

            assert_eq!(buf1, buf2, "{}", v.type_name());
        }
    }

    #[test]
    fn envelope_always_carries_span() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        for v in [Value::nothing(), Value::int(1), Value::list(vec![])] {
            let wire = v.to_wire(&cx).unwrap();
            let (_, body) = unwrap_map(wire, "Value").unwrap();
            let entries = expect_map(body, "Value body").unwrap();
            assert!(
                entries
                    .iter()
                    .any(|(k, _)| k.as_str() == Some("span")),
                "{} is missing span",
                v.type_name()
            );
        }
    }

    #[test]
    fn binary_encodes_as_bin_never_nil() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let wire = Value::binary(Vec::new()).to_wire(&cx).unwrap();
        let (_, body) = unwrap_map(wire, "Value").unwrap();
        let entries = expect_map(body, "Binary body").unwrap();
        let val = entries
            .into_iter()
            .find(|(k, _)| k.as_str() == Some("val"))
            .map(|(_, v)| v)
            .unwrap();
        assert_eq!(val, Wire::Binary(vec![]), "empty binary is zero-length bin");
    }

    #[test]
    fn unknown_tag_names_the_tag() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let wire = wrap("Quaternion", map_of(vec![("val", Wire::from(1))]));
        let err = Value::from_wire(wire, &cx).unwrap_err();
        assert!(
            err.to_string().contains("unsupported Value type \"Quaternion\""),
            "got: {err}"
        );
    }

    #[test]
    fn malformed_date_is_rejected() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let wire = wrap(
            "Date",
            map_of(vec![
                ("val", Wire::from("2024-05-25 14:55:06")),
                ("span", Span::unknown().to_wire()),
            ]),
        );
        let err = Value::from_wire(wire, &cx).unwrap_err();
        assert!(err.to_string().contains("RFC 3339"), "got: {err}");
    }

    #[test]
    fn empty_list_is_not_absent() {
        let v = roundtrip(&Value::list(vec![]));
        assert_eq!(v, Value::list(vec![]));
        assert_eq!(v.as_list().unwrap().len(), 0);
    }

    #[test]
    fn binary_decodes_from_int_array() {
        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let wire = wrap(
            "Binary",
            map_of(vec![
                (
                    "val",
                    Wire::Array(vec![Wire::from(1u64), Wire::from(255u64)]),
                ),
                ("span", Span::unknown().to_wire()),
            ]),
        );
        let v = Value::from_wire(wire, &cx).unwrap();
        assert_eq!(v, Value::binary(vec![1u8, 255]));
    }

    #[test]
    fn custom_value_roundtrips_through_the_table() {
        use crate::custom::Ordering;
        use std::path::Path;

        #[derive(Debug)]
        struct Tag;
        impl CustomValue for Tag {
            fn name(&self) -> String {
                "Tag".into()
            }
            fn to_base_value(&self) -> Result<Value, LabeledError> {
                Ok(Value::string("tag"))
            }
            fn follow_path_int(&self, _: u64, _: bool) -> Result<Value, LabeledError> {
                Err("no".into())
            }
            fn follow_path_string(
                &self,
                _: &str,
                _: bool,
                _: bool,
            ) -> Result<Value, LabeledError> {
                Err("no".into())
            }
            fn operation(
                &self,
                _: crate::operator::Operator,
                _: Value,
            ) -> Result<Value, LabeledError> {
                Err("no".into())
            }
            fn partial_cmp(&self, _: &Value) -> Ordering {
                Ordering::Incomparable
            }
            fn save(&self, _: &Path) -> Result<(), LabeledError> {
                Ok(())
            }
        }

        let (ids, customs) = cx_parts();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let original = Value::custom(Arc::new(Tag));
        let wire = original.to_wire(&cx).unwrap();
        assert_eq!(customs.len(), 1);
        let back = Value::from_wire(wire, &cx).unwrap();
        assert_eq!(back, original, "decode resolves to the same live instance");
    }
}
