//! Wire codec primitives for the plugin protocol.
//!
//! Every protocol entity is built from a small set of MessagePack idioms:
//!
//! - **wrapper map**: a single-entry map whose key names a sum-type variant,
//!   `{"Run": …}`, `{"PipelineData": …}`
//! - **tuple-in-map**: `{"Call": [id, payload]}`, a wrapper map whose value
//!   is a two-element array led by a non-negative id
//! - **"val" envelope**: `{TypeName: {"val": payload, "span": span}}`
//!
//! Frames are encoded into / decoded from an [`rmpv::Value`] tree; one tree
//! per frame, no shared encoder state. Decode failures never panic; every
//! helper takes a `what` context string so the diagnostic names the field
//! path that was being read.

use std::io::{self, Read, Write};

use rmpv::Value as Wire;

/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("reading value: {0}")]
    Read(String),

    #[error("writing value: {0}")]
    Write(String),

    /// A frame or fragment does not match the declared wire shape:
    /// wrong map arity, wrong key type, unknown tag, bad integer width.
    #[error("{0}")]
    Invalid(String),
}

impl CodecError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CodecError::Invalid(msg.into())
    }

    /// Prefix the error with the field path being decoded.
    pub(crate) fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            CodecError::Invalid(msg) => CodecError::Invalid(format!("{what}: {msg}")),
            other => CodecError::Invalid(format!("{what}: {other}")),
        }
    }
}

/// Read one complete MessagePack value from the transport.
///
/// Returns `Ok(None)` on clean EOF (no bytes before the next frame). Any
/// other read failure means framing is lost and the session cannot continue.
pub(crate) fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Wire>, CodecError> {
    match rmpv::decode::read_value(reader) {
        Ok(v) => Ok(Some(v)),
        Err(rmpv::decode::Error::InvalidMarkerRead(e))
            if e.kind() == io::ErrorKind::UnexpectedEof =>
        {
            Ok(None)
        }
        Err(e) => Err(CodecError::Read(e.to_string())),
    }
}

/// Write one complete MessagePack value to the transport.
pub(crate) fn write_frame<W: Write + ?Sized>(mut writer: &mut W, v: &Wire) -> Result<(), CodecError> {
    rmpv::encode::write_value(&mut writer, v).map_err(|e| CodecError::Write(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

/// Build a single-entry wrapper map `{key: payload}`.
pub(crate) fn wrap(key: &str, payload: Wire) -> Wire {
    Wire::Map(vec![(Wire::from(key), payload)])
}

/// Build a tuple-in-map `{key: [id, payload]}`.
pub(crate) fn wrap_tuple(key: &str, id: i64, payload: Wire) -> Wire {
    wrap(key, Wire::Array(vec![Wire::from(id), payload]))
}

/// Build a map from string keys.
pub(crate) fn map_of(entries: Vec<(&str, Wire)>) -> Wire {
    Wire::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Wire::from(k), v))
            .collect(),
    )
}

/// Read a wrapper map, returning its single key and the value under it.
pub(crate) fn unwrap_map(w: Wire, what: &str) -> Result<(String, Wire), CodecError> {
    let entries = match w {
        Wire::Map(entries) => entries,
        other => {
            return Err(CodecError::invalid(format!(
                "{what}: expected map, got {}",
                kind_of(&other)
            )))
        }
    };
    if entries.len() != 1 {
        return Err(CodecError::invalid(format!(
            "{what}: wrapper map is expected to contain one item, got {}",
            entries.len()
        )));
    }
    let (key, value) = entries.into_iter().next().unwrap();
    let key = expect_str(key, what)?;
    Ok((key, value))
}

/// Read a `[id, payload]` tuple, returning the id and the payload.
pub(crate) fn unwrap_tuple(w: Wire, what: &str) -> Result<(i64, Wire), CodecError> {
    let mut items = expect_array(w, what)?;
    if items.len() != 2 {
        return Err(CodecError::invalid(format!(
            "{what}: unexpected tuple array length {}",
            items.len()
        )));
    }
    let payload = items.pop().unwrap();
    let id = expect_i64(items.pop().unwrap(), what)?;
    if id < 0 {
        return Err(CodecError::invalid(format!("{what}: negative id {id}")));
    }
    Ok((id, payload))
}

pub(crate) fn expect_map(w: Wire, what: &str) -> Result<Vec<(Wire, Wire)>, CodecError> {
    match w {
        Wire::Map(entries) => Ok(entries),
        other => Err(CodecError::invalid(format!(
            "{what}: expected map, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_array(w: Wire, what: &str) -> Result<Vec<Wire>, CodecError> {
    match w {
        Wire::Array(items) => Ok(items),
        other => Err(CodecError::invalid(format!(
            "{what}: expected array, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_str(w: Wire, what: &str) -> Result<String, CodecError> {
    match w {
        Wire::String(s) => s.into_str().ok_or_else(|| {
            CodecError::invalid(format!("{what}: string is not valid UTF-8"))
        }),
        other => Err(CodecError::invalid(format!(
            "{what}: expected string, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_i64(w: Wire, what: &str) -> Result<i64, CodecError> {
    match w {
        Wire::Integer(n) => n.as_i64().ok_or_else(|| {
            CodecError::invalid(format!("{what}: integer {n} does not fit in int64"))
        }),
        other => Err(CodecError::invalid(format!(
            "{what}: expected integer, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_u64(w: Wire, what: &str) -> Result<u64, CodecError> {
    match w {
        Wire::Integer(n) => n.as_u64().ok_or_else(|| {
            CodecError::invalid(format!("{what}: expected non-negative integer, got {n}"))
        }),
        other => Err(CodecError::invalid(format!(
            "{what}: expected integer, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_bool(w: Wire, what: &str) -> Result<bool, CodecError> {
    match w {
        Wire::Boolean(b) => Ok(b),
        other => Err(CodecError::invalid(format!(
            "{what}: expected boolean, got {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn expect_f64(w: Wire, what: &str) -> Result<f64, CodecError> {
    match w {
        Wire::F64(f) => Ok(f),
        Wire::F32(f) => Ok(f as f64),
        // some encoders emit integral floats as ints
        Wire::Integer(n) => n
            .as_i64()
            .map(|i| i as f64)
            .ok_or_else(|| CodecError::invalid(format!("{what}: integer {n} out of range"))),
        other => Err(CodecError::invalid(format!(
            "{what}: expected float, got {}",
            kind_of(&other)
        ))),
    }
}

/// Read binary data encoded either as a bin value or, as some encoders do,
/// as an array of unsigned byte integers.
pub(crate) fn expect_bin(w: Wire, what: &str) -> Result<Vec<u8>, CodecError> {
    match w {
        Wire::Binary(b) => Ok(b),
        Wire::Array(items) => {
            let mut buf = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let n = expect_u64(item, what)
                    .map_err(|e| e.context(format!("reading array item [{i}]")))?;
                if n > u8::MAX as u64 {
                    return Err(CodecError::invalid(format!(
                        "{what}: array item [{i}] value {n} is not a byte"
                    )));
                }
                buf.push(n as u8);
            }
            Ok(buf)
        }
        other => Err(CodecError::invalid(format!(
            "{what}: unsupported binary value starting {}",
            kind_of(&other)
        ))),
    }
}

pub(crate) fn kind_of(w: &Wire) -> &'static str {
    match w {
        Wire::Nil => "nil",
        Wire::Boolean(_) => "boolean",
        Wire::Integer(_) => "integer",
        Wire::F32(_) => "float32",
        Wire::F64(_) => "float64",
        Wire::String(_) => "string",
        Wire::Binary(_) => "binary",
        Wire::Array(_) => "array",
        Wire::Map(_) => "map",
        Wire::Ext(..) => "ext",
    }
}

/// Byte offsets into the engine's source text. Carried on most values and
/// on error labels; opaque to the plugin and round-tripped exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// The `{0,0}` span used when no source location applies.
    pub fn unknown() -> Self {
        Span::default()
    }

    pub(crate) fn to_wire(self) -> Wire {
        map_of(vec![
            ("start", Wire::from(self.start as u64)),
            ("end", Wire::from(self.end as u64)),
        ])
    }

    pub(crate) fn from_wire(w: Wire) -> Result<Span, CodecError> {
        let entries = expect_map(w, "Span")?;
        if entries.len() != 2 {
            return Err(CodecError::invalid(format!(
                "expected span map to contain two keys, got {}",
                entries.len()
            )));
        }
        let mut span = Span::default();
        for (k, v) in entries {
            let key = expect_str(k, "Span key")?;
            let n = expect_u64(v, "Span").map_err(|e| e.context(format!("decoding {key} value")))?;
            match key.as_str() {
                "start" => span.start = n as usize,
                "end" => span.end = n as usize,
                other => {
                    return Err(CodecError::invalid(format!(
                        "unexpected key {other:?} in span"
                    )))
                }
            }
        }
        Ok(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_roundtrip() {
        for span in [Span::unknown(), Span::new(2, 7), Span::new(1020, 1050)] {
            let wire = span.to_wire();
            let back = Span::from_wire(wire).expect("span should decode");
            assert_eq!(span, back);
        }
    }

    #[test]
    fn span_rejects_wrong_arity() {
        let wire = map_of(vec![("start", Wire::from(1u64))]);
        let err = Span::from_wire(wire).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected span map to contain two keys, got 1"
        );
    }

    #[test]
    fn wrapper_map_roundtrip() {
        let wire = wrap("Run", Wire::from("payload"));
        let (key, payload) = unwrap_map(wire, "message").expect("should unwrap");
        assert_eq!(key, "Run");
        assert_eq!(payload, Wire::from("payload"));
    }

    #[test]
    fn wrapper_map_rejects_multiple_entries() {
        let wire = Wire::Map(vec![
            (Wire::from("a"), Wire::Nil),
            (Wire::from("b"), Wire::Nil),
        ]);
        let err = unwrap_map(wire, "message").unwrap_err();
        assert_eq!(
            err.to_string(),
            "message: wrapper map is expected to contain one item, got 2"
        );
    }

    #[test]
    fn wrapper_map_rejects_non_map() {
        let err = unwrap_map(Wire::from(7), "message").unwrap_err();
        assert!(err.to_string().contains("expected map, got integer"));
    }

    #[test]
    fn tuple_roundtrip() {
        let wire = wrap_tuple("Call", 3, Wire::from("Signature"));
        let (key, inner) = unwrap_map(wire, "message").unwrap();
        assert_eq!(key, "Call");
        let (id, payload) = unwrap_tuple(inner, "Call").unwrap();
        assert_eq!(id, 3);
        assert_eq!(payload, Wire::from("Signature"));
    }

    #[test]
    fn tuple_rejects_wrong_length() {
        let wire = Wire::Array(vec![Wire::from(1)]);
        let err = unwrap_tuple(wire, "Call").unwrap_err();
        assert_eq!(err.to_string(), "Call: unexpected tuple array length 1");
    }

    #[test]
    fn tuple_rejects_negative_id() {
        let wire = Wire::Array(vec![Wire::from(-1), Wire::Nil]);
        let err = unwrap_tuple(wire, "Data").unwrap_err();
        assert_eq!(err.to_string(), "Data: negative id -1");
    }

    #[test]
    fn binary_from_bin_and_from_array() {
        let bytes = vec![0u8, 1, 2, 127, 128, 254, 255];
        assert_eq!(
            expect_bin(Wire::Binary(bytes.clone()), "Binary").unwrap(),
            bytes
        );
        let as_array = Wire::Array(bytes.iter().map(|b| Wire::from(*b as u64)).collect());
        assert_eq!(expect_bin(as_array, "Binary").unwrap(), bytes);
    }

    #[test]
    fn binary_rejects_oversized_array_item() {
        let wire = Wire::Array(vec![Wire::from(300u64)]);
        let err = expect_bin(wire, "Binary").unwrap_err();
        assert!(err.to_string().contains("is not a byte"));
    }

    #[test]
    fn frame_io_roundtrip() {
        let frames = vec![
            wrap_tuple("Call", 1, Wire::from("Signature")),
            wrap("Ack", Wire::from(4)),
            Wire::from("Goodbye"),
        ];
        let mut buf = Vec::new();
        for f in &frames {
            write_frame(&mut buf, f).unwrap();
        }

        let mut cursor = std::io::Cursor::new(buf);
        for f in &frames {
            let got = read_frame(&mut cursor).unwrap().expect("should have frame");
            assert_eq!(&got, f);
        }
        assert!(read_frame(&mut cursor).unwrap().is_none(), "clean EOF");
    }
}
