//! Custom values: opaque plugin-owned values the engine refers to by a
//! 4-byte handle.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use rmpv::Value as Wire;

use crate::codec::{
    expect_bin, expect_bool, expect_map, expect_str, expect_u64, map_of, unwrap_map, wrap,
    CodecError, Span,
};
use crate::error::LabeledError;
use crate::operator::Operator;
use crate::value::{Value, ValueCx};

/// Result type of the `PartialCmp` custom-value call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// The values cannot be compared.
    Incomparable,
    Less,
    Equal,
    Greater,
}

impl Ordering {
    pub(crate) fn to_wire(self) -> Wire {
        let inner = match self {
            Ordering::Incomparable => Wire::Nil,
            Ordering::Less => Wire::from("Less"),
            Ordering::Equal => Wire::from("Equal"),
            Ordering::Greater => Wire::from("Greater"),
        };
        wrap("Ordering", inner)
    }
}

/// The capability set a plugin-defined value type implements to be usable
/// as a custom value.
///
/// The engine's `CustomValueOp` calls are routed to the corresponding
/// method of the live instance the wire handle resolves to.
pub trait CustomValue: fmt::Debug + Send + Sync {
    /// Human-readable name of the custom value, shown by the engine.
    fn name(&self) -> String;

    /// Whether the engine should notify the plugin when all copies of this
    /// value have gone out of scope on the engine side.
    fn notify_on_drop(&self) -> bool {
        false
    }

    /// Called when a value that opted into drop notification was dropped in
    /// the engine. The handle is released regardless of the result.
    fn dropped(&self) -> Result<(), LabeledError> {
        Ok(())
    }

    /// A plain value representative of this custom value. Returning another
    /// custom value from this operation is not allowed by the engine.
    fn to_base_value(&self) -> Result<Value, LabeledError>;

    /// Follow a numeric cell path (e.g. `$custom.0`) on this value.
    fn follow_path_int(&self, item: u64, optional: bool) -> Result<Value, LabeledError>;

    /// Follow a string cell path (e.g. `$custom.field`) on this value.
    fn follow_path_string(
        &self,
        item: &str,
        optional: bool,
        case_sensitive: bool,
    ) -> Result<Value, LabeledError>;

    /// Evaluate `self <op> rhs`. The rhs may be any value, not just the
    /// same custom type.
    fn operation(&self, op: Operator, rhs: Value) -> Result<Value, LabeledError>;

    /// Compare this value to another, if comparable.
    fn partial_cmp(&self, rhs: &Value) -> Ordering;

    /// Save this value to a file at the path supplied by the engine.
    fn save(&self, path: &Path) -> Result<(), LabeledError>;
}

/// The process-wide id counter. One counter supplies every locally
/// allocated id: output streams, engine calls, and custom value handles.
/// Ids are never recycled within a process lifetime.
#[derive(Debug, Default)]
pub(crate) struct IdSource(AtomicU32);

impl IdSource {
    pub(crate) fn next(&self) -> u32 {
        self.0.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }
}

/// The process-wide table of live custom values, keyed by handle id.
/// Entries are created when a custom value is encoded and released when
/// the engine reports the value dropped.
#[derive(Debug, Default)]
pub(crate) struct CustomStore {
    live: Mutex<HashMap<u32, Arc<dyn CustomValue>>>,
}

impl CustomStore {
    pub(crate) fn insert(&self, id: u32, value: Arc<dyn CustomValue>) {
        self.live.lock().unwrap().insert(id, value);
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<dyn CustomValue>> {
        self.live.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: u32) -> Option<Arc<dyn CustomValue>> {
        self.live.lock().unwrap().remove(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

/// Encode a custom value handle, assigning a fresh id and recording the
/// instance in the live table. Encoding is the only write to that table.
pub(crate) fn encode_custom_value(
    value: &Arc<dyn CustomValue>,
    ids: &IdSource,
    customs: &CustomStore,
) -> Wire {
    let id = ids.next();
    let mut entries = vec![
        ("type", Wire::from("PluginCustomValue")),
        ("name", Wire::from(value.name())),
        ("data", Wire::Binary(id.to_be_bytes().to_vec())),
    ];
    if value.notify_on_drop() {
        entries.push(("notify_on_drop", Wire::from(true)));
    }
    customs.insert(id, Arc::clone(value));
    map_of(entries)
}

/// Decode a custom value handle back into the live instance it refers to.
pub(crate) fn decode_custom_value(
    w: Wire,
    customs: &CustomStore,
) -> Result<Arc<dyn CustomValue>, CodecError> {
    let entries = expect_map(w, "CustomValue")?;
    let mut found = None;
    for (k, v) in entries {
        let key = expect_str(k, "CustomValue key")?;
        match key.as_str() {
            "type" | "name" => {
                expect_str(v, "CustomValue")
                    .map_err(|e| e.context(format!("decoding CustomValue key {key:?}")))?;
            }
            "data" => {
                let id = read_handle_id(v)?;
                found = Some(customs.get(id).ok_or_else(|| {
                    CodecError::invalid(format!("no CustomValue with id {id}"))
                })?);
            }
            "notify_on_drop" => {
                expect_bool(v, "CustomValue notify_on_drop")?;
            }
            other => {
                return Err(CodecError::invalid(format!(
                    "unsupported key {other:?} in CustomValue"
                )))
            }
        }
    }
    found.ok_or_else(|| CodecError::invalid("CustomValue is missing the data field"))
}

/// Read the 4-byte big-endian handle id.
pub(crate) fn read_handle_id(w: Wire) -> Result<u32, CodecError> {
    let bytes = expect_bin(w, "CustomValue data")?;
    if bytes.len() != 4 {
        return Err(CodecError::invalid(format!(
            "expected CustomValue data to be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A decoded `CustomValueOp` call: which handle it targets and the
/// operation to perform.
#[derive(Debug)]
pub(crate) struct CustomCall {
    pub name: String,
    pub id: u32,
    #[allow(dead_code)]
    pub span: Span,
    pub op: CustomValueOp,
}

/// The six custom-value operations plus drop notification.
#[derive(Debug)]
pub(crate) enum CustomValueOp {
    ToBaseValue,
    Dropped,
    FollowPathInt {
        item: u64,
        optional: bool,
    },
    FollowPathString {
        item: String,
        optional: bool,
        insensitive: bool,
    },
    PartialCmp(Value),
    Operation(Operator, Value),
    Save {
        path: String,
    },
}

impl CustomCall {
    /// Decode the `[ {item: handle, span}, op ]` tuple of a
    /// `Call/CustomValueOp`.
    pub(crate) fn from_wire(w: Wire, cx: &ValueCx<'_>) -> Result<CustomCall, CodecError> {
        let mut items = crate::codec::expect_array(w, "CustomValueOp")?;
        if items.len() != 2 {
            return Err(CodecError::invalid(format!(
                "CustomValueOp: expected 2-tuple, got {}",
                items.len()
            )));
        }
        let op_wire = items.pop().unwrap();
        let target = items.pop().unwrap();

        let (name, id, span) = decode_target(target)?;
        let op = decode_op(op_wire, cx)?;
        Ok(CustomCall { name, id, span, op })
    }
}

fn decode_target(w: Wire) -> Result<(String, u32, Span), CodecError> {
    let entries = expect_map(w, "CustomValueOp[0]")?;
    let mut name = String::new();
    let mut id = 0u32;
    let mut span = Span::unknown();
    for (k, v) in entries {
        let key = expect_str(k, "CustomValueOp[0] key")?;
        match key.as_str() {
            "item" => {
                let item = expect_map(v, "CustomValueOp item")?;
                for (ik, iv) in item {
                    let ikey = expect_str(ik, "CustomValueOp item key")?;
                    match ikey.as_str() {
                        "type" | "name" => {
                            let s = expect_str(iv, "CustomValueOp item")?;
                            if ikey == "name" {
                                name = s;
                            }
                        }
                        "data" => id = read_handle_id(iv)?,
                        "notify_on_drop" => {
                            expect_bool(iv, "CustomValueOp notify_on_drop")?;
                        }
                        other => {
                            return Err(CodecError::invalid(format!(
                                "unknown key {other:?} under CustomValueOp item"
                            )))
                        }
                    }
                }
            }
            "span" => span = Span::from_wire(v)?,
            other => {
                return Err(CodecError::invalid(format!(
                    "unknown key {other:?} under CustomValueOp[0]"
                )))
            }
        }
    }
    Ok((name, id, span))
}

fn decode_op(w: Wire, cx: &ValueCx<'_>) -> Result<CustomValueOp, CodecError> {
    match w {
        Wire::String(_) => {
            let s = expect_str(w, "CustomValueOp")?;
            match s.as_str() {
                "ToBaseValue" => Ok(CustomValueOp::ToBaseValue),
                "Dropped" => Ok(CustomValueOp::Dropped),
                other => Err(CodecError::invalid(format!(
                    "unknown CustomValueOp command {other:?}"
                ))),
            }
        }
        Wire::Map(_) => {
            let (tag, body) = unwrap_map(w, "CustomValueOp")?;
            match tag.as_str() {
                "FollowPathInt" => {
                    let (item, optional, _) = decode_path_arg(body)?;
                    Ok(CustomValueOp::FollowPathInt {
                        item: expect_u64(item, "FollowPathInt item")?,
                        optional,
                    })
                }
                "FollowPathString" => {
                    let (item, optional, insensitive) = decode_path_arg(body)?;
                    Ok(CustomValueOp::FollowPathString {
                        item: expect_str(item, "FollowPathString item")?,
                        optional,
                        insensitive,
                    })
                }
                "PartialCmp" => Ok(CustomValueOp::PartialCmp(Value::from_wire(body, cx)?)),
                "Operation" => {
                    let mut items = crate::codec::expect_array(body, "Operation")?;
                    if items.len() != 2 {
                        return Err(CodecError::invalid(format!(
                            "Operation: expected 2-tuple, got {}",
                            items.len()
                        )));
                    }
                    let rhs = Value::from_wire(items.pop().unwrap(), cx)?;
                    let op = decode_spanned_operator(items.pop().unwrap())?;
                    Ok(CustomValueOp::Operation(op, rhs))
                }
                "Save" => {
                    let entries = expect_map(body, "Save")?;
                    let mut path = None;
                    for (k, v) in entries {
                        let key = expect_str(k, "Save key")?;
                        match key.as_str() {
                            "path" => {
                                let (item, _, _) = decode_path_arg(v)?;
                                path = Some(expect_str(item, "Save path")?);
                            }
                            other => {
                                return Err(CodecError::invalid(format!(
                                    "unknown key {other:?} under Save"
                                )))
                            }
                        }
                    }
                    let path = path
                        .ok_or_else(|| CodecError::invalid("Save is missing the path field"))?;
                    Ok(CustomValueOp::Save { path })
                }
                other => Err(CodecError::invalid(format!(
                    "unknown CustomValueOp[1] type {other:?}"
                ))),
            }
        }
        other => Err(CodecError::invalid(format!(
            "unsupported CustomValueOp[1] value: {}",
            crate::codec::kind_of(&other)
        ))),
    }
}

/// Decode a spanned `{item, span, optional?, casing?}` argument, leaving
/// the item for the caller to type.
fn decode_path_arg(w: Wire) -> Result<(Wire, bool, bool), CodecError> {
    let entries = expect_map(w, "path argument")?;
    let mut item = Wire::Nil;
    let mut optional = false;
    let mut insensitive = false;
    for (k, v) in entries {
        let key = expect_str(k, "path argument key")?;
        match key.as_str() {
            "item" => item = v,
            "span" => {
                Span::from_wire(v)?;
            }
            "optional" => optional = expect_bool(v, "path argument optional")?,
            "casing" => {
                let s = expect_str(v, "path argument casing")?;
                insensitive = match s.as_str() {
                    "Sensitive" => false,
                    "Insensitive" => true,
                    other => {
                        return Err(CodecError::invalid(format!(
                            "unsupported casing value {other:?}"
                        )))
                    }
                };
            }
            other => {
                return Err(CodecError::invalid(format!(
                    "unknown key {other:?} in path argument"
                )))
            }
        }
    }
    Ok((item, optional, insensitive))
}

/// The `Operation` op carries `{item: {Class: Op}, span}`.
fn decode_spanned_operator(w: Wire) -> Result<Operator, CodecError> {
    let entries = expect_map(w, "Operation[0]")?;
    let mut op = None;
    for (k, v) in entries {
        let key = expect_str(k, "Operation key")?;
        match key.as_str() {
            "item" => op = Some(Operator::from_wire(v)?),
            "span" => {
                Span::from_wire(v)?;
            }
            other => {
                return Err(CodecError::invalid(format!(
                    "unknown key {other:?} under Operation"
                )))
            }
        }
    }
    op.ok_or_else(|| CodecError::invalid("Operation is missing the item field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::map_of;

    #[derive(Debug)]
    struct Marker;

    impl CustomValue for Marker {
        fn name(&self) -> String {
            "Marker".into()
        }
        fn to_base_value(&self) -> Result<Value, LabeledError> {
            Ok(Value::nothing())
        }
        fn follow_path_int(&self, _: u64, _: bool) -> Result<Value, LabeledError> {
            Err(LabeledError::new("not a list"))
        }
        fn follow_path_string(&self, _: &str, _: bool, _: bool) -> Result<Value, LabeledError> {
            Err(LabeledError::new("not a record"))
        }
        fn operation(&self, _: Operator, _: Value) -> Result<Value, LabeledError> {
            Err(LabeledError::new("unsupported"))
        }
        fn partial_cmp(&self, _: &Value) -> Ordering {
            Ordering::Incomparable
        }
        fn save(&self, _: &Path) -> Result<(), LabeledError> {
            Ok(())
        }
    }

    #[test]
    fn handle_ids_are_unique_and_monotonic() {
        let ids = IdSource::default();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn encode_registers_and_decode_resolves() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cv: Arc<dyn CustomValue> = Arc::new(Marker);

        let wire = encode_custom_value(&cv, &ids, &customs);
        assert_eq!(customs.len(), 1, "encode is the only write to the table");

        let resolved = decode_custom_value(wire, &customs).expect("decode");
        assert!(Arc::ptr_eq(&resolved, &cv));
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let customs = CustomStore::default();
        let wire = map_of(vec![
            ("type", Wire::from("PluginCustomValue")),
            ("name", Wire::from("ghost")),
            ("data", Wire::Binary(7u32.to_be_bytes().to_vec())),
        ]);
        let err = decode_custom_value(wire, &customs).unwrap_err();
        assert_eq!(err.to_string(), "no CustomValue with id 7");
    }

    #[test]
    fn handle_id_must_be_four_bytes() {
        let err = read_handle_id(Wire::Binary(vec![1, 2, 3])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected CustomValue data to be 4 bytes, got 3"
        );
    }

    #[test]
    fn ordering_wire_shapes() {
        assert_eq!(Ordering::Less.to_wire(), wrap("Ordering", Wire::from("Less")));
        assert_eq!(
            Ordering::Incomparable.to_wire(),
            wrap("Ordering", Wire::Nil)
        );
    }

    #[test]
    fn decode_string_ops() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let target = map_of(vec![
            (
                "item",
                map_of(vec![
                    ("name", Wire::from("Marker")),
                    ("data", Wire::Binary(1u32.to_be_bytes().to_vec())),
                ]),
            ),
            ("span", Span::new(1, 2).to_wire()),
        ]);
        let w = Wire::Array(vec![target, Wire::from("ToBaseValue")]);
        let call = CustomCall::from_wire(w, &cx).expect("decode");
        assert_eq!(call.name, "Marker");
        assert_eq!(call.id, 1);
        assert!(matches!(call.op, CustomValueOp::ToBaseValue));
    }

    #[test]
    fn decode_follow_path_string_with_casing() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let target = map_of(vec![(
            "item",
            map_of(vec![
                ("name", Wire::from("Marker")),
                ("data", Wire::Binary(1u32.to_be_bytes().to_vec())),
            ]),
        )]);
        let op = wrap(
            "FollowPathString",
            map_of(vec![
                ("item", Wire::from("field")),
                ("span", Span::unknown().to_wire()),
                ("optional", Wire::from(true)),
                ("casing", Wire::from("Insensitive")),
            ]),
        );
        let call = CustomCall::from_wire(Wire::Array(vec![target, op]), &cx).unwrap();
        match call.op {
            CustomValueOp::FollowPathString {
                item,
                optional,
                insensitive,
            } => {
                assert_eq!(item, "field");
                assert!(optional);
                assert!(insensitive);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_rejected() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };
        let target = map_of(vec![]);
        let w = Wire::Array(vec![target, Wire::from("Teleport")]);
        let err = CustomCall::from_wire(w, &cx).unwrap_err();
        assert_eq!(err.to_string(), "unknown CustomValueOp command \"Teleport\"");
    }
}
