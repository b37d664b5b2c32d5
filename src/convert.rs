//! Promotion of ordinary host values into the protocol's [`Value`] model.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::cell_path::CellPath;
use crate::codec::Span;
use crate::custom::CustomValue;
use crate::error::LabeledError;
use crate::range::IntRange;
use crate::record::Record;
use crate::value::{Closure, Value};

/// Type-directed conversion of a host value into the canonical [`Value`].
///
/// Numeric kinds promote to `Int`, floats to `Float`, strings and byte
/// slices pass through, string-keyed maps become records, and sequences
/// of promotable items become lists. A value that cannot be represented
/// (an unsigned integer above `i64::MAX`) promotes to an `Error` value
/// rather than silently wrapping.
pub trait IntoValue {
    fn into_value(self, span: Span) -> Value;
}

/// Promote `v` with an unknown span.
pub fn to_value(v: impl IntoValue) -> Value {
    v.into_value(Span::unknown())
}

impl IntoValue for Value {
    fn into_value(self, span: Span) -> Value {
        if self.span() == Span::unknown() {
            self.with_span(span)
        } else {
            self
        }
    }
}

impl IntoValue for () {
    fn into_value(self, span: Span) -> Value {
        Value::nothing().with_span(span)
    }
}

impl IntoValue for bool {
    fn into_value(self, span: Span) -> Value {
        Value::bool(self).with_span(span)
    }
}

macro_rules! int_into_value {
    ($($ty:ty),+) => {
        $(impl IntoValue for $ty {
            fn into_value(self, span: Span) -> Value {
                Value::int(self as i64).with_span(span)
            }
        })+
    };
}

int_into_value!(i8, i16, i32, i64, u16, u32);

impl IntoValue for u64 {
    fn into_value(self, span: Span) -> Value {
        if self > i64::MAX as u64 {
            Value::error(LabeledError::new(format!(
                "uint {self} is too large for int64"
            )))
            .with_span(span)
        } else {
            Value::int(self as i64).with_span(span)
        }
    }
}

impl IntoValue for usize {
    fn into_value(self, span: Span) -> Value {
        (self as u64).into_value(span)
    }
}

impl IntoValue for f32 {
    fn into_value(self, span: Span) -> Value {
        Value::float(self as f64).with_span(span)
    }
}

impl IntoValue for f64 {
    fn into_value(self, span: Span) -> Value {
        Value::float(self).with_span(span)
    }
}

impl IntoValue for &str {
    fn into_value(self, span: Span) -> Value {
        Value::string(self).with_span(span)
    }
}

impl IntoValue for String {
    fn into_value(self, span: Span) -> Value {
        Value::string(self).with_span(span)
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self, span: Span) -> Value {
        Value::binary(self).with_span(span)
    }
}

impl IntoValue for &[u8] {
    fn into_value(self, span: Span) -> Value {
        Value::binary(self.to_vec()).with_span(span)
    }
}

impl IntoValue for std::time::Duration {
    fn into_value(self, span: Span) -> Value {
        match i64::try_from(self.as_nanos()) {
            Ok(nanos) => Value::duration(nanos).with_span(span),
            Err(_) => Value::error(LabeledError::new(format!(
                "duration {self:?} is too large for int64 nanoseconds"
            )))
            .with_span(span),
        }
    }
}

impl IntoValue for DateTime<FixedOffset> {
    fn into_value(self, span: Span) -> Value {
        Value::date(self).with_span(span)
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self, span: Span) -> Value {
        Value::date(self.fixed_offset()).with_span(span)
    }
}

impl IntoValue for Record {
    fn into_value(self, span: Span) -> Value {
        Value::record(self).with_span(span)
    }
}

impl IntoValue for IntRange {
    fn into_value(self, span: Span) -> Value {
        Value::range(self).with_span(span)
    }
}

impl IntoValue for CellPath {
    fn into_value(self, span: Span) -> Value {
        Value::cell_path(self).with_span(span)
    }
}

impl IntoValue for Closure {
    fn into_value(self, span: Span) -> Value {
        Value::closure(self).with_span(span)
    }
}

impl IntoValue for LabeledError {
    fn into_value(self, span: Span) -> Value {
        Value::error(self).with_span(span)
    }
}

impl IntoValue for Arc<dyn CustomValue> {
    fn into_value(self, span: Span) -> Value {
        Value::custom(self).with_span(span)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self, span: Span) -> Value {
        match self {
            Some(v) => v.into_value(span),
            None => Value::nothing().with_span(span),
        }
    }
}

// byte containers promote to Binary above; everything else list-shaped
// promotes item by item (u8 deliberately has no IntoValue impl so the
// two cannot collide)
impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self, span: Span) -> Value {
        Value::list(self.into_iter().map(|v| v.into_value(span)).collect()).with_span(span)
    }
}

impl<T: IntoValue, const N: usize> IntoValue for [T; N] {
    fn into_value(self, span: Span) -> Value {
        Value::list(self.into_iter().map(|v| v.into_value(span)).collect()).with_span(span)
    }
}

impl<T: IntoValue> IntoValue for HashMap<String, T> {
    fn into_value(self, span: Span) -> Value {
        let mut rec = Record::with_capacity(self.len());
        // hash order is unstable; records render in key order this way
        let mut entries: Vec<_> = self.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (k, v) in entries {
            rec.insert(k, v.into_value(span));
        }
        Value::record(rec).with_span(span)
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self, span: Span) -> Value {
        let mut rec = Record::with_capacity(self.len());
        for (k, v) in self {
            rec.insert(k, v.into_value(span));
        }
        Value::record(rec).with_span(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_kinds_promote_to_int() {
        assert_eq!(to_value(1i8), Value::int(1));
        assert_eq!(to_value(2i16), Value::int(2));
        assert_eq!(to_value(3i32), Value::int(3));
        assert_eq!(to_value(4i64), Value::int(4));
        assert_eq!(to_value(5u16), Value::int(5));
        assert_eq!(to_value(6u32), Value::int(6));
        assert_eq!(to_value(7u64), Value::int(7));
        assert_eq!(to_value(-1i8), Value::int(-1));
    }

    #[test]
    fn oversized_u64_promotes_to_error() {
        let v = to_value(u64::MAX);
        match v {
            Value::Error { val, .. } => {
                assert_eq!(
                    val.msg,
                    format!("uint {} is too large for int64", u64::MAX)
                );
            }
            other => panic!("expected error value, got {other:?}"),
        }
        // the boundary itself is fine
        assert_eq!(to_value(i64::MAX as u64), Value::int(i64::MAX));
    }

    #[test]
    fn floats_promote_to_float() {
        assert_eq!(to_value(0.03125f32), Value::float(0.03125));
        assert_eq!(to_value(0.03125f64), Value::float(0.03125));
    }

    #[test]
    fn byte_slices_stay_binary() {
        assert_eq!(
            to_value(vec![1u8, 2, 3]),
            Value::binary(vec![1u8, 2, 3])
        );
        assert_eq!(
            to_value(&[9u8, 8][..]),
            Value::binary(vec![9u8, 8])
        );
    }

    #[test]
    fn non_byte_sequences_promote_to_lists() {
        assert_eq!(
            to_value(vec!["a", "b"]),
            Value::list(vec![Value::string("a"), Value::string("b")])
        );
        assert_eq!(
            to_value([1i64, 2, 3]),
            Value::list(vec![Value::int(1), Value::int(2), Value::int(3)])
        );
        // items that cannot be represented become error items
        let v = to_value(vec![1u64, u64::MAX]);
        let items = v.as_list().unwrap();
        assert_eq!(items[0], Value::int(1));
        assert!(matches!(items[1], Value::Error { .. }));
    }

    #[test]
    fn string_keyed_maps_promote_to_records() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), 2i64);
        m.insert("a".to_string(), 1i64);
        let v = to_value(m);
        let rec = v.as_record().unwrap();
        assert_eq!(rec.get("a"), Some(&Value::int(1)));
        assert_eq!(rec.get("b"), Some(&Value::int(2)));
        let keys: Vec<_> = rec.keys().collect();
        assert_eq!(keys, vec!["a", "b"], "hash maps render in key order");
    }

    #[test]
    fn duration_promotes_to_nanoseconds() {
        assert_eq!(
            to_value(std::time::Duration::from_millis(2)),
            Value::duration(2_000_000)
        );
    }

    #[test]
    fn option_promotes_to_nothing_or_item() {
        assert_eq!(to_value(Option::<i64>::None), Value::nothing());
        assert_eq!(to_value(Some(4i64)), Value::int(4));
    }

    #[test]
    fn span_is_applied() {
        let span = Span::new(3, 9);
        assert_eq!(42i64.into_value(span).span(), span);
        assert_eq!("x".into_value(span).span(), span);
    }
}
