//! Integer ranges.

use rmpv::Value as Wire;

use crate::codec::{
    expect_i64, expect_map, expect_str, map_of, unwrap_map, wrap, CodecError,
};

/// End-bound kind of an [`IntRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeBound {
    /// Iteration stops at `end`.
    #[default]
    Included,
    /// Iteration stops strictly before `end`.
    Excluded,
    /// No end bound; iteration runs to the extremum of the step direction.
    Unbounded,
}

/// The `IntRange` variant of the engine's Range type.
///
/// `step` must be non-zero; iteration direction is the sign of `step`.
/// Overflow of `start + step` terminates iteration; the range does not
/// wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub start: i64,
    pub step: i64,
    pub end: i64,
    pub bound: RangeBound,
}

impl IntRange {
    pub fn validate(&self) -> Result<(), String> {
        match self.step {
            0 => Err("step must be non-zero".into()),
            s if s > 0 => {
                if self.bound != RangeBound::Unbounded && self.start > self.end {
                    Err(format!(
                        "start value must be smaller than end value, got {}..{} (step {})",
                        self.start, self.end, self.step
                    ))
                } else {
                    Ok(())
                }
            }
            _ => {
                if self.bound != RangeBound::Unbounded && self.start <= self.end {
                    Err(format!(
                        "start value must be greater than end value, got {}..{} (step {})",
                        self.start, self.end, self.step
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Iterate over all values of the range. An invalid range (zero step)
    /// yields nothing.
    pub fn iter(&self) -> IntRangeIter {
        let limit = match (self.step.signum(), self.bound) {
            (0, _) => None,
            (1, RangeBound::Unbounded) => Some(i64::MAX),
            (1, RangeBound::Included) => Some(self.end),
            (1, RangeBound::Excluded) => self.end.checked_sub(1),
            (_, RangeBound::Unbounded) => Some(i64::MIN),
            (_, RangeBound::Included) => Some(self.end),
            (_, RangeBound::Excluded) => self.end.checked_add(1),
        };
        IntRangeIter {
            next: Some(self.start),
            step: self.step,
            limit,
        }
    }

    pub(crate) fn to_wire(&self) -> Result<Wire, CodecError> {
        self.validate()
            .map_err(|e| CodecError::invalid(format!("invalid IntRange definition: {e}")))?;

        let end = match self.bound {
            RangeBound::Unbounded => Wire::from("Unbounded"),
            RangeBound::Included => wrap("Included", Wire::from(self.end)),
            RangeBound::Excluded => wrap("Excluded", Wire::from(self.end)),
        };
        Ok(wrap(
            "IntRange",
            map_of(vec![
                ("start", Wire::from(self.start)),
                ("step", Wire::from(self.step)),
                ("end", end),
            ]),
        ))
    }

    /// Decode the `{IntRange: {...}}` wrapper.
    pub(crate) fn from_wire(w: Wire) -> Result<IntRange, CodecError> {
        let (kind, body) = unwrap_map(w, "Range")?;
        match kind.as_str() {
            "IntRange" => IntRange::from_wire_body(body),
            "FloatRange" => Err(CodecError::invalid("FloatRange is not implemented")),
            other => Err(CodecError::invalid(format!(
                "unsupported Range type: {other:?}"
            ))),
        }
    }

    fn from_wire_body(w: Wire) -> Result<IntRange, CodecError> {
        let entries = expect_map(w, "IntRange")?;
        let mut range = IntRange {
            start: 0,
            step: 0,
            end: 0,
            bound: RangeBound::Included,
        };
        for (k, v) in entries {
            let key = expect_str(k, "IntRange key")?;
            match key.as_str() {
                "start" => range.start = expect_i64(v, "IntRange start")?,
                "step" => range.step = expect_i64(v, "IntRange step")?,
                "end" => {
                    let (bound, end) = decode_end_bound(v)?;
                    range.bound = bound;
                    range.end = end;
                }
                other => {
                    return Err(CodecError::invalid(format!(
                        "unexpected key {other:?} in IntRange"
                    )))
                }
            }
        }
        Ok(range)
    }
}

/// The end bound is either the bare string `"Unbounded"` or a wrapper map
/// `{Included|Excluded: int}`. An `Unbounded` bound tolerates (and
/// discards) any stray end value; re-encode normalizes it to 0.
fn decode_end_bound(w: Wire) -> Result<(RangeBound, i64), CodecError> {
    match w {
        Wire::String(_) => {
            let name = expect_str(w, "IntRange end")?;
            match name.as_str() {
                "Unbounded" => Ok((RangeBound::Unbounded, 0)),
                other => Err(CodecError::invalid(format!(
                    "unsupported bound name {other:?}"
                ))),
            }
        }
        Wire::Map(_) => {
            let (name, end) = unwrap_map(w, "IntRange end")?;
            let bound = match name.as_str() {
                "Included" => RangeBound::Included,
                "Excluded" => RangeBound::Excluded,
                "Unbounded" => return Ok((RangeBound::Unbounded, 0)),
                other => {
                    return Err(CodecError::invalid(format!(
                        "unsupported bound name {other:?}"
                    )))
                }
            };
            Ok((bound, expect_i64(end, "IntRange end value")?))
        }
        other => Err(CodecError::invalid(format!(
            "unexpected end bound of IntRange: {}",
            crate::codec::kind_of(&other)
        ))),
    }
}

/// Iterator over an [`IntRange`].
pub struct IntRangeIter {
    next: Option<i64>,
    step: i64,
    /// inclusive terminal value in the step direction; `None` when the
    /// bound is empty (e.g. an excluded end at the type extremum)
    limit: Option<i64>,
}

impl Iterator for IntRangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        let limit = self.limit?;
        let in_range = if self.step > 0 {
            current <= limit
        } else if self.step < 0 {
            current >= limit
        } else {
            false
        };
        if !in_range {
            self.next = None;
            return None;
        }
        // overflow ends iteration instead of wrapping
        self.next = current.checked_add(self.step);
        Some(current)
    }
}
