//! Operators for custom-value `Operation` calls.

use std::fmt;

use rmpv::Value as Wire;

use crate::codec::{expect_str, unwrap_map, wrap, CodecError};

/// An operator applied to a custom value.
///
/// Packed 32-bit representation: the upper 16 bits select the class
/// (`Comparison`, `Math`, `Boolean`, `Bits`, `Assignment`), the lower 16
/// bits the operator within that class. The wire form is `{Class: Op}`,
/// e.g. `{"Bits": "BitOr"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operator(u32);

const CLASS_COMPARISON: u32 = 0 << 16;
const CLASS_MATH: u32 = 1 << 16;
const CLASS_BOOLEAN: u32 = 2 << 16;
const CLASS_BITS: u32 = 3 << 16;
const CLASS_ASSIGNMENT: u32 = 4 << 16;

#[rustfmt::skip]
impl Operator {
    pub const COMPARISON_EQUAL: Operator                 = Operator(CLASS_COMPARISON);
    pub const COMPARISON_NOT_EQUAL: Operator             = Operator(CLASS_COMPARISON | 1);
    pub const COMPARISON_LESS_THAN: Operator             = Operator(CLASS_COMPARISON | 2);
    pub const COMPARISON_GREATER_THAN: Operator          = Operator(CLASS_COMPARISON | 3);
    pub const COMPARISON_LESS_THAN_OR_EQUAL: Operator    = Operator(CLASS_COMPARISON | 4);
    pub const COMPARISON_GREATER_THAN_OR_EQUAL: Operator = Operator(CLASS_COMPARISON | 5);
    pub const COMPARISON_REGEX_MATCH: Operator           = Operator(CLASS_COMPARISON | 6);
    pub const COMPARISON_NOT_REGEX_MATCH: Operator       = Operator(CLASS_COMPARISON | 7);
    pub const COMPARISON_IN: Operator                    = Operator(CLASS_COMPARISON | 8);
    pub const COMPARISON_NOT_IN: Operator                = Operator(CLASS_COMPARISON | 9);
    pub const COMPARISON_HAS: Operator                   = Operator(CLASS_COMPARISON | 10);
    pub const COMPARISON_NOT_HAS: Operator               = Operator(CLASS_COMPARISON | 11);
    pub const COMPARISON_STARTS_WITH: Operator           = Operator(CLASS_COMPARISON | 12);
    pub const COMPARISON_ENDS_WITH: Operator             = Operator(CLASS_COMPARISON | 13);

    pub const MATH_ADD: Operator          = Operator(CLASS_MATH);
    pub const MATH_SUBTRACT: Operator     = Operator(CLASS_MATH | 1);
    pub const MATH_MULTIPLY: Operator     = Operator(CLASS_MATH | 2);
    pub const MATH_DIVIDE: Operator       = Operator(CLASS_MATH | 3);
    pub const MATH_FLOOR_DIVIDE: Operator = Operator(CLASS_MATH | 4);
    pub const MATH_MODULO: Operator       = Operator(CLASS_MATH | 5);
    pub const MATH_POW: Operator          = Operator(CLASS_MATH | 6);
    pub const MATH_CONCATENATE: Operator  = Operator(CLASS_MATH | 7);

    pub const BOOLEAN_OR: Operator  = Operator(CLASS_BOOLEAN);
    pub const BOOLEAN_XOR: Operator = Operator(CLASS_BOOLEAN | 1);
    pub const BOOLEAN_AND: Operator = Operator(CLASS_BOOLEAN | 2);

    pub const BITS_BIT_OR: Operator      = Operator(CLASS_BITS);
    pub const BITS_BIT_XOR: Operator     = Operator(CLASS_BITS | 1);
    pub const BITS_BIT_AND: Operator     = Operator(CLASS_BITS | 2);
    pub const BITS_SHIFT_LEFT: Operator  = Operator(CLASS_BITS | 3);
    pub const BITS_SHIFT_RIGHT: Operator = Operator(CLASS_BITS | 4);

    pub const ASSIGNMENT_ASSIGN: Operator             = Operator(CLASS_ASSIGNMENT);
    pub const ASSIGNMENT_ADD_ASSIGN: Operator         = Operator(CLASS_ASSIGNMENT | 1);
    pub const ASSIGNMENT_SUBTRACT_ASSIGN: Operator    = Operator(CLASS_ASSIGNMENT | 2);
    pub const ASSIGNMENT_MULTIPLY_ASSIGN: Operator    = Operator(CLASS_ASSIGNMENT | 3);
    pub const ASSIGNMENT_DIVIDE_ASSIGN: Operator      = Operator(CLASS_ASSIGNMENT | 4);
    pub const ASSIGNMENT_CONCATENATE_ASSIGN: Operator = Operator(CLASS_ASSIGNMENT | 5);
}

const CLASS_NAMES: [&str; 5] = ["Comparison", "Math", "Boolean", "Bits", "Assignment"];

const OP_NAMES: [&[&str]; 5] = [
    &[
        "Equal",
        "NotEqual",
        "LessThan",
        "GreaterThan",
        "LessThanOrEqual",
        "GreaterThanOrEqual",
        "RegexMatch",
        "NotRegexMatch",
        "In",
        "NotIn",
        "Has",
        "NotHas",
        "StartsWith",
        "EndsWith",
    ],
    &[
        "Add",
        "Subtract",
        "Multiply",
        "Divide",
        "FloorDivide",
        "Modulo",
        "Pow",
        "Concatenate",
    ],
    &["Or", "Xor", "And"],
    &["BitOr", "BitXor", "BitAnd", "ShiftLeft", "ShiftRight"],
    &[
        "Assign",
        "AddAssign",
        "SubtractAssign",
        "MultiplyAssign",
        "DivideAssign",
        "ConcatenateAssign",
    ],
];

impl Operator {
    /// The class part of the packed representation (upper 16 bits).
    pub fn class(&self) -> u32 {
        self.0 & 0xFFFF_0000
    }

    fn names(&self) -> Option<(&'static str, &'static str)> {
        let class = (self.0 >> 16) as usize;
        let idx = (self.0 & 0xFFFF) as usize;
        let class_name = CLASS_NAMES.get(class)?;
        let op_name = OP_NAMES.get(class)?.get(idx)?;
        Some((class_name, op_name))
    }

    pub(crate) fn to_wire(&self) -> Result<Wire, CodecError> {
        let (class, op) = self
            .names()
            .ok_or_else(|| CodecError::invalid(format!("unsupported Operator value {}", self.0)))?;
        Ok(wrap(class, Wire::from(op)))
    }

    pub(crate) fn from_wire(w: Wire) -> Result<Operator, CodecError> {
        let (class_name, op) = unwrap_map(w, "Operator")?;
        let class = CLASS_NAMES
            .iter()
            .position(|n| *n == class_name)
            .ok_or_else(|| {
                CodecError::invalid(format!("unknown Operator class \"{class_name}\""))
            })?;
        let op_name = expect_str(op, "Operator name")?;
        let idx = OP_NAMES[class]
            .iter()
            .position(|n| *n == op_name)
            .ok_or_else(|| {
                CodecError::invalid(format!(
                    "unknown Operator \"{op_name}\" in class \"{class_name}\""
                ))
            })?;
        Ok(Operator(((class as u32) << 16) | idx as u32))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.names() {
            Some((class, op)) => write!(f, "{class}.{op}"),
            None => write!(f, "Operator({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_operator_roundtrips() {
        for (class, ops) in OP_NAMES.iter().enumerate() {
            for idx in 0..ops.len() {
                let op = Operator(((class as u32) << 16) | idx as u32);
                let wire = op.to_wire().expect("encode");
                let back = Operator::from_wire(wire).expect("decode");
                assert_eq!(op, back, "{op}");
            }
        }
    }

    #[test]
    fn unknown_class_diagnostic() {
        let wire = wrap("Quantum", Wire::from("Entangle"));
        let err = Operator::from_wire(wire).unwrap_err();
        assert_eq!(err.to_string(), "unknown Operator class \"Quantum\"");
    }

    #[test]
    fn unknown_op_diagnostic() {
        let wire = wrap("Math", Wire::from("Plus"));
        let err = Operator::from_wire(wire).unwrap_err();
        assert_eq!(err.to_string(), "unknown Operator \"Plus\" in class \"Math\"");
    }

    #[test]
    fn class_extraction() {
        assert_eq!(Operator::MATH_POW.class(), CLASS_MATH);
        assert_eq!(Operator::BITS_SHIFT_RIGHT.class(), CLASS_BITS);
        assert_ne!(
            Operator::COMPARISON_EQUAL.class(),
            Operator::ASSIGNMENT_ASSIGN.class()
        );
    }

    #[test]
    fn display_names_class_and_op() {
        assert_eq!(Operator::BITS_BIT_OR.to_string(), "Bits.BitOr");
        assert_eq!(Operator::MATH_ADD.to_string(), "Math.Add");
    }
}
