//! Syntactic shapes describing how command arguments are parsed.

use rmpv::Value as Wire;

use crate::codec::wrap;

/// The parse shape of a positional argument or flag value.
///
/// Simple shapes encode as their bare name; parameterized shapes encode as
/// a single-key wrapper map.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxShape {
    /// Any syntactic form is allowed.
    Any,
    /// A binary literal.
    Binary,
    Block,
    Boolean,
    CellPath,
    /// A closure, optionally with declared argument shapes.
    Closure(Vec<SyntaxShape>),
    DateTime,
    Directory,
    Duration,
    Error,
    Expression,
    ExternalArgument,
    Filepath,
    Filesize,
    Float,
    FullCellPath,
    GlobPattern,
    Int,
    ImportPattern,
    List(Box<SyntaxShape>),
    MathExpression,
    MatchBlock,
    Nothing,
    /// Only a numeric (integer or float) value is allowed.
    Number,
    OneOf(Vec<SyntaxShape>),
    Operator,
    Range,
    Record(Vec<(String, SyntaxShape)>),
    RowCondition,
    Signature,
    String,
    Table(Vec<(String, SyntaxShape)>),
    /// A variable with optional type, `x` or `x: int`.
    VarWithOptType,
}

impl SyntaxShape {
    pub(crate) fn to_wire(&self) -> Wire {
        match self {
            SyntaxShape::Any => Wire::from("Any"),
            SyntaxShape::Binary => Wire::from("Binary"),
            SyntaxShape::Block => Wire::from("Block"),
            SyntaxShape::Boolean => Wire::from("Boolean"),
            SyntaxShape::CellPath => Wire::from("CellPath"),
            SyntaxShape::Closure(args) => wrap(
                "Closure",
                Wire::Array(args.iter().map(SyntaxShape::to_wire).collect()),
            ),
            SyntaxShape::DateTime => Wire::from("DateTime"),
            SyntaxShape::Directory => Wire::from("Directory"),
            SyntaxShape::Duration => Wire::from("Duration"),
            SyntaxShape::Error => Wire::from("Error"),
            SyntaxShape::Expression => Wire::from("Expression"),
            SyntaxShape::ExternalArgument => Wire::from("ExternalArgument"),
            SyntaxShape::Filepath => Wire::from("Filepath"),
            SyntaxShape::Filesize => Wire::from("Filesize"),
            SyntaxShape::Float => Wire::from("Float"),
            SyntaxShape::FullCellPath => Wire::from("FullCellPath"),
            SyntaxShape::GlobPattern => Wire::from("GlobPattern"),
            SyntaxShape::Int => Wire::from("Int"),
            SyntaxShape::ImportPattern => Wire::from("ImportPattern"),
            SyntaxShape::List(item) => wrap("List", item.to_wire()),
            SyntaxShape::MathExpression => Wire::from("MathExpression"),
            SyntaxShape::MatchBlock => Wire::from("MatchBlock"),
            SyntaxShape::Nothing => Wire::from("Nothing"),
            SyntaxShape::Number => Wire::from("Number"),
            SyntaxShape::OneOf(items) => wrap(
                "OneOf",
                Wire::Array(items.iter().map(SyntaxShape::to_wire).collect()),
            ),
            SyntaxShape::Operator => Wire::from("Operator"),
            SyntaxShape::Range => Wire::from("Range"),
            SyntaxShape::Record(fields) => wrap("Record", encode_fields(fields)),
            SyntaxShape::RowCondition => Wire::from("RowCondition"),
            SyntaxShape::Signature => Wire::from("Signature"),
            SyntaxShape::String => Wire::from("String"),
            SyntaxShape::Table(fields) => wrap("Table", encode_fields(fields)),
            SyntaxShape::VarWithOptType => Wire::from("VarWithOptType"),
        }
    }
}

fn encode_fields(fields: &[(String, SyntaxShape)]) -> Wire {
    Wire::Array(
        fields
            .iter()
            .map(|(name, shape)| {
                Wire::Array(vec![Wire::from(name.as_str()), shape.to_wire()])
            })
            .collect(),
    )
}
