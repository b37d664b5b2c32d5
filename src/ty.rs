//! The value-type vocabulary used in command signatures.

use rmpv::Value as Wire;

use crate::codec::wrap;

/// Describes how values are typed in a signature's `input_output_types`.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Binary,
    Block,
    Bool,
    CellPath,
    Closure,
    /// A plugin custom type, by name.
    Custom(String),
    Date,
    Duration,
    Error,
    Filesize,
    Float,
    Glob,
    Int,
    List(Box<Type>),
    ListStream,
    Nothing,
    Number,
    OneOf(Vec<Type>),
    Range,
    Record(Vec<(String, Type)>),
    Signature,
    String,
    Table(Vec<(String, Type)>),
}

impl Type {
    pub(crate) fn to_wire(&self) -> Wire {
        match self {
            Type::Any => Wire::from("Any"),
            Type::Binary => Wire::from("Binary"),
            Type::Block => Wire::from("Block"),
            Type::Bool => Wire::from("Bool"),
            Type::CellPath => Wire::from("CellPath"),
            Type::Closure => Wire::from("Closure"),
            Type::Custom(name) => wrap("Custom", Wire::from(name.as_str())),
            Type::Date => Wire::from("Date"),
            Type::Duration => Wire::from("Duration"),
            Type::Error => Wire::from("Error"),
            Type::Filesize => Wire::from("Filesize"),
            Type::Float => Wire::from("Float"),
            Type::Glob => Wire::from("Glob"),
            Type::Int => Wire::from("Int"),
            Type::List(item) => wrap("List", item.to_wire()),
            Type::ListStream => Wire::from("ListStream"),
            Type::Nothing => Wire::from("Nothing"),
            Type::Number => Wire::from("Number"),
            Type::OneOf(items) => wrap(
                "OneOf",
                Wire::Array(items.iter().map(Type::to_wire).collect()),
            ),
            Type::Range => Wire::from("Range"),
            Type::Record(fields) => wrap("Record", encode_fields(fields)),
            Type::Signature => Wire::from("Signature"),
            Type::String => Wire::from("String"),
            Type::Table(fields) => wrap("Table", encode_fields(fields)),
        }
    }
}

fn encode_fields(fields: &[(String, Type)]) -> Wire {
    Wire::Array(
        fields
            .iter()
            .map(|(name, ty)| Wire::Array(vec![Wire::from(name.as_str()), ty.to_wire()]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_types_encode_as_strings() {
        assert_eq!(Type::Any.to_wire(), Wire::from("Any"));
        assert_eq!(Type::ListStream.to_wire(), Wire::from("ListStream"));
    }

    #[test]
    fn custom_carries_its_name() {
        assert_eq!(
            Type::Custom("BoltDb".into()).to_wire(),
            wrap("Custom", Wire::from("BoltDb"))
        );
    }

    #[test]
    fn nested_list_type() {
        let wire = Type::List(Box::new(Type::Record(vec![(
            "size".into(),
            Type::Filesize,
        )])))
        .to_wire();
        let expected = wrap(
            "List",
            wrap(
                "Record",
                Wire::Array(vec![Wire::Array(vec![
                    Wire::from("size"),
                    Wire::from("Filesize"),
                ])]),
            ),
        );
        assert_eq!(wire, expected);
    }
}
