//! Cell paths: paths into subfields of lists, records and tables.

use std::fmt;

use rmpv::Value as Wire;

use crate::codec::{
    expect_array, expect_bool, expect_map, expect_str, expect_u64, map_of, unwrap_map, wrap,
    CodecError, Span,
};

/// Case handling of a string path member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Casing {
    #[default]
    Sensitive,
    Insensitive,
}

/// One member of a [`CellPath`]: either a numeric index or a column name.
///
/// Optional members do not cause errors when they cannot be accessed; the
/// path access just returns Nothing instead.
#[derive(Debug, Clone, PartialEq)]
pub enum PathMember {
    Int {
        val: u64,
        span: Span,
        optional: bool,
    },
    String {
        val: String,
        span: Span,
        optional: bool,
        casing: Casing,
    },
}

impl PathMember {
    pub fn int(val: u64) -> Self {
        PathMember::Int {
            val,
            span: Span::unknown(),
            optional: false,
        }
    }

    pub fn string(val: impl Into<String>) -> Self {
        PathMember::String {
            val: val.into(),
            span: Span::unknown(),
            optional: false,
            casing: Casing::Sensitive,
        }
    }

    pub fn optional(mut self) -> Self {
        match &mut self {
            PathMember::Int { optional, .. } | PathMember::String { optional, .. } => {
                *optional = true
            }
        }
        self
    }

    pub fn insensitive(mut self) -> Self {
        if let PathMember::String { casing, .. } = &mut self {
            *casing = Casing::Insensitive;
        }
        self
    }

    pub fn span(&self) -> Span {
        match self {
            PathMember::Int { span, .. } | PathMember::String { span, .. } => *span,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            PathMember::Int { optional, .. } | PathMember::String { optional, .. } => *optional,
        }
    }

    fn to_wire(&self) -> Wire {
        let (tag, val, casing, span, optional) = match self {
            PathMember::Int {
                val,
                span,
                optional,
            } => ("Int", Wire::from(*val), Casing::Sensitive, span, optional),
            PathMember::String {
                val,
                span,
                optional,
                casing,
            } => ("String", Wire::from(val.as_str()), *casing, span, optional),
        };
        let casing = match casing {
            Casing::Sensitive => "Sensitive",
            Casing::Insensitive => "Insensitive",
        };
        wrap(
            tag,
            map_of(vec![
                ("val", val),
                ("span", span.to_wire()),
                ("casing", Wire::from(casing)),
                ("optional", Wire::from(*optional)),
            ]),
        )
    }

    fn from_wire(w: Wire) -> Result<PathMember, CodecError> {
        let (tag, body) = unwrap_map(w, "PathMember")?;
        let entries = expect_map(body, "PathMember")?;

        let mut sval = String::new();
        let mut ival = 0u64;
        let mut span = Span::unknown();
        let mut optional = false;
        let mut casing = Casing::Sensitive;

        for (k, v) in entries {
            let key = expect_str(k, "PathMember key")?;
            match key.as_str() {
                "val" => match tag.as_str() {
                    "Int" => ival = expect_u64(v, "PathMember val")?,
                    "String" => sval = expect_str(v, "PathMember val")?,
                    other => {
                        return Err(CodecError::invalid(format!(
                            "unsupported CellPath member type {other}"
                        )))
                    }
                },
                "span" => span = Span::from_wire(v)?,
                "optional" => optional = expect_bool(v, "PathMember optional")?,
                "casing" => {
                    let s = expect_str(v, "PathMember casing")?;
                    casing = match s.as_str() {
                        "Sensitive" => Casing::Sensitive,
                        "Insensitive" => Casing::Insensitive,
                        other => {
                            return Err(CodecError::invalid(format!(
                                "decoding key \"casing\": unsupported value {other:?}"
                            )))
                        }
                    };
                }
                other => {
                    return Err(CodecError::invalid(format!(
                        "unsupported key {other:?} in PathMember"
                    )))
                }
            }
        }

        match tag.as_str() {
            "Int" => Ok(PathMember::Int {
                val: ival,
                span,
                optional,
            }),
            "String" => Ok(PathMember::String {
                val: sval,
                span,
                optional,
                casing,
            }),
            other => Err(CodecError::invalid(format!(
                "unsupported CellPath member type {other}"
            ))),
        }
    }
}

impl fmt::Display for PathMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMember::Int { val, optional, .. } => {
                write!(f, "{val}{}", if *optional { "?" } else { "" })
            }
            PathMember::String {
                val,
                optional,
                casing,
                ..
            } => {
                write!(f, "{val}")?;
                if *optional {
                    write!(f, "?")?;
                }
                if *casing == Casing::Insensitive {
                    write!(f, "!")?;
                }
                Ok(())
            }
        }
    }
}

/// An ordered path into subfields of a value. A path with zero members
/// denotes the root.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellPath {
    pub members: Vec<PathMember>,
}

impl CellPath {
    pub fn new() -> Self {
        CellPath::default()
    }

    pub fn with(mut self, member: PathMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn to_wire(&self) -> Wire {
        wrap(
            "members",
            Wire::Array(self.members.iter().map(PathMember::to_wire).collect()),
        )
    }

    pub(crate) fn from_wire(w: Wire) -> Result<CellPath, CodecError> {
        let (key, body) = unwrap_map(w, "CellPath")?;
        if key != "members" {
            return Err(CodecError::invalid(format!(
                "expected key 'members', got {key:?}"
            )));
        }
        let items = expect_array(body, "CellPath members")?;
        let total = items.len();
        let members = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                PathMember::from_wire(item)
                    .map_err(|e| e.context(format!("decode CellPath member [{i}/{total}]")))
            })
            .collect::<Result<_, _>>()?;
        Ok(CellPath { members })
    }
}

impl fmt::Display for CellPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}
