//! Command declarations: signatures, flags, positionals and examples.

use std::sync::Arc;

use rmpv::Value as Wire;

use crate::codec::CodecError;
use crate::error::LabeledError;
use crate::exec::CallContext;
use crate::shape::SyntaxShape;
use crate::ty::Type;
use crate::value::{Value, ValueCx};

/// The callback executed when the engine invokes a command.
pub type Handler = Arc<dyn Fn(&mut CallContext) -> Result<(), LabeledError> + Send + Sync>;

/// A command provided by the plugin: its signature, usage examples, and
/// the handler executed on invocation.
#[derive(Clone)]
pub struct Command {
    pub signature: Signature,
    pub examples: Vec<Example>,
    pub run: Handler,
}

impl Command {
    pub fn new(
        signature: Signature,
        run: impl Fn(&mut CallContext) -> Result<(), LabeledError> + Send + Sync + 'static,
    ) -> Command {
        Command {
            signature,
            examples: Vec::new(),
            run: Arc::new(run),
        }
    }

    pub fn with_examples(mut self, examples: Vec<Example>) -> Command {
        self.examples = examples;
        self
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub(crate) fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let examples = self
            .examples
            .iter()
            .map(|e| e.to_wire(cx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(crate::codec::map_of(vec![
            ("sig", self.signature.to_wire(cx)?),
            ("examples", Wire::Array(examples)),
        ]))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("signature", &self.signature)
            .field("examples", &self.examples)
            .finish_non_exhaustive()
    }
}

/// Declaration of a command: everything the engine needs to parse an
/// invocation and render completions.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub name: String,
    /// A single sentence; shown in the completion menu.
    pub description: String,
    /// Additional documentation of the command.
    pub extra_description: String,
    pub search_terms: Vec<String>,
    pub category: String,
    pub required_positional: Vec<PositionalArg>,
    pub optional_positional: Vec<PositionalArg>,
    pub rest_positional: Option<PositionalArg>,
    /// Flags and named arguments. A `help`/`-h` flag is appended when the
    /// command is registered; declaring one here is an error.
    pub named: Vec<Flag>,
    pub input_output_types: Vec<(Type, Type)>,
    pub is_filter: bool,
    pub creates_scope: bool,
    pub allows_unknown_args: bool,
    pub allow_missing_examples: bool,
}

impl Signature {
    pub fn build(name: impl Into<String>) -> Signature {
        Signature {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Signature {
        self.description = desc.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Signature {
        self.category = category.into();
        self
    }

    pub fn search_terms(mut self, terms: Vec<String>) -> Signature {
        self.search_terms = terms;
        self
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        shape: SyntaxShape,
        desc: impl Into<String>,
    ) -> Signature {
        self.required_positional.push(PositionalArg {
            name: name.into(),
            desc: desc.into(),
            shape,
            var_id: None,
            default_value: None,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        shape: SyntaxShape,
        desc: impl Into<String>,
    ) -> Signature {
        self.optional_positional.push(PositionalArg {
            name: name.into(),
            desc: desc.into(),
            shape,
            var_id: None,
            default_value: None,
        });
        self
    }

    pub fn rest(
        mut self,
        name: impl Into<String>,
        shape: SyntaxShape,
        desc: impl Into<String>,
    ) -> Signature {
        self.rest_positional = Some(PositionalArg {
            name: name.into(),
            desc: desc.into(),
            shape,
            var_id: None,
            default_value: None,
        });
        self
    }

    pub fn named_flag(mut self, flag: Flag) -> Signature {
        self.named.push(flag);
        self
    }

    pub fn input_output(mut self, input: Type, output: Type) -> Signature {
        self.input_output_types.push((input, output));
        self
    }

    pub fn filter(mut self) -> Signature {
        self.is_filter = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LabeledError> {
        if self.name.is_empty() {
            return Err(LabeledError::new("command must have name"));
        }
        if self.category.is_empty() {
            return Err(LabeledError::new("command must have category"));
        }
        if self.description.is_empty() {
            return Err(LabeledError::new("command description must have value"));
        }
        if self.search_terms.is_empty() {
            return Err(LabeledError::new("command search terms must have value"));
        }
        if self.input_output_types.is_empty() {
            return Err(LabeledError::new(
                "command input-output types must be specified",
            ));
        }
        Ok(())
    }

    pub(crate) fn add_help(&mut self) -> Result<(), LabeledError> {
        if self
            .named
            .iter()
            .any(|f| f.long == "help" || f.short == Some('h'))
        {
            return Err(LabeledError::new("help flag is already registered"));
        }
        self.named.push(Flag {
            long: "help".into(),
            short: Some('h'),
            shape: None,
            required: false,
            desc: "Display the help message for this command".into(),
            var_id: None,
            default_value: None,
        });
        Ok(())
    }

    pub(crate) fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let mut entries = vec![
            ("name", Wire::from(self.name.as_str())),
            ("description", Wire::from(self.description.as_str())),
            (
                "extra_description",
                Wire::from(self.extra_description.as_str()),
            ),
            ("category", Wire::from(self.category.as_str())),
            (
                "search_terms",
                Wire::Array(
                    self.search_terms
                        .iter()
                        .map(|t| Wire::from(t.as_str()))
                        .collect(),
                ),
            ),
            (
                "required_positional",
                encode_positionals(&self.required_positional, cx)?,
            ),
            (
                "optional_positional",
                encode_positionals(&self.optional_positional, cx)?,
            ),
        ];
        if let Some(rest) = &self.rest_positional {
            entries.push(("rest_positional", rest.to_wire(cx)?));
        }
        let named = self
            .named
            .iter()
            .map(|f| f.to_wire(cx))
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(("named", Wire::Array(named)));
        entries.push((
            "input_output_types",
            Wire::Array(
                self.input_output_types
                    .iter()
                    .map(|(i, o)| Wire::Array(vec![i.to_wire(), o.to_wire()]))
                    .collect(),
            ),
        ));
        entries.push(("is_filter", Wire::from(self.is_filter)));
        entries.push(("creates_scope", Wire::from(self.creates_scope)));
        entries.push(("allows_unknown_args", Wire::from(self.allows_unknown_args)));
        entries.push((
            "allow_variants_without_examples",
            Wire::from(self.allow_missing_examples),
        ));
        Ok(crate::codec::map_of(entries))
    }
}

/// A positional argument declaration.
#[derive(Debug, Clone)]
pub struct PositionalArg {
    pub name: String,
    pub desc: String,
    pub shape: SyntaxShape,
    pub var_id: Option<u64>,
    pub default_value: Option<Value>,
}

impl PositionalArg {
    fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let mut entries = vec![
            ("name", Wire::from(self.name.as_str())),
            ("desc", Wire::from(self.desc.as_str())),
            ("shape", self.shape.to_wire()),
        ];
        if let Some(var_id) = self.var_id {
            entries.push(("var_id", Wire::from(var_id)));
        }
        if let Some(default) = &self.default_value {
            entries.push(("default_value", default.to_wire(cx)?));
        }
        Ok(crate::codec::map_of(entries))
    }
}

/// A flag declaration. A flag without a shape is a toggle switch; with a
/// shape it is a named argument taking a value of that shape.
#[derive(Debug, Clone)]
pub struct Flag {
    pub long: String,
    pub short: Option<char>,
    pub shape: Option<SyntaxShape>,
    pub required: bool,
    pub desc: String,
    pub var_id: Option<u64>,
    pub default_value: Option<Value>,
}

impl Flag {
    /// A toggle switch flag.
    pub fn switch(long: impl Into<String>, desc: impl Into<String>) -> Flag {
        Flag {
            long: long.into(),
            short: None,
            shape: None,
            required: false,
            desc: desc.into(),
            var_id: None,
            default_value: None,
        }
    }

    /// A named argument taking a value of the given shape.
    pub fn named(long: impl Into<String>, shape: SyntaxShape, desc: impl Into<String>) -> Flag {
        Flag {
            long: long.into(),
            short: None,
            shape: Some(shape),
            required: false,
            desc: desc.into(),
            var_id: None,
            default_value: None,
        }
    }

    pub fn short(mut self, short: char) -> Flag {
        self.short = Some(short);
        self
    }

    pub fn default(mut self, value: Value) -> Flag {
        self.default_value = Some(value);
        self
    }

    fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let mut entries = vec![("long", Wire::from(self.long.as_str()))];
        if let Some(short) = self.short {
            entries.push(("short", Wire::from(short.to_string())));
        }
        entries.push(("desc", Wire::from(self.desc.as_str())));
        entries.push(("required", Wire::from(self.required)));
        if let Some(shape) = &self.shape {
            entries.push(("arg", shape.to_wire()));
        }
        if let Some(var_id) = self.var_id {
            entries.push(("var_id", Wire::from(var_id)));
        }
        if let Some(default) = &self.default_value {
            entries.push(("default_value", default.to_wire(cx)?));
        }
        Ok(crate::codec::map_of(entries))
    }
}

fn encode_positionals(args: &[PositionalArg], cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
    Ok(Wire::Array(
        args.iter()
            .map(|a| a.to_wire(cx))
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

/// A usage example shown in the command's help.
#[derive(Debug, Clone)]
pub struct Example {
    pub example: String,
    pub description: String,
    pub result: Option<Value>,
}

impl Example {
    fn to_wire(&self, cx: &ValueCx<'_>) -> Result<Wire, CodecError> {
        let mut entries = vec![
            ("description", Wire::from(self.description.as_str())),
            ("example", Wire::from(self.example.as_str())),
        ];
        if let Some(result) = &self.result {
            entries.push(("result", result.to_wire(cx)?));
        }
        Ok(crate::codec::map_of(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{expect_map, expect_str};
    use crate::custom::{CustomStore, IdSource};

    fn test_signature() -> Signature {
        Signature::build("inc")
            .description("increment the input")
            .category("Experimental")
            .search_terms(vec!["math".into()])
            .input_output(Type::Int, Type::Int)
    }

    #[test]
    fn validate_requires_the_basics() {
        assert!(test_signature().validate().is_ok());
        assert!(Signature::build("").validate().is_err());
        assert!(Signature::build("x").validate().is_err(), "no category");

        let no_io = Signature::build("x")
            .description("d")
            .category("c")
            .search_terms(vec!["t".into()]);
        assert!(no_io.validate().is_err());
    }

    #[test]
    fn help_flag_is_added_once() {
        let mut sig = test_signature();
        sig.add_help().expect("first add succeeds");
        assert!(sig.named.iter().any(|f| f.long == "help"));

        let err = sig.add_help().unwrap_err();
        assert_eq!(err.msg, "help flag is already registered");
    }

    #[test]
    fn short_h_collides_with_help() {
        let mut sig = test_signature().named_flag(Flag::switch("hurry", "go fast").short('h'));
        assert!(sig.add_help().is_err());
    }

    #[test]
    fn signature_wire_layout() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let sig = test_signature()
            .required("amount", SyntaxShape::Int, "how much to add")
            .named_flag(Flag::named("base", SyntaxShape::Int, "number base").default(Value::int(10)));
        let wire = sig.to_wire(&cx).expect("encode");
        let entries = expect_map(wire, "signature").unwrap();
        let keys: Vec<String> = entries
            .iter()
            .map(|(k, _)| expect_str(k.clone(), "key").unwrap())
            .collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "description",
                "extra_description",
                "category",
                "search_terms",
                "required_positional",
                "optional_positional",
                "named",
                "input_output_types",
                "is_filter",
                "creates_scope",
                "allows_unknown_args",
                "allow_variants_without_examples",
            ]
        );
    }

    #[test]
    fn rest_positional_is_present_only_when_set() {
        let ids = IdSource::default();
        let customs = CustomStore::default();
        let cx = ValueCx {
            ids: &ids,
            customs: &customs,
        };

        let sig = test_signature().rest("paths", SyntaxShape::Filepath, "files to process");
        let wire = sig.to_wire(&cx).unwrap();
        let entries = expect_map(wire, "signature").unwrap();
        assert!(entries
            .iter()
            .any(|(k, _)| k.as_str() == Some("rest_positional")));
    }
}
