//! The structured error the protocol carries across the wire.
//!
//! A [`LabeledError`] travels in three positions: as a `CallResponse`
//! error, as the `Err` side of a raw-stream `Data` frame, and as an `Error`
//! value inside a list stream. The wire shape is identical in all three;
//! only the envelope differs.

use std::error::Error as StdError;
use std::fmt;

use rmpv::Value as Wire;

use crate::codec::{expect_array, expect_map, expect_str, map_of, CodecError, Span};

/// A labeled span attached to a [`LabeledError`], pointing the user at the
/// offending source location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorLabel {
    pub text: String,
    pub span: Span,
}

impl ErrorLabel {
    pub(crate) fn to_wire(&self) -> Wire {
        map_of(vec![
            ("text", Wire::from(self.text.as_str())),
            ("span", self.span.to_wire()),
        ])
    }

    pub(crate) fn from_wire(w: Wire) -> Result<ErrorLabel, CodecError> {
        let entries = expect_map(w, "ErrorLabel")?;
        if entries.len() != 2 {
            return Err(CodecError::invalid(format!(
                "expected ErrorLabel to contain 2 keys, got {}",
                entries.len()
            )));
        }
        let mut label = ErrorLabel::default();
        for (k, v) in entries {
            let key = expect_str(k, "ErrorLabel key")?;
            match key.as_str() {
                "text" => label.text = expect_str(v, "ErrorLabel text")?,
                "span" => label.span = Span::from_wire(v)?,
                other => {
                    return Err(CodecError::invalid(format!(
                        "unsupported ErrorLabel field {other:?}"
                    )))
                }
            }
        }
        Ok(label)
    }
}

/// The structured error exchanged with the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabeledError {
    /// The main message for the error.
    pub msg: String,
    /// Machine- and search-friendly error code, e.g. `nu::shell::io_error`.
    pub code: Option<String>,
    /// A link to documentation about the error.
    pub url: Option<String>,
    /// Additional help, usually a hint about what the user might try.
    pub help: Option<String>,
    /// Labeled spans showing the user where the problem is.
    pub labels: Vec<ErrorLabel>,
    /// Errors that are related to or caused this error.
    pub inner: Vec<LabeledError>,
}

impl LabeledError {
    pub fn new(msg: impl Into<String>) -> Self {
        LabeledError {
            msg: msg.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_label(mut self, text: impl Into<String>, span: Span) -> Self {
        self.labels.push(ErrorLabel {
            text: text.into(),
            span,
        });
        self
    }

    pub fn with_inner(mut self, inner: LabeledError) -> Self {
        self.inner.push(inner);
        self
    }

    /// Flatten a host error chain into the wire shape.
    ///
    /// The message is the outermost error's full rendering. The outermost
    /// [`LabeledError`] found in the `source()` chain contributes
    /// `code`/`url`/`help`/`labels`; every deeper `LabeledError` becomes an
    /// `inner` entry.
    pub fn from_error(err: &(dyn StdError + 'static)) -> LabeledError {
        let mut flat: Option<LabeledError> = None;

        let mut cursor: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(ce) = cursor {
            if let Some(le) = ce.downcast_ref::<LabeledError>() {
                match &mut flat {
                    None => {
                        flat = Some(LabeledError {
                            msg: err.to_string(),
                            code: le.code.clone(),
                            url: le.url.clone(),
                            help: le.help.clone(),
                            labels: le.labels.clone(),
                            inner: le.inner.clone(),
                        });
                    }
                    Some(outer) => outer.inner.push(le.clone()),
                }
            }
            cursor = ce.source();
        }

        flat.unwrap_or_else(|| LabeledError::new(err.to_string()))
    }

    /// Flatten several independent failures into one error whose message is
    /// the canonical "there are multiple errors" with each branch as an
    /// `inner` entry.
    pub fn joined(errors: impl IntoIterator<Item = LabeledError>) -> LabeledError {
        LabeledError {
            msg: "there are multiple errors".into(),
            inner: errors.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn to_wire(&self) -> Wire {
        let mut entries = vec![("msg", Wire::from(self.msg.as_str()))];
        if let Some(code) = &self.code {
            entries.push(("code", Wire::from(code.as_str())));
        }
        if let Some(help) = &self.help {
            entries.push(("help", Wire::from(help.as_str())));
        }
        if let Some(url) = &self.url {
            entries.push(("url", Wire::from(url.as_str())));
        }
        if !self.labels.is_empty() {
            entries.push((
                "labels",
                Wire::Array(self.labels.iter().map(ErrorLabel::to_wire).collect()),
            ));
        }
        if !self.inner.is_empty() {
            entries.push((
                "inner",
                Wire::Array(self.inner.iter().map(LabeledError::to_wire).collect()),
            ));
        }
        map_of(entries)
    }

    pub(crate) fn from_wire(w: Wire) -> Result<LabeledError, CodecError> {
        let entries = expect_map(w, "LabeledError")?;
        let mut le = LabeledError::default();
        for (k, v) in entries {
            let key = expect_str(k, "LabeledError key")?;
            match key.as_str() {
                "msg" => le.msg = expect_str(v, "LabeledError msg")?,
                "code" => le.code = opt_str(v, "LabeledError code")?,
                "help" => le.help = opt_str(v, "LabeledError help")?,
                "url" => le.url = opt_str(v, "LabeledError url")?,
                "labels" => {
                    if matches!(v, Wire::Nil) {
                        continue;
                    }
                    let items = expect_array(v, "LabeledError labels")?;
                    le.labels = items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| {
                            ErrorLabel::from_wire(item)
                                .map_err(|e| e.context(format!("decode label [{i}]")))
                        })
                        .collect::<Result<_, _>>()?;
                }
                "inner" => {
                    if matches!(v, Wire::Nil) {
                        continue;
                    }
                    let items = expect_array(v, "LabeledError inner")?;
                    le.inner = items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| {
                            LabeledError::from_wire(item)
                                .map_err(|e| e.context(format!("decode inner error [{i}]")))
                        })
                        .collect::<Result<_, _>>()?;
                }
                // tolerate unknown keys from newer engines
                _ => {}
            }
        }
        Ok(le)
    }
}

impl fmt::Display for LabeledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.msg.is_empty() {
            return f.write_str(&self.msg);
        }
        if let Some(code) = &self.code {
            return f.write_str(code);
        }
        if let Some(help) = &self.help {
            return f.write_str(help);
        }
        Ok(())
    }
}

impl StdError for LabeledError {}

impl From<String> for LabeledError {
    fn from(msg: String) -> Self {
        LabeledError::new(msg)
    }
}

impl From<&str> for LabeledError {
    fn from(msg: &str) -> Self {
        LabeledError::new(msg)
    }
}

impl From<std::io::Error> for LabeledError {
    fn from(err: std::io::Error) -> Self {
        LabeledError::new(err.to_string()).with_code("nu::plugin::io_error")
    }
}

impl From<CodecError> for LabeledError {
    fn from(err: CodecError) -> Self {
        LabeledError::new(err.to_string()).with_code("nu::plugin::decode_error")
    }
}

fn opt_str(w: Wire, what: &str) -> Result<Option<String>, CodecError> {
    match w {
        Wire::Nil => Ok(None),
        other => expect_str(other, what).map(Some),
    }
}
