//! Command and stdin templates.
//!
//! Each template is a plain string with `{{.field}}` placeholders that
//! pull values out of a record: `echo {{.value}}`, `s3 rm {{.uri}}`.
//! Templates are parsed once up front; rendering a record against a
//! field it does not carry is a per-record failure.

use thiserror::Error;
use volley_types::{Record, RenderedCommand};

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in {0:?}")]
    Unclosed(String),
    #[error("placeholder {placeholder:?} in {template:?} must name a field like {{{{.name}}}}")]
    BadPlaceholder {
        template: String,
        placeholder: String,
    },
    #[error("record has no field {0:?}")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// One pre-parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> TemplateResult<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                return Err(TemplateError::Unclosed(raw.to_string()));
            };
            let placeholder = after[..close].trim();
            let Some(field) = placeholder.strip_prefix('.') else {
                return Err(TemplateError::BadPlaceholder {
                    template: raw.to_string(),
                    placeholder: placeholder.to_string(),
                });
            };
            if field.is_empty() {
                return Err(TemplateError::BadPlaceholder {
                    template: raw.to_string(),
                    placeholder: placeholder.to_string(),
                });
            }
            segments.push(Segment::Field(field.to_string()));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, record: &Record) -> TemplateResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match record.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::MissingField(name.clone())),
                },
            }
        }
        Ok(out)
    }
}

/// A full command line of templates, one per argument.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    args: Vec<Template>,
}

impl CommandTemplate {
    pub fn parse(command_line: &[String]) -> TemplateResult<Self> {
        let args = command_line
            .iter()
            .map(|arg| Template::parse(arg))
            .collect::<TemplateResult<Vec<_>>>()?;
        Ok(Self { args })
    }

    /// Materialize a record into an argv, with the optional stdin
    /// template rendered alongside.
    pub fn render(
        &self,
        stdin: Option<&Template>,
        record: &Record,
    ) -> TemplateResult<RenderedCommand> {
        let argv = self
            .args
            .iter()
            .map(|arg| arg.render(record))
            .collect::<TemplateResult<Vec<_>>>()?;
        let stdin = stdin.map(|t| t.render(record)).transpose()?;
        Ok(RenderedCommand { argv, stdin })
    }
}
