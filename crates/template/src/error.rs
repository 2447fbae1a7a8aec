use thiserror::Error;

/// Errors raised while parsing or rendering a template.
///
/// Parse failures carry the line the offending construct started on so the
/// message can point a prompt author at the right spot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// A `{{` marker without a matching `}}`.
    #[error("unterminated expression opened on line {line}")]
    UnterminatedExpression { line: u32 },

    /// A `{%` marker without a matching `%}`.
    #[error("unterminated tag opened on line {line}")]
    UnterminatedTag { line: u32 },

    /// An `if` or `for` block missing its closing tag.
    #[error("unclosed '{kind}' block opened on line {line}")]
    UnclosedBlock { kind: &'static str, line: u32 },

    /// A closing or continuation tag with no matching opener.
    #[error("unexpected '{tag}' on line {line}")]
    UnexpectedTag { tag: String, line: u32 },

    /// A filter name outside the supported set.
    #[error("unknown filter '{name}' on line {line}")]
    UnknownFilter { name: String, line: u32 },

    /// Malformed expression syntax.
    #[error("parse error on line {line}: {message}")]
    Parse { line: u32, message: String },

    /// A filter applied to a value it cannot handle.
    #[error("filter '{filter}' cannot be applied: {message}")]
    Filter { filter: &'static str, message: String },
}
