//! Structured, accumulating compiler diagnostics.
//!
//! Every stage of the pipeline that can fail on otherwise-valid input
//! reports failures as `Diagnostic` values rather than `Err` returns or
//! panics, so a single compilation can surface more than one problem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte range into the source the diagnostic is about. The surface
/// parser owns line/column mapping; the core only ever carries the raw
/// offsets it was handed on the AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    /// A span with no useful source location, for diagnostics raised deep
    /// in the pipeline (e.g. inside an optimizer pass) about synthesized
    /// code that has no direct source counterpart.
    pub fn synthetic() -> Self {
        Span { start: 0, end: 0 }
    }
}

/// A suggested fix attached to a diagnostic. Purely advisory: nothing in
/// the pipeline applies a suggestion automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub message: String,
    pub replacement: Option<String>,
}

/// Severity independent of kind, since some kinds (e.g. non-exhaustive
/// match) are warnings in one context and would be errors in a stricter
/// dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    UndefinedSymbol { name: String },
    TypeMismatch { expected: String, found: String },
    NoMatchingOverload { name: String, arg_types: Vec<String> },
    InvalidCast { from: String, to: String },
    NonExhaustivePattern { missing: Vec<String> },
    ErrorTypeIncompatible { source: String, target: String },
    SmcIneligible { function: String, reason: String },
    UnsupportedOperation { description: String },
    InternalCompilerError { description: String },
}

impl DiagnosticKind {
    /// Default severity for this kind, used when a diagnostic is
    /// constructed via the `*_at` convenience methods rather than built up
    /// field by field.
    pub fn default_severity(&self) -> Severity {
        match self {
            DiagnosticKind::NonExhaustivePattern { .. } => Severity::Warning,
            DiagnosticKind::SmcIneligible { .. } => Severity::Note,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::UndefinedSymbol { name } => {
                write!(f, "undefined symbol `{name}`")
            }
            DiagnosticKind::TypeMismatch { expected, found } => {
                write!(f, "expected type `{expected}`, found `{found}`")
            }
            DiagnosticKind::NoMatchingOverload { name, arg_types } => {
                write!(
                    f,
                    "no overload of `{name}` matches argument types ({})",
                    arg_types.join(", ")
                )
            }
            DiagnosticKind::InvalidCast { from, to } => {
                write!(f, "cannot cast `{from}` to `{to}`")
            }
            DiagnosticKind::NonExhaustivePattern { missing } => {
                write!(f, "non-exhaustive match, missing: {}", missing.join(", "))
            }
            DiagnosticKind::ErrorTypeIncompatible { source, target } => {
                write!(
                    f,
                    "error type `{source}` is not convertible to `{target}`"
                )
            }
            DiagnosticKind::SmcIneligible { function, reason } => {
                write!(f, "function `{function}` cannot use TRUE SMC: {reason}")
            }
            DiagnosticKind::UnsupportedOperation { description } => {
                write!(f, "unsupported operation: {description}")
            }
            DiagnosticKind::InternalCompilerError { description } => {
                write!(f, "internal compiler error: {description}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub span: Span,
    pub suggestion: Option<Suggestion>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span) -> Self {
        let severity = kind.default_severity();
        Diagnostic {
            kind,
            severity,
            span,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(f, "{label}: {}", self.kind)
    }
}

/// Accumulates diagnostics across a compilation stage. Stages never stop
/// at the first problem; they collect into a `Diagnostics` and the driver
/// decides, after the fact, whether any fatal diagnostic means the
/// pipeline cannot continue to the next stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_fatal(&self) -> bool {
        self.items.iter().any(Diagnostic::is_fatal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_detection_ignores_warnings_and_notes() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(
            DiagnosticKind::NonExhaustivePattern {
                missing: vec!["None".to_string()],
            },
            Span::synthetic(),
        ));
        assert!(!diags.has_fatal());

        diags.push(Diagnostic::new(
            DiagnosticKind::UndefinedSymbol {
                name: "foo".to_string(),
            },
            Span::synthetic(),
        ));
        assert!(diags.has_fatal());
    }

    #[test]
    fn smc_ineligible_defaults_to_note() {
        let diag = Diagnostic::new(
            DiagnosticKind::SmcIneligible {
                function: "fib".to_string(),
                reason: "recursive".to_string(),
            },
            Span::synthetic(),
        );
        assert_eq!(diag.severity, Severity::Note);
        assert!(!diag.is_fatal());
    }

    #[test]
    fn display_formats_are_readable() {
        let diag = Diagnostic::new(
            DiagnosticKind::TypeMismatch {
                expected: "u8".to_string(),
                found: "u16".to_string(),
            },
            Span::new(4, 7),
        );
        assert_eq!(diag.to_string(), "error: expected type `u8`, found `u16`");
    }
}
