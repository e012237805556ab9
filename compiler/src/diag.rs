// diag.rs — Diagnostics for compilation and hot-swap
//
// One `Diagnostic` type serves the front end and the swap boundary. Lowering
// and allocation attach a source span; migration works on compiled layouts
// and leaves the span empty.
//
// Preconditions: none.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Codes ────────────────────────────────────────────────────────────────

/// Stable identifier printed in brackets after the level, e.g. `W0300`.
/// A code keeps its meaning forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// `E00xx` parse, `E01xx`/`W01xx` lowering, `E02xx` state allocation,
/// `W03xx`/`E03xx` state migration.
pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // parse error

    pub const E0100: DiagCode = DiagCode("E0100"); // duplicate block
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate instance
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown op
    pub const E0103: DiagCode = DiagCode("E0103"); // unknown block reference
    pub const E0104: DiagCode = DiagCode("E0104"); // forward reference
    pub const E0105: DiagCode = DiagCode("E0105"); // unknown instance
    pub const E0106: DiagCode = DiagCode("E0106"); // arity
    pub const E0107: DiagCode = DiagCode("E0107"); // cardinality mismatch
    pub const E0108: DiagCode = DiagCode("E0108"); // key count mismatch
    pub const E0109: DiagCode = DiagCode("E0109"); // non-literal initial value
    pub const W0110: DiagCode = DiagCode("W0110"); // duplicate lane key
    pub const E0111: DiagCode = DiagCode("E0111"); // instance too large

    pub const E0200: DiagCode = DiagCode("E0200"); // duplicate state id
    pub const E0201: DiagCode = DiagCode("E0201"); // empty initial (stride 0)
    pub const E0202: DiagCode = DiagCode("E0202"); // state buffer too large

    pub const W0300: DiagCode = DiagCode("W0300"); // stride mismatch
    pub const W0301: DiagCode = DiagCode("W0301"); // kind mismatch
    pub const W0302: DiagCode = DiagCode("W0302"); // instance mismatch
    pub const W0303: DiagCode = DiagCode("W0303"); // lane key collision
    pub const E0304: DiagCode = DiagCode("E0304"); // migration buffer size mismatch
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

impl DiagLevel {
    fn as_str(self) -> &'static str {
        match self {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagLevel,
    pub code: Option<DiagCode>,
    pub message: String,
    /// None for diagnostics raised against compiled state.
    pub span: Option<Span>,
    /// Secondary locations, e.g. where a duplicate was first declared.
    pub related: Vec<(Span, String)>,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            span: Some(span),
            ..Self::unlocated(level, message)
        }
    }

    pub fn unlocated(level: DiagLevel, message: impl Into<String>) -> Self {
        Diagnostic {
            level,
            code: None,
            message: message.into(),
            span: None,
            related: Vec::new(),
            hint: None,
        }
    }

    pub fn with_code(self, code: DiagCode) -> Self {
        Self {
            code: Some(code),
            ..self
        }
    }

    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related.push((span, label.into()));
        self
    }

    /// Suggested fix, rendered on its own line.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..self
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagLevel::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level.as_str())?;
        if let Some(code) = self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": {}", self.message)?;
        for (span, label) in &self.related {
            write!(f, "\n  note: {label} at {}..{}", span.start, span.end)?;
        }
        match &self.hint {
            Some(hint) => write!(f, "\n  hint: {hint}"),
            None => Ok(()),
        }
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
