//! Stable diagnostic codes and the diagnostics sink.
//!
//! Codes are grouped by category:
//! - G1xxx: structural mismatches (recoverable, member skipped)
//! - G2xxx: unsupported shapes
//! - G3xxx: internal inconsistencies
//! - G4xxx: upstream reference and input failures
//! - W5xxx: warnings

use std::fmt;

use crate::error::{ErrorKind, GlueError};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ErrorCode {
    // Structural mismatch (G1xxx)
    /// No generated wrapper matches a declaration
    G1001,

    // Unsupported shapes (G2xxx)
    /// Closure nested inside a closure
    G2001,
    /// Async closure
    G2002,
    /// Protocol composition in an argument position
    G2003,
    /// Throwing closure without a return value
    G2004,
    /// Async member
    G2005,
    /// Final class cannot be subclassed
    G2006,

    // Internal inconsistencies (G3xxx)
    /// Reference code matched more than one wrapper
    G3001,
    /// Wrapper return parameter has an unexpected shape
    G3002,
    /// Wrapper closure arity out of range
    G3003,
    /// Entity kind does not fit the requested operation
    G3004,
    /// Unrelated protocols declare the same member
    G3005,

    // Upstream failures (G4xxx)
    /// Referenced type, class, or protocol is not in the fact base
    G4001,
    /// Malformed input
    G4002,
    /// Invalid configuration
    G4003,

    // Warnings (W5xxx)
    /// Duplicate protocol member kept from its first declaration
    W5001,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::G1001 => "G1001",
            ErrorCode::G2001 => "G2001",
            ErrorCode::G2002 => "G2002",
            ErrorCode::G2003 => "G2003",
            ErrorCode::G2004 => "G2004",
            ErrorCode::G2005 => "G2005",
            ErrorCode::G2006 => "G2006",
            ErrorCode::G3001 => "G3001",
            ErrorCode::G3002 => "G3002",
            ErrorCode::G3003 => "G3003",
            ErrorCode::G3004 => "G3004",
            ErrorCode::G3005 => "G3005",
            ErrorCode::G4001 => "G4001",
            ErrorCode::G4002 => "G4002",
            ErrorCode::G4003 => "G4003",
            ErrorCode::W5001 => "W5001",
        }
    }

    /// The numeric part of the code.
    pub fn number(&self) -> u16 {
        self.as_str()[1..].parse().unwrap_or(0)
    }

    pub fn is_warning(&self) -> bool {
        self.as_str().starts_with('W')
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Aborts the unit being generated.
    Fatal,
    /// Recorded; generation continues.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)
    }
}

/// Receives fatal failures and recoverable warnings.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);

    /// Report an error: structural mismatches as warnings, everything else
    /// as fatal.
    fn record(&mut self, error: &GlueError) {
        let severity = if error.kind() == ErrorKind::StructuralMismatch {
            Severity::Warning
        } else {
            Severity::Fatal
        };
        self.report(Diagnostic {
            severity,
            code: error.code(),
            message: error.to_string(),
        });
    }

    fn warn(&mut self, code: ErrorCode, message: String) {
        self.report(Diagnostic {
            severity: Severity::Warning,
            code,
            message,
        });
    }
}

/// In-memory diagnostics, in report order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Fatal)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.entries.iter().map(|d| d.code).collect()
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }
}
