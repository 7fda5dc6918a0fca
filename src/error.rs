//! Crate-wide error type.
//
//  Every failure carries the logical byte offset where it was detected so
//  callers can point at the exact spot in the stream; line-oriented drivers
//  wrap with `AtLine` to add the 1-based line number.

/// Which budget ceiling was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Matches,
    Bytes,
    Duration,
}

/// Which fan-out limit was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutKind {
    Depth,
    ArraySize,
    ObjectKeys,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SiftError {
    // Tokenizer errors
    InvalidLiteral {
        found: String,
        offset: u64,
    },
    InvalidNumber {
        found: String,
        offset: u64,
    },

    // Query errors (detected before any byte is processed)
    InvalidQuery {
        message: String,
        line: u32,
        column: u32,
    },

    // Engine errors
    StructuralMismatch {
        expected: &'static str,
        offset: u64,
    },

    // Controlled terminations
    Aborted {
        offset: u64,
    },
    BudgetExhausted {
        kind: BudgetKind,
        offset: u64,
    },
    FanoutExceeded {
        kind: FanoutKind,
        limit: u64,
        offset: u64,
    },

    // Line-oriented drivers
    LineTooLong {
        line: u64,
        limit: usize,
    },
    AtLine {
        line: u64,
        inner: Box<SiftError>,
    },

    Io {
        message: String,
    },
}

impl SiftError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SiftError::InvalidLiteral { .. } => "ERR_INVALID_LITERAL",
            SiftError::InvalidNumber { .. } => "ERR_INVALID_NUMBER",
            SiftError::InvalidQuery { .. } => "ERR_INVALID_QUERY",
            SiftError::StructuralMismatch { .. } => "ERR_STRUCTURAL_MISMATCH",
            SiftError::Aborted { .. } => "ERR_ABORTED",
            SiftError::BudgetExhausted { kind, .. } => match kind {
                BudgetKind::Matches => "ERR_BUDGET_MATCHES",
                BudgetKind::Bytes => "ERR_BUDGET_BYTES",
                BudgetKind::Duration => "ERR_BUDGET_DURATION",
            },
            SiftError::FanoutExceeded { kind, .. } => match kind {
                FanoutKind::Depth => "ERR_FANOUT_DEPTH",
                FanoutKind::ArraySize => "ERR_FANOUT_ARRAY_SIZE",
                FanoutKind::ObjectKeys => "ERR_FANOUT_OBJECT_KEYS",
            },
            SiftError::LineTooLong { .. } => "ERR_LINE_TOO_LONG",
            SiftError::AtLine { inner, .. } => inner.code(),
            SiftError::Io { .. } => "ERR_IO",
        }
    }

    /// Logical byte offset where detection occurred, when one applies.
    pub fn offset(&self) -> Option<u64> {
        match self {
            SiftError::InvalidLiteral { offset, .. }
            | SiftError::InvalidNumber { offset, .. }
            | SiftError::StructuralMismatch { offset, .. }
            | SiftError::Aborted { offset }
            | SiftError::BudgetExhausted { offset, .. }
            | SiftError::FanoutExceeded { offset, .. } => Some(*offset),
            SiftError::AtLine { inner, .. } => inner.offset(),
            _ => None,
        }
    }

    /// True for the controlled terminations: everything emitted before the
    /// failure remains valid and observable.
    pub fn is_controlled(&self) -> bool {
        matches!(
            self,
            SiftError::Aborted { .. }
                | SiftError::BudgetExhausted { .. }
                | SiftError::FanoutExceeded { .. }
                | SiftError::LineTooLong { .. }
        )
    }

    /// Attach a 1-based line number (line-oriented drivers).
    pub fn at_line(self, line: u64) -> SiftError {
        SiftError::AtLine {
            line,
            inner: Box::new(self),
        }
    }
}

impl std::fmt::Display for SiftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiftError::InvalidLiteral { found, offset } => {
                write!(f, "invalid literal {:?} at byte {}", found, offset)
            }
            SiftError::InvalidNumber { found, offset } => {
                write!(f, "invalid number {:?} at byte {}", found, offset)
            }
            SiftError::InvalidQuery {
                message,
                line,
                column,
            } => {
                write!(f, "invalid query at {}:{}: {}", line, column, message)
            }
            SiftError::StructuralMismatch { expected, offset } => {
                write!(f, "expected {} at byte {}", expected, offset)
            }
            SiftError::Aborted { offset } => write!(f, "aborted at byte {}", offset),
            SiftError::BudgetExhausted { kind, offset } => {
                let what = match kind {
                    BudgetKind::Matches => "match",
                    BudgetKind::Bytes => "byte",
                    BudgetKind::Duration => "duration",
                };
                write!(f, "{} budget exhausted at byte {}", what, offset)
            }
            SiftError::FanoutExceeded {
                kind,
                limit,
                offset,
            } => {
                let what = match kind {
                    FanoutKind::Depth => "nesting depth",
                    FanoutKind::ArraySize => "array size",
                    FanoutKind::ObjectKeys => "object key count",
                };
                write!(f, "{} exceeded limit {} at byte {}", what, limit, offset)
            }
            SiftError::LineTooLong { line, limit } => {
                write!(f, "line {} exceeds {} bytes", line, limit)
            }
            SiftError::AtLine { line, inner } => write!(f, "line {}: {}", line, inner),
            SiftError::Io { message } => write!(f, "io error: {}", message),
        }
    }
}

impl std::error::Error for SiftError {}

impl From<std::io::Error> for SiftError {
    fn from(e: std::io::Error) -> Self {
        SiftError::Io {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let e = SiftError::FanoutExceeded {
            kind: FanoutKind::Depth,
            limit: 100,
            offset: 7,
        };
        assert_eq!(e.code(), "ERR_FANOUT_DEPTH");
        assert_eq!(e.offset(), Some(7));
        assert!(e.is_controlled());
    }

    #[test]
    fn at_line_preserves_code_and_offset() {
        let e = SiftError::InvalidLiteral {
            found: "truX".into(),
            offset: 6,
        }
        .at_line(2);
        assert_eq!(e.code(), "ERR_INVALID_LITERAL");
        assert_eq!(e.offset(), Some(6));
        assert_eq!(e.to_string(), "line 2: invalid literal \"truX\" at byte 6");
    }
}
