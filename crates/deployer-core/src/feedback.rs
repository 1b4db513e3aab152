//! Accumulated validation results.
//!
//! Validation never stops at the first problem: every check appends to a
//! [`Feedback`] and the caller decides what an error means for the run.

use std::fmt;

use serde::Serialize;
use tracing::{error, warn};

/// Errors and warnings collected by a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Feedback {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Record a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Append everything from `other`, preserving order.
    pub fn extend(&mut self, other: Feedback) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Emit every entry through `tracing`.
    pub fn log(&self) {
        for message in &self.warnings {
            warn!("{message}");
        }
        for message in &self.errors {
            error!("{message}");
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        if let Some(first) = self.errors.first() {
            write!(f, ", first: {first}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let feedback = Feedback::new();
        assert!(feedback.is_empty());
        assert!(!feedback.has_errors());
    }

    #[test]
    fn warnings_are_not_errors() {
        let mut feedback = Feedback::new();
        feedback.warn("charm not found locally");
        assert!(!feedback.has_errors());
        assert!(!feedback.is_empty());
    }

    #[test]
    fn extend_keeps_order() {
        let mut a = Feedback::new();
        a.error("first");
        let mut b = Feedback::new();
        b.error("second");
        b.warn("note");
        a.extend(b);
        assert_eq!(a.errors(), ["first", "second"]);
        assert_eq!(a.warnings(), ["note"]);
    }

    #[test]
    fn display_mentions_first_error() {
        let mut feedback = Feedback::new();
        feedback.error("Invalid container type: asdf");
        feedback.error("other");
        assert_eq!(
            feedback.to_string(),
            "2 error(s), first: Invalid container type: asdf"
        );
    }
}
