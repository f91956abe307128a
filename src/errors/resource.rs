//! Per-resource validation failure.

use std::fmt;

/// Validation failure for a single xDS resource.
///
/// Carries the naked detail string the ADS layer reports when it NACKs the
/// update. Each nesting level of the parser prepends the enclosing entity
/// (virtual host, route, cluster weight, filter instance, plugin) as the
/// error travels upward, so the final message reads outermost-first.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ResourceInvalid {
    message: String,
}

impl ResourceInvalid {
    /// Create a rejection carrying the given detail message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// The detail message, without any crate-level framing.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with the enclosing entity.
    #[must_use]
    pub fn in_context(self, context: impl fmt::Display) -> Self {
        Self { message: format!("{}: {}", context, self.message) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_outermost_first() {
        let err = ResourceInvalid::new("Unknown path match type")
            .in_context("Route [r0]")
            .in_context("Failed to parse virtual host [vh]");
        assert_eq!(
            err.message(),
            "Failed to parse virtual host [vh]: Route [r0]: Unknown path match type"
        );
    }

    #[test]
    fn display_is_the_naked_detail() {
        let err = ResourceInvalid::new("Sum of cluster weights should be above 0");
        assert_eq!(err.to_string(), err.message());
    }
}
