//! Error Taxonomy
//!
//! Every public operation either returns a fully transformed result or one
//! of these errors. There is no partial output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtobusuError {
    #[error("{message}{}", suffix(.details))]
    Input {
        message: String,
        details: Option<String>,
    },

    #[error("{message}{}", suffix(.details))]
    Processing {
        message: String,
        details: Option<String>,
    },

    #[error("{message}{}", suffix(.details))]
    Template {
        message: String,
        details: Option<String>,
    },

    #[error("{message}{}", suffix(.details))]
    Output {
        message: String,
        details: Option<String>,
    },

    #[error("{message}{}", suffix(.details))]
    Configuration {
        message: String,
        details: Option<String>,
    },
}

fn suffix(details: &Option<String>) -> String {
    match details {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

impl AtobusuError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input { message: message.into(), details: None }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing { message: message.into(), details: None }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template { message: message.into(), details: None }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::Output { message: message.into(), details: None }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), details: None }
    }

    /// Attach the underlying cause.
    pub fn with_details(mut self, cause: impl ToString) -> Self {
        let cause = Some(cause.to_string());
        match &mut self {
            Self::Input { details, .. }
            | Self::Processing { details, .. }
            | Self::Template { details, .. }
            | Self::Output { details, .. }
            | Self::Configuration { details, .. } => *details = cause,
        }
        self
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Input { message, .. }
            | Self::Processing { message, .. }
            | Self::Template { message, .. }
            | Self::Output { message, .. }
            | Self::Configuration { message, .. } => message,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Input { details, .. }
            | Self::Processing { details, .. }
            | Self::Template { details, .. }
            | Self::Output { details, .. }
            | Self::Configuration { details, .. } => details.as_deref(),
        }
    }

    /// Short kind label used in CLI reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Processing { .. } => "processing",
            Self::Template { .. } => "template",
            Self::Output { .. } => "output",
            Self::Configuration { .. } => "configuration",
        }
    }
}

pub type Result<T> = std::result::Result<T, AtobusuError>;

/// First `max` characters of `text`, used to identify the input in error messages.
pub(crate) fn text_prefix(text: &str, max: usize) -> String {
    let mut prefix: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        prefix.push_str("...");
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_details() {
        let err = AtobusuError::template("Template not found: page.html");
        assert_eq!(err.to_string(), "Template not found: page.html");
        assert_eq!(err.kind(), "template");
    }

    #[test]
    fn test_display_with_details() {
        let err = AtobusuError::processing("Invalid regex pattern '('").with_details("unclosed group");
        assert_eq!(err.to_string(), "Invalid regex pattern '(': unclosed group");
        assert_eq!(err.details(), Some("unclosed group"));
    }

    #[test]
    fn test_text_prefix_truncates_on_char_boundary() {
        assert_eq!(text_prefix("商品コードです", 3), "商品コ...");
        assert_eq!(text_prefix("short", 10), "short");
    }
}
