//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! Results are reported, never raised.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::placeholders::PlaceholderStats;
use crate::record::{parse_rating, record_fields, TemplateType};
use crate::templates::TemplateKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    pub fn error(rule: &str, message: impl Into<String>) -> Self {
        Self::new(rule, ViolationSeverity::Error, message)
    }

    pub fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self::new(rule, ViolationSeverity::Warning, message)
    }

    fn new(rule: &str, severity: ViolationSeverity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            message: message.into(),
            field: None,
            remediation: vec![],
        }
    }

    pub fn on_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn remedy(mut self, remediation: &str) -> Self {
        self.remediation.push(remediation.to_string());
        self
    }
}

/// Validation rule trait - produces violations for one subject type
pub trait ValidationRule<T> {
    fn name(&self) -> &'static str;
    fn validate(&self, subject: &T) -> Vec<ValidationViolation>;
}

/// Runs a list of rules and collects every violation.
pub struct Validator<T> {
    rules: Vec<Box<dyn ValidationRule<T> + Send + Sync>>,
}

impl<T> Validator<T> {
    pub fn with_rules(rules: Vec<Box<dyn ValidationRule<T> + Send + Sync>>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, subject: &T) -> Vec<ValidationViolation> {
        self.rules.iter().flat_map(|rule| rule.validate(subject)).collect()
    }
}

pub fn has_errors(violations: &[ValidationViolation]) -> bool {
    violations.iter().any(|v| v.severity == ViolationSeverity::Error)
}

// --- Templates ---

/// What template rules look at: a successfully loaded template.
pub struct TemplateSubject<'a> {
    pub name: &'a str,
    pub source: &'a str,
    pub stats: &'a PlaceholderStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateValidation {
    pub template_name: String,
    pub valid: bool,
    pub template_type: TemplateKind,
    pub violations: Vec<ValidationViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_stats: Option<PlaceholderStats>,
}

impl TemplateValidation {
    /// The template could not be loaded or parsed.
    pub fn failed(template_name: &str, violation: ValidationViolation) -> Self {
        Self {
            template_name: template_name.to_string(),
            valid: false,
            template_type: TemplateKind::Unknown,
            violations: vec![violation],
            placeholder_stats: None,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations.iter().filter(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations.iter().filter(|v| v.severity == ViolationSeverity::Warning)
    }
}

pub struct EmptyTemplateRule;

impl<'a> ValidationRule<TemplateSubject<'a>> for EmptyTemplateRule {
    fn name(&self) -> &'static str { "empty_template" }

    fn validate(&self, subject: &TemplateSubject<'a>) -> Vec<ValidationViolation> {
        if subject.source.trim().is_empty() {
            vec![ValidationViolation::warning(self.name(), "Template is empty")]
        } else {
            vec![]
        }
    }
}

pub struct PlaceholderPresenceRule;

impl<'a> ValidationRule<TemplateSubject<'a>> for PlaceholderPresenceRule {
    fn name(&self) -> &'static str { "placeholders" }

    fn validate(&self, subject: &TemplateSubject<'a>) -> Vec<ValidationViolation> {
        if subject.stats.total() == 0 {
            vec![ValidationViolation::warning(self.name(), "No placeholders found in template")
                .remedy("Add {{variable}}, ${variable} or date/product code placeholders")]
        } else {
            vec![]
        }
    }
}

pub fn template_validator<'a>() -> Validator<TemplateSubject<'a>> {
    Validator::with_rules(vec![Box::new(EmptyTemplateRule), Box::new(PlaceholderPresenceRule)])
}

// --- Input records ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputValidation {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
}

impl InputValidation {
    pub fn from_violations(violations: Vec<ValidationViolation>) -> Self {
        Self { valid: !has_errors(&violations), violations }
    }

    pub fn error_summary(&self) -> String {
        let messages: Vec<_> = self
            .violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| v.message.as_str())
            .collect();
        if messages.is_empty() {
            "No errors".to_string()
        } else {
            messages.join("; ")
        }
    }
}

pub struct TemplateTypeRule;

impl ValidationRule<Map<String, Value>> for TemplateTypeRule {
    fn name(&self) -> &'static str { "template_type" }

    fn validate(&self, data: &Map<String, Value>) -> Vec<ValidationViolation> {
        match data.get("template_type") {
            Some(Value::String(t)) if t.parse::<TemplateType>().is_ok() => vec![],
            Some(other) => vec![ValidationViolation::warning(
                self.name(),
                format!("Unknown template type: {}", crate::context::stringify(other)),
            )
            .on_field("template_type")],
            None => vec![],
        }
    }
}

/// Checks the record `InputDocument::record` will read: `template_data`
/// when present, else the top level.
pub struct TemplateDataRule;

impl ValidationRule<Map<String, Value>> for TemplateDataRule {
    fn name(&self) -> &'static str { "template_data" }

    fn validate(&self, data: &Map<String, Value>) -> Vec<ValidationViolation> {
        let prefix = match data.get("template_data") {
            Some(Value::Object(_)) => "template_data.",
            Some(_) => {
                return vec![ValidationViolation::error(self.name(), "Template data must be a mapping")
                    .on_field("template_data")];
            }
            None => "",
        };
        let fields = record_fields(data);

        let mut violations = vec![];
        if let Some(rating) = fields.get("rating") {
            if parse_rating(rating).is_none() {
                violations.push(
                    ValidationViolation::error(self.name(), "Rating must be a non-negative number")
                        .on_field(&format!("{}rating", prefix)),
                );
            }
        }
        for (key, null_ok) in [("dates", true), ("additional_data", false)] {
            let Some(value) = fields.get(key) else {
                continue;
            };
            if !(value.is_object() || (null_ok && value.is_null())) {
                violations.push(
                    ValidationViolation::error(self.name(), format!("'{}' must be a mapping", key))
                        .on_field(&format!("{}{}", prefix, key)),
                );
            }
        }
        violations
    }
}

pub struct ContentFieldRule;

impl ValidationRule<Map<String, Value>> for ContentFieldRule {
    fn name(&self) -> &'static str { "content" }

    fn validate(&self, data: &Map<String, Value>) -> Vec<ValidationViolation> {
        if data.contains_key("content") || data.contains_key("text") {
            vec![]
        } else {
            vec![ValidationViolation::warning(self.name(), "No content or text field found")]
        }
    }
}

pub fn input_validator() -> Validator<Map<String, Value>> {
    Validator::with_rules(vec![
        Box::new(TemplateTypeRule),
        Box::new(TemplateDataRule),
        Box::new(ContentFieldRule),
    ])
}
