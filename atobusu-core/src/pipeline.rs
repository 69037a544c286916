//! Document Pipeline - Single Entry Point
//!
//! Input record -> validation -> character conversion -> context -> render.
//! `generate` always validates the input through `prepare`. No bypass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::context::PlaceholderContext;
use crate::converter::{CharacterConverter, ConversionStats, Encoding};
use crate::error::{AtobusuError, Result};
use crate::hashing::output_digest;
use crate::record::{InputDocument, TemplateType};
use crate::renderer::{OutputFormat, TemplateRenderer};
use crate::templates::TemplateKind;
use crate::validation::{input_validator, InputValidation, ViolationSeverity};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Explicit template name; the default for the record's type otherwise.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
}

/// A validated, converted record ready to render.
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    pub template_type: TemplateType,
    pub content: String,
    pub context: PlaceholderContext,
    pub conversion_stats: ConversionStats,
    pub validation: InputValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub content: String,
    pub template_name: String,
    pub template_version: String,
    pub template_kind: TemplateKind,
    pub template_type: TemplateType,
    pub engine_version: String,
    pub output_hash: String,
    pub generated_at: DateTime<Utc>,
    pub conversion_stats: ConversionStats,
}

pub struct DocumentPipeline {
    converter: CharacterConverter,
    renderer: TemplateRenderer,
    encoding: Encoding,
}

impl DocumentPipeline {
    pub fn new(converter: CharacterConverter, renderer: TemplateRenderer) -> Self {
        Self { converter, renderer, encoding: Encoding::Utf8 }
    }

    /// Target encoding for character normalization.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn converter(&self) -> &CharacterConverter {
        &self.converter
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    pub fn validate_input(&self, input: &InputDocument) -> InputValidation {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        InputValidation::from_violations(input_validator().validate(&input.data))
    }

    /// Validate, convert and build the render context. Validation errors
    /// abort; warnings are logged.
    pub fn prepare(&self, input: &InputDocument) -> Result<PreparedRecord> {
        let validation = self.validate_input(input);
        if !validation.valid {
            return Err(AtobusuError::processing("Input validation failed")
                .with_details(validation.error_summary()));
        }
        for violation in validation.violations.iter().filter(|v| v.severity == ViolationSeverity::Warning) {
            warn!(rule = %violation.rule, "{}", violation.message);
        }

        let template_type = TemplateType::determine(&input.data, input.path.as_deref());
        let raw_content = input.content_text();
        let conversion_stats = self.converter.conversion_stats(&raw_content);
        let content = self.converter.apply_all_conversions(&raw_content, self.encoding)?;
        let record = input.record()?;

        // Later layers win: top-level fields, record, variables, then the
        // derived keys below.
        let mut context = PlaceholderContext::from(input.data.clone());
        for (key, value) in record.to_placeholder_context().into_map() {
            if value.as_str() != Some("") {
                context.insert(key, value);
            }
        }
        if let Some(Value::Object(variables)) = input.data.get("variables") {
            context.merge(variables);
        }
        let output_format = input
            .data
            .get("output_format")
            .and_then(Value::as_str)
            .unwrap_or("html")
            .to_string();
        context.insert("content", content.clone());
        context.insert("template_type", template_type.as_str());
        context.insert("output_format", output_format);
        context.insert(
            "metadata",
            json!({
                "source_file": input.path.as_ref().map(|p| p.display().to_string()),
                "source_type": input.source_type.as_str(),
                "encoding": input.encoding.as_str(),
            }),
        );

        info!(
            template_type = %template_type,
            content_chars = content.chars().count(),
            "Prepared input record"
        );
        Ok(PreparedRecord { template_type, content, context, conversion_stats, validation })
    }

    /// Prepare the record and render it. This ALWAYS validates first.
    pub fn generate(&self, input: &InputDocument, request: &GenerateRequest) -> Result<GeneratedDocument> {
        let prepared = self.prepare(input)?;
        let template_name = match &request.template {
            Some(name) => name.clone(),
            None => self.default_template(prepared.template_type)?,
        };

        let compiled = self.renderer.load(&template_name)?;
        let content = self
            .renderer
            .render_template(&template_name, &prepared.context, request.format)?;

        let template_kind = match request.format {
            OutputFormat::Html => TemplateKind::Html,
            OutputFormat::Php => TemplateKind::Php,
            OutputFormat::Mixed => TemplateKind::Mixed,
            OutputFormat::Auto => compiled.kind,
        };
        info!(template = %template_name, kind = ?template_kind, "Generated document");
        Ok(GeneratedDocument {
            output_hash: output_digest(&content),
            content,
            template_name,
            template_version: compiled.version.clone(),
            template_kind,
            template_type: prepared.template_type,
            engine_version: ENGINE_VERSION.to_string(),
            generated_at: Utc::now(),
            conversion_stats: prepared.conversion_stats,
        })
    }

    /// The type's own default when present, else the first default that is.
    pub fn default_template(&self, template_type: TemplateType) -> Result<String> {
        let preferred = template_type.default_template();
        if self.renderer.template_exists(preferred) {
            info!(template = preferred, "Using default template");
            return Ok(preferred.to_string());
        }
        TemplateType::ALL
            .iter()
            .map(TemplateType::default_template)
            .find(|name| self.renderer.template_exists(name))
            .map(|name| {
                info!(template = name, "Using fallback template");
                name.to_string()
            })
            .ok_or_else(|| {
                AtobusuError::template(format!("No default template available for type '{}'", template_type))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceType;
    use crate::templates::InMemoryTemplateSource;

    fn pipeline(templates: &[(&str, &str)]) -> DocumentPipeline {
        let source = templates
            .iter()
            .fold(InMemoryTemplateSource::new(), |s, (name, text)| s.with_template(name, text));
        DocumentPipeline::new(CharacterConverter::default(), TemplateRenderer::new(Box::new(source)))
    }

    fn input(json: &str) -> InputDocument {
        InputDocument::parse(json, SourceType::Json, Encoding::Utf8).unwrap()
    }

    #[test]
    fn test_prepare_converts_content_and_layers_context() {
        let p = pipeline(&[]);
        let doc = input(
            r#"{"content": "①\"良い\"", "title": "top", "product_name": "top-level",
                "template_data": {"product_name": "record"},
                "variables": {"title": "var"}}"#,
        );
        let prepared = p.prepare(&doc).unwrap();
        assert_eq!(prepared.content, "&#9312;\u{201C}良い\u{201C}");
        assert_eq!(prepared.conversion_stats.circled_numbers, 1);
        assert_eq!(prepared.conversion_stats.straight_quotes, 2);
        assert_eq!(prepared.context.get_text("product_name").as_deref(), Some("record"));
        assert_eq!(prepared.context.get_text("title").as_deref(), Some("var"));
        assert_eq!(prepared.context.get_text("template_type").as_deref(), Some("page"));
        assert_eq!(prepared.context.get_text("output_format").as_deref(), Some("html"));
        assert_eq!(
            prepared.context.lookup_path("metadata.source_type"),
            Some(&Value::String("json".into()))
        );
    }

    #[test]
    fn test_prepare_rejects_invalid_input() {
        let p = pipeline(&[]);
        let err = p.prepare(&input(r#"{"template_data": {"rating": "five"}}"#)).unwrap_err();
        assert!(matches!(err, AtobusuError::Processing { .. }));
        assert_eq!(err.details(), Some("Rating must be a non-negative number"));
    }

    #[test]
    fn test_generate_accepts_decimal_rating_at_top_level() {
        let p = pipeline(&[("base_page.html", "商品コード:{{ rating }}")]);
        let doc = p
            .generate(&input(r#"{"content": "x", "product_code": "A1", "rating": 4.5}"#), &GenerateRequest::default())
            .unwrap();
        assert_eq!(doc.content, "A1:4.5");
    }

    #[test]
    fn test_generate_reports_bad_top_level_rating_as_violation() {
        let p = pipeline(&[("base_page.html", "{{ rating }}")]);
        let err = p
            .generate(&input(r#"{"content": "x", "rating": [4]}"#), &GenerateRequest::default())
            .unwrap_err();
        assert_eq!(err.message(), "Input validation failed");
        assert_eq!(err.details(), Some("Rating must be a non-negative number"));
    }

    #[test]
    fn test_generate_uses_default_template_for_type() {
        let p = pipeline(&[
            ("base_page.html", "<p>{{ content }}</p>"),
            ("base_index.html", "<ul>{% for i in items %}<li>{{ i }}</li>{% endfor %}</ul>"),
        ]);
        let doc = p.generate(&input(r#"{"content": "x", "items": [1, 2]}"#), &GenerateRequest::default()).unwrap();
        assert_eq!(doc.template_name, "base_index.html");
        assert_eq!(doc.template_type, TemplateType::Index);
        assert_eq!(doc.content, "<ul><li>1</li><li>2</li></ul>");
        assert_eq!(doc.output_hash, output_digest(&doc.content));
    }

    #[test]
    fn test_generate_falls_back_to_any_default() {
        let p = pipeline(&[("base_page.html", "{{ content }}")]);
        let doc = p
            .generate(&input(r#"{"content": "x", "template_type": "content"}"#), &GenerateRequest::default())
            .unwrap();
        assert_eq!(doc.template_name, "base_page.html");
        assert_eq!(doc.template_type, TemplateType::Content);
    }

    #[test]
    fn test_generate_without_templates_fails() {
        let p = pipeline(&[]);
        let err = p.generate(&input(r#"{"content": "x"}"#), &GenerateRequest::default()).unwrap_err();
        assert!(matches!(err, AtobusuError::Template { .. }));
    }

    #[test]
    fn test_output_hash_is_stable_across_runs() {
        let p = pipeline(&[("review.php", "<?php $c = 1; ?>{{ content }}")]);
        let request = GenerateRequest { template: Some("review.php".into()), format: OutputFormat::Auto };
        let doc = input(r#"{"content": "x"}"#);
        let first = p.generate(&doc, &request).unwrap();
        let second = p.generate(&doc, &request).unwrap();
        assert_eq!(first.output_hash, second.output_hash);
        assert_eq!(first.template_version, second.template_version);
        assert_eq!(first.template_kind, TemplateKind::Php);
        assert_eq!(first.content, "<?php $c = 1; ?>x");
    }
}
