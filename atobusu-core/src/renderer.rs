//! Template Renderer
//!
//! Load, protect, substitute, expand, restore. The compiled-template cache
//! only short-circuits the engine's syntax check; placeholder substitution
//! always runs on freshly read source text.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, Utc};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::context::PlaceholderContext;
use crate::error::{AtobusuError, Result};
use crate::fragments::{contains_foreign_syntax, protect};
use crate::placeholders::PlaceholderProcessor;
use crate::templates::{FileSystemTemplateSource, SourceText, TemplateKind, TemplateSource};
use crate::validation::{has_errors, template_validator, TemplateSubject, TemplateValidation, ValidationViolation};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

const ANONYMOUS_TEMPLATE: &str = "<string>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Php,
    Mixed,
    #[default]
    Auto,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Php => "php",
            OutputFormat::Mixed => "mixed",
            OutputFormat::Auto => "auto",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AtobusuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(OutputFormat::Html),
            "php" => Ok(OutputFormat::Php),
            "mixed" => Ok(OutputFormat::Mixed),
            "auto" => Ok(OutputFormat::Auto),
            other => Err(AtobusuError::template(format!("Unsupported output format: {}", other))),
        }
    }
}

/// A cache entry: the source text that passed the engine's syntax check,
/// with its version and kind. It holds no parsed engine template; every
/// render parses the current source again, so a cache hit only skips the
/// syntax check and the source read in `load`.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub name: String,
    pub source: String,
    pub version: String,
    pub kind: TemplateKind,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub cached_templates: usize,
    pub template_names: Vec<String>,
    pub template_source: String,
    pub available_templates: usize,
}

pub struct TemplateRenderer {
    source: Box<dyn TemplateSource>,
    processor: PlaceholderProcessor,
    env: Environment<'static>,
    cache: Mutex<HashMap<String, Arc<CompiledTemplate>>>,
    #[cfg(feature = "test-hooks")]
    compile_count: AtomicU32,
}

impl TemplateRenderer {
    pub fn new(source: Box<dyn TemplateSource>) -> Self {
        Self::with_processor(source, PlaceholderProcessor::new())
    }

    pub fn with_processor(source: Box<dyn TemplateSource>, processor: PlaceholderProcessor) -> Self {
        info!(source = %source.describe(), "Template renderer initialized");
        Self {
            source,
            processor,
            env: build_environment(),
            cache: Mutex::new(HashMap::new()),
            #[cfg(feature = "test-hooks")]
            compile_count: AtomicU32::new(0),
        }
    }

    /// Number of syntax checks this renderer has run.
    #[cfg(feature = "test-hooks")]
    pub fn compile_count(&self) -> u32 {
        self.compile_count.load(Ordering::SeqCst)
    }

    pub fn from_directory(root: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileSystemTemplateSource::new(root)))
    }

    pub fn processor(&self) -> &PlaceholderProcessor {
        &self.processor
    }

    /// Cached compiled template, or load and syntax-check it.
    pub fn load(&self, name: &str) -> Result<Arc<CompiledTemplate>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = cache.get(name) {
            debug!(template = name, "Template cache hit");
            return Ok(Arc::clone(compiled));
        }

        let loaded = self.source.load(name)?;
        self.check_syntax(name, &loaded.text)?;

        #[cfg(feature = "test-hooks")]
        self.compile_count.fetch_add(1, Ordering::SeqCst);

        let compiled = Arc::new(CompiledTemplate {
            name: name.to_string(),
            kind: TemplateKind::detect(name, &loaded.text),
            source: loaded.text,
            version: loaded.version,
            loaded_at: Utc::now(),
        });
        cache.insert(name.to_string(), Arc::clone(&compiled));
        info!(template = name, "Loaded template");
        Ok(compiled)
    }

    /// PHP fragments are hidden first so only engine syntax is checked.
    fn check_syntax(&self, name: &str, text: &str) -> Result<()> {
        let checked = if contains_foreign_syntax(text) {
            protect(text)?.0
        } else {
            text.to_string()
        };
        let mut scratch = self.env.clone();
        scratch.add_template_owned(name.to_string(), checked).map_err(|e| {
            AtobusuError::template(format!("Template syntax error in '{}'", name)).with_details(e)
        })
    }

    /// Current source text; warns when it no longer matches the cached copy.
    fn current_source(&self, name: &str, compiled: &CompiledTemplate) -> Result<SourceText> {
        let current = self.source.load(name)?;
        if current.version != compiled.version {
            warn!(
                template = name,
                cached = %compiled.version,
                current = %current.version,
                "Template source changed since it was cached; call clear_cache to recompile"
            );
        }
        Ok(current)
    }

    pub fn render(&self, name: &str, context: &PlaceholderContext) -> Result<String> {
        self.render_template(name, context, OutputFormat::Auto)
    }

    pub fn render_template(
        &self,
        name: &str,
        context: &PlaceholderContext,
        format: OutputFormat,
    ) -> Result<String> {
        let compiled = self.load(name)?;
        let current = self.current_source(name, &compiled)?;
        let format = match format {
            OutputFormat::Auto => detect_format(name, &current.text),
            explicit => explicit,
        };
        debug!(template = name, format = %format, "Rendering template");

        let rendered = match format {
            OutputFormat::Html => self.expand_plain(name, &current.text, context),
            _ => self.expand_protected(name, &current.text, context),
        }?;
        info!(template = name, format = %format, bytes = rendered.len(), "Rendered template");
        Ok(rendered)
    }

    pub fn render_html(&self, name: &str, context: &PlaceholderContext) -> Result<String> {
        self.render_template(name, context, OutputFormat::Html)
    }

    pub fn render_php(&self, name: &str, context: &PlaceholderContext) -> Result<String> {
        self.render_template(name, context, OutputFormat::Php)
    }

    pub fn render_mixed(&self, name: &str, context: &PlaceholderContext) -> Result<String> {
        self.render_template(name, context, OutputFormat::Mixed)
    }

    /// Render anonymous source text. Nothing is cached.
    pub fn render_from_source(&self, source: &str, context: &PlaceholderContext) -> Result<String> {
        if contains_foreign_syntax(source) {
            self.expand_protected(ANONYMOUS_TEMPLATE, source, context)
        } else {
            self.expand_plain(ANONYMOUS_TEMPLATE, source, context)
        }
    }

    fn expand_plain(&self, name: &str, text: &str, context: &PlaceholderContext) -> Result<String> {
        let substituted = self.processor.apply_all(text, context);
        self.expand(name, &substituted, context)
    }

    fn expand_protected(&self, name: &str, text: &str, context: &PlaceholderContext) -> Result<String> {
        let (protected, table) = protect(text)?;
        if mentions(context, table.nonce()) {
            return Err(AtobusuError::template("Sentinel collision in render context")
                .with_details(format!("context data contains sentinel nonce '{}'", table.nonce())));
        }
        let substituted = self.processor.apply_all(&protected, context);
        let expanded = self.expand(name, &substituted, context)?;
        let restored = table.restore(&expanded);
        debug!(template = name, fragments = table.len(), "Restored PHP fragments");
        Ok(restored)
    }

    fn expand(&self, name: &str, text: &str, context: &PlaceholderContext) -> Result<String> {
        self.env.render_named_str(name, text, context.as_map()).map_err(|e| {
            AtobusuError::template(format!("Template rendering failed for '{}'", name)).with_details(e)
        })
    }

    /// Structured result; load and syntax failures are reported, not raised.
    pub fn validate_template(&self, name: &str) -> TemplateValidation {
        let compiled = match self.load(name) {
            Ok(compiled) => compiled,
            Err(e) => {
                let violation = ValidationViolation::error("template_load", e.to_string());
                return TemplateValidation::failed(name, violation);
            }
        };

        let stats = self.processor.stats(&compiled.source);
        let subject = TemplateSubject { name, source: &compiled.source, stats: &stats };
        let violations = template_validator().validate(&subject);
        TemplateValidation {
            template_name: name.to_string(),
            valid: !has_errors(&violations),
            template_type: compiled.kind,
            violations,
            placeholder_stats: Some(stats),
        }
    }

    pub fn process_embedded_calls(&self, content: &str, context: &PlaceholderContext) -> String {
        self.processor.process_embedded_calls(content, context)
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let cleared = cache.len();
        cache.clear();
        info!(cleared, "Template cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        let mut template_names: Vec<String> = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        template_names.sort();
        CacheStats {
            cached_templates: template_names.len(),
            template_names,
            template_source: self.source.describe(),
            available_templates: self.source.list().len(),
        }
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.source.list()
    }

    pub fn template_exists(&self, name: &str) -> bool {
        self.source.exists(name)
    }
}

fn mentions(context: &PlaceholderContext, needle: &str) -> bool {
    serde_json::to_string(context.as_map())
        .map(|json| json.contains(needle))
        .unwrap_or(false)
}

/// `.php` names take the PHP path; anything else is decided by content.
fn detect_format(name: &str, text: &str) -> OutputFormat {
    if name.to_ascii_lowercase().ends_with(".php") {
        OutputFormat::Php
    } else if contains_foreign_syntax(text) {
        OutputFormat::Mixed
    } else {
        OutputFormat::Html
    }
}

fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.add_filter("format_date", format_date);
    env.add_filter("preserve_php", preserve_php);
    env
}

/// Reformat `YYYY-MM-DD` or `YYYY/MM/DD` strings; anything else passes through.
fn format_date(value: minijinja::Value, format: Option<String>) -> String {
    let text = value.to_string();
    let format = format.unwrap_or_else(|| "%Y/%m/%d".to_string());
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
        return text;
    }
    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|pattern| NaiveDate::parse_from_str(&text, pattern).ok())
        .map(|date| date.format(&format).to_string())
        .unwrap_or(text)
}

fn preserve_php(value: minijinja::Value) -> minijinja::Value {
    value
}
