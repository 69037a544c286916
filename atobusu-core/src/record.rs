//! Input records: the JSON/YAML data feeds a page is generated from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::context::PlaceholderContext;
use crate::converter::Encoding;
use crate::error::{AtobusuError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Json,
    Yaml,
}

impl SourceType {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(SourceType::Json),
            "yaml" | "yml" => Ok(SourceType::Yaml),
            other => Err(AtobusuError::input(format!("Unsupported file format: .{}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Json => "json",
            SourceType::Yaml => "yaml",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    #[default]
    Page,
    Index,
    Content,
}

impl TemplateType {
    pub const ALL: [TemplateType; 3] = [TemplateType::Page, TemplateType::Index, TemplateType::Content];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Page => "page",
            TemplateType::Index => "index",
            TemplateType::Content => "content",
        }
    }

    /// Template used when none is named explicitly.
    pub fn default_template(&self) -> &'static str {
        match self {
            TemplateType::Page => "base_page.html",
            TemplateType::Index => "base_index.html",
            TemplateType::Content => "base_content.html",
        }
    }

    /// Explicit field, then path keywords, then data shape.
    pub fn determine(data: &Map<String, Value>, path: Option<&Path>) -> Self {
        if let Some(explicit) = data
            .get("template_type")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<TemplateType>().ok())
        {
            return explicit;
        }

        if let Some(path) = path {
            let lowered = path.to_string_lossy().to_lowercase();
            let keywords: [(TemplateType, &[&str]); 3] = [
                (TemplateType::Page, &["page", "detail"]),
                (TemplateType::Index, &["index", "list", "listing"]),
                (TemplateType::Content, &["content", "article", "post"]),
            ];
            for (template_type, words) in keywords {
                if words.iter().any(|w| lowered.contains(w)) {
                    return template_type;
                }
            }
        }

        if data.contains_key("items") || data.contains_key("list") {
            TemplateType::Index
        } else {
            TemplateType::Page
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateType {
    type Err = AtobusuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "page" => Ok(TemplateType::Page),
            "index" => Ok(TemplateType::Index),
            "content" => Ok(TemplateType::Content),
            other => Err(AtobusuError::input(format!("Unknown template type: {}", other))),
        }
    }
}

/// A parsed input file. The top level is always a mapping.
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub path: Option<PathBuf>,
    pub source_type: SourceType,
    pub encoding: Encoding,
    pub data: Map<String, Value>,
}

impl InputDocument {
    pub fn from_file(path: &Path, encoding: Encoding) -> Result<Self> {
        let source_type = SourceType::from_path(path)?;
        if !path.is_file() {
            return Err(AtobusuError::input(format!(
                "{} file not found: {}",
                source_type.as_str().to_uppercase(),
                path.display()
            )));
        }
        let bytes = fs::read(path).map_err(|e| {
            AtobusuError::input(format!("Failed to read input file: {}", path.display())).with_details(e)
        })?;
        let text = encoding.decode_lossy(&bytes);
        let mut document = Self::parse(&text, source_type, encoding)?;
        document.path = Some(path.to_path_buf());
        info!(path = %path.display(), source_type = source_type.as_str(), "Parsed input file");
        Ok(document)
    }

    pub fn parse(text: &str, source_type: SourceType, encoding: Encoding) -> Result<Self> {
        let value: Value = match source_type {
            SourceType::Json => serde_json::from_str(text).map_err(|e| {
                AtobusuError::input("Invalid JSON format").with_details(e)
            })?,
            SourceType::Yaml => serde_yaml::from_str::<Option<Value>>(text)
                .map_err(|e| AtobusuError::input("Invalid YAML format").with_details(e))?
                .unwrap_or(Value::Null),
        };
        let data = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(AtobusuError::input("Input data must be a mapping at the top level")),
        };
        Ok(Self { path: None, source_type, encoding, data })
    }

    /// The `template_data` mapping when present, else the top level.
    pub fn record(&self) -> Result<ReviewRecord> {
        serde_json::from_value(Value::Object(record_fields(&self.data).clone()))
            .map_err(|e| AtobusuError::processing("Invalid template data structure").with_details(e))
    }

    /// The `content` or `text` field, else the whole record as pretty JSON.
    pub fn content_text(&self) -> String {
        for key in ["content", "text"] {
            if let Some(Value::String(s)) = self.data.get(key) {
                return s.clone();
            }
        }
        serde_json::to_string_pretty(&self.data).unwrap_or_default()
    }

    pub fn file_stem(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }
}

/// The mapping `record()` reads: `template_data` when it is a mapping,
/// else the top level.
pub fn record_fields(data: &Map<String, Value>) -> &Map<String, Value> {
    match data.get("template_data") {
        Some(Value::Object(map)) => map,
        _ => data,
    }
}

/// Ratings arrive as integers, decimals or numeric strings. Null is zero;
/// negatives and anything else are rejected.
pub fn parse_rating(value: &Value) -> Option<Number> {
    let number = match value {
        Value::Null => Number::from(0u32),
        Value::Number(n) => n.clone(),
        Value::String(s) => serde_json::from_str::<Number>(s.trim()).ok()?,
        _ => return None,
    };
    match number.as_f64() {
        Some(f) if f >= 0.0 => Some(number),
        _ => None,
    }
}

/// Product/review fields consumed by placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub product_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub product_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub reviewer_name: String,
    #[serde(deserialize_with = "lenient_rating")]
    pub rating: Number,
    #[serde(deserialize_with = "lenient_dates")]
    pub dates: BTreeMap<String, String>,
    pub additional_data: Map<String, Value>,
}

impl Default for ReviewRecord {
    fn default() -> Self {
        Self {
            product_code: String::new(),
            product_name: String::new(),
            category: String::new(),
            reviewer_name: String::new(),
            rating: Number::from(0u32),
            dates: BTreeMap::new(),
            additional_data: Map::new(),
        }
    }
}

impl ReviewRecord {
    /// Record fields, dates (flattened and as a `dates` mapping), then
    /// additional data.
    pub fn to_placeholder_context(&self) -> PlaceholderContext {
        let mut context = PlaceholderContext::new()
            .with("product_code", self.product_code.clone())
            .with("product_name", self.product_name.clone())
            .with("category", self.category.clone())
            .with("reviewer_name", self.reviewer_name.clone())
            .with("rating", self.rating.clone());

        let dates: Map<String, Value> = self
            .dates
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        context.merge(&dates);
        context.insert("dates", Value::Object(dates));
        context.merge(&self.additional_data);
        context
    }
}

/// Product codes are sometimes numeric in feeds.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        other => crate::context::stringify(&other),
    })
}

fn lenient_rating<'de, D>(deserializer: D) -> std::result::Result<Number, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_rating(&value).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "rating must be a non-negative number, got {}",
            crate::context::stringify(&value)
        ))
    })
}

/// Date values may be numbers in YAML feeds; nulls are dropped.
fn lenient_dates<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, crate::context::stringify(&v)))
            .collect()),
        _ => Err(serde::de::Error::custom("dates must be a mapping")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_and_yaml() {
        let json_doc = InputDocument::parse(r#"{"product_code": "A1"}"#, SourceType::Json, Encoding::Utf8).unwrap();
        assert_eq!(json_doc.data.get("product_code"), Some(&json!("A1")));

        let yaml_doc = InputDocument::parse("product_code: A1\nrating: 4\n", SourceType::Yaml, Encoding::Utf8).unwrap();
        assert_eq!(yaml_doc.data.get("rating"), Some(&json!(4)));
    }

    #[test]
    fn test_empty_yaml_is_empty_mapping() {
        let doc = InputDocument::parse("", SourceType::Yaml, Encoding::Utf8).unwrap();
        assert!(doc.data.is_empty());
    }

    #[test]
    fn test_non_mapping_top_level_rejected() {
        let err = InputDocument::parse("[1, 2]", SourceType::Json, Encoding::Utf8).unwrap_err();
        assert!(matches!(err, AtobusuError::Input { .. }));
    }

    #[test]
    fn test_invalid_json_is_input_error() {
        let err = InputDocument::parse("{", SourceType::Json, Encoding::Utf8).unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON format"));
    }

    #[test]
    fn test_source_type_from_extension() {
        assert_eq!(SourceType::from_path(Path::new("a.YML")).unwrap(), SourceType::Yaml);
        assert!(SourceType::from_path(Path::new("a.txt")).is_err());
    }

    #[test]
    fn test_record_prefers_template_data() {
        let doc = InputDocument::parse(
            r#"{"product_code": "TOP", "template_data": {"product_code": 12345, "rating": 3}}"#,
            SourceType::Json,
            Encoding::Utf8,
        )
        .unwrap();
        let record = doc.record().unwrap();
        assert_eq!(record.product_code, "12345");
        assert_eq!(record.rating, Number::from(3));
    }

    #[test]
    fn test_record_reads_top_level_leniently() {
        let doc = InputDocument::parse(
            r#"{"content": "x", "product_code": "A1", "rating": 4.5, "dates": {"post_date": 20250115, "short_date": null}}"#,
            SourceType::Json,
            Encoding::Utf8,
        )
        .unwrap();
        let record = doc.record().unwrap();
        assert_eq!(record.rating.as_f64(), Some(4.5));
        assert_eq!(record.dates.get("post_date").map(String::as_str), Some("20250115"));
        assert!(!record.dates.contains_key("short_date"));
        assert_eq!(record.to_placeholder_context().get("rating"), Some(&json!(4.5)));
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating(&json!(5)), Some(Number::from(5)));
        assert_eq!(parse_rating(&json!(" 3 ")), Some(Number::from(3)));
        assert_eq!(parse_rating(&Value::Null), Some(Number::from(0u32)));
        assert_eq!(parse_rating(&json!(-1)), None);
        assert_eq!(parse_rating(&json!("five")), None);
        assert_eq!(parse_rating(&json!([5])), None);
    }

    #[test]
    fn test_placeholder_context_flattens_dates_and_extras() {
        let record = ReviewRecord {
            product_code: "A1".into(),
            dates: BTreeMap::from([("post_date".to_string(), "2025/01/15".to_string())]),
            additional_data: json!({"brand": "Acme"}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        let ctx = record.to_placeholder_context();
        assert_eq!(ctx.get("post_date"), Some(&json!("2025/01/15")));
        assert_eq!(ctx.lookup_path("dates.post_date"), Some(&json!("2025/01/15")));
        assert_eq!(ctx.get("brand"), Some(&json!("Acme")));
        assert_eq!(ctx.get("rating"), Some(&json!(0)));
    }

    #[test]
    fn test_template_type_determination() {
        let explicit = json!({"template_type": "Index"}).as_object().cloned().unwrap();
        assert_eq!(TemplateType::determine(&explicit, None), TemplateType::Index);

        let empty = Map::new();
        assert_eq!(TemplateType::determine(&empty, Some(Path::new("data/listing.json"))), TemplateType::Index);
        assert_eq!(TemplateType::determine(&empty, Some(Path::new("data/article.json"))), TemplateType::Content);

        let items = json!({"items": []}).as_object().cloned().unwrap();
        assert_eq!(TemplateType::determine(&items, None), TemplateType::Index);
        assert_eq!(TemplateType::determine(&empty, None), TemplateType::Page);
    }

    #[test]
    fn test_content_text_prefers_content_field() {
        let doc = InputDocument::parse(r#"{"text": "本文", "x": 1}"#, SourceType::Json, Encoding::Utf8).unwrap();
        assert_eq!(doc.content_text(), "本文");
        let doc = InputDocument::parse(r#"{"x": 1}"#, SourceType::Json, Encoding::Utf8).unwrap();
        assert_eq!(doc.content_text(), "{\n  \"x\": 1\n}");
    }
}
