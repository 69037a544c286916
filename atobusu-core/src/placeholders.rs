//! Placeholder Processing
//!
//! Five passes, always in this order:
//! 1. product-code keywords (literal replace)
//! 2. date sentinels and named date keywords (literal replace)
//! 3. first argument of `<?=name("ARG1", "ARG2")?>` calls
//! 4. `{{name}}` with dotted-path lookup
//! 5. `${name}` with flat lookup
//!
//! Literal passes match anywhere in the text, including inside prose.
//! Unresolved `{{..}}` and `${..}` tokens are left verbatim and logged.

use chrono::{Local, NaiveDate};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::context::{stringify, PlaceholderContext};
use crate::error::{text_prefix, AtobusuError, Result};

/// Replaced in this order; `code` last so longer keywords claim their text first.
pub const PRODUCT_CODE_KEYWORDS: [&str; 6] =
    ["商品コード", "product_code", "PRODUCT_CODE", "製品コード", "item_code", "code"];

pub const DATE_FULL_SENTINEL: &str = "2025/00/00";
pub const DATE_SHORT_SENTINEL: &str = "'25/00/00";

pub const NAMED_DATE_PLACEHOLDERS: [&str; 7] = [
    "post_date",
    "update_date",
    "publish_date",
    "review_date",
    "short_date",
    "current_date",
    "current_short_date",
];

/// Fields an embedded-call first argument may be matched against.
pub const CALL_ARGUMENT_FIELDS: [&str; 3] = ["product_name", "category", "reviewer_name"];

const PRODUCT_CODE_PATTERN: &str = r"[^/]*コード[^/]*";
const EMBEDDED_CALL_PATTERN: &str = r#"<\?=(\w+)\("([^"]*)",(\s*)"([^"]*)"\)\?>"#;
const DOUBLE_BRACE_PATTERN: &str = r"\{\{([^}]+)\}\}";
const DOLLAR_BRACE_PATTERN: &str = r"\$\{([^}]+)\}";

static PRODUCT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PRODUCT_CODE_PATTERN).expect("product code pattern"));
static EMBEDDED_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMBEDDED_CALL_PATTERN).expect("embedded call pattern"));
static DOUBLE_BRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DOUBLE_BRACE_PATTERN).expect("double brace pattern"));
static DOLLAR_BRACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DOLLAR_BRACE_PATTERN).expect("dollar brace pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateStyle {
    /// 2025/01/15
    Full,
    /// '25/01/15
    Short,
    /// 2025-01-15
    Iso,
    /// 2025年01月15日
    Japanese,
}

impl DateStyle {
    pub fn pattern(&self) -> &'static str {
        match self {
            DateStyle::Full => "%Y/%m/%d",
            DateStyle::Short => "'%y/%m/%d",
            DateStyle::Iso => "%Y-%m-%d",
            DateStyle::Japanese => "%Y年%m月%d日",
        }
    }

    pub fn format(&self, date: NaiveDate) -> String {
        date.format(self.pattern()).to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderStats {
    pub product_code_patterns: usize,
    pub date_placeholders: usize,
    pub php_functions: usize,
    pub generic_placeholders: usize,
    pub template_variables: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, usize>,
}

impl PlaceholderStats {
    pub fn total(&self) -> usize {
        self.product_code_patterns
            + self.date_placeholders
            + self.php_functions
            + self.generic_placeholders
            + self.template_variables
            + self.custom.values().sum::<usize>()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaceholderProcessor {
    custom_patterns: BTreeMap<String, Regex>,
    /// Fixed "today" for date slots; the local clock when unset.
    today: Option<NaiveDate>,
}

impl PlaceholderProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Register a statistics-only pattern. Invalid regex is rejected here.
    pub fn add_custom_pattern(&mut self, name: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| {
            AtobusuError::processing(format!("Invalid regex pattern '{}'", pattern)).with_details(e)
        })?;
        self.custom_patterns.insert(name.to_string(), regex);
        info!(name, pattern, "Added custom placeholder pattern");
        Ok(())
    }

    /// Run all five passes. Empty content or an empty context returns the
    /// content unchanged.
    pub fn apply_all(&self, content: &str, context: &PlaceholderContext) -> String {
        if content.is_empty() || context.is_empty() {
            return content.to_string();
        }
        debug!(prefix = %text_prefix(content, 100), "Starting placeholder processing");

        let result = self.process_product_codes(content, context);
        let result = self.process_dates(&result, context);
        let result = self.process_embedded_calls(&result, context);
        let result = self.process_double_brace(&result, context);
        let result = self.process_dollar_brace(&result, context);

        if result != content {
            info!("Placeholder processing completed with changes");
        } else {
            debug!("Placeholder processing completed with no changes");
        }
        result
    }

    pub fn process_product_codes(&self, content: &str, context: &PlaceholderContext) -> String {
        let Some(code) = context.get_text("product_code") else {
            return content.to_string();
        };
        let mut result = content.to_string();
        for keyword in PRODUCT_CODE_KEYWORDS {
            if result.contains(keyword) {
                result = result.replace(keyword, &code);
                debug!(keyword, code = %code, "Replaced product code keyword");
            }
        }
        result
    }

    pub fn process_dates(&self, content: &str, context: &PlaceholderContext) -> String {
        if content.is_empty() || context.is_empty() {
            return content.to_string();
        }
        let dates = date_fields(context);
        let mut result = content.to_string();

        if result.contains(DATE_FULL_SENTINEL) {
            let date = self.resolve_date_slot(&dates, DateStyle::Full);
            result = result.replace(DATE_FULL_SENTINEL, &date);
            debug!(date = %date, "Replaced full date sentinel");
        }
        if result.contains(DATE_SHORT_SENTINEL) {
            let date = self.resolve_date_slot(&dates, DateStyle::Short);
            result = result.replace(DATE_SHORT_SENTINEL, &date);
            debug!(date = %date, "Replaced short date sentinel");
        }

        for name in NAMED_DATE_PLACEHOLDERS {
            let value = match name {
                "current_date" => DateStyle::Full.format(self.today()),
                "current_short_date" => DateStyle::Short.format(self.today()),
                _ => non_empty(&dates, name).unwrap_or_default(),
            };
            if !value.is_empty() && result.contains(name) {
                result = result.replace(name, &value);
                debug!(placeholder = name, value = %value, "Replaced named date placeholder");
            }
        }
        result
    }

    fn resolve_date_slot(&self, dates: &Map<String, Value>, style: DateStyle) -> String {
        let named = match style {
            DateStyle::Short => "short_date",
            _ => "post_date",
        };
        non_empty(dates, named)
            .or_else(|| non_empty(dates, "date"))
            .unwrap_or_else(|| style.format(self.today()))
    }

    /// Rewrites only the first argument; the second names a field and is kept.
    pub fn process_embedded_calls(&self, content: &str, context: &PlaceholderContext) -> String {
        if content.is_empty() || context.is_empty() {
            return content.to_string();
        }
        let mut count = 0usize;
        let result = EMBEDDED_CALL_RE.replace_all(content, |caps: &Captures<'_>| {
            count += 1;
            let argument = resolve_call_argument(&caps[2], context);
            format!("<?={}(\"{}\",{}\"{}\")?>", &caps[1], argument, &caps[3], &caps[4])
        });
        if count > 0 {
            debug!(count, "Processed embedded function calls");
        }
        result.into_owned()
    }

    pub fn process_double_brace(&self, content: &str, context: &PlaceholderContext) -> String {
        if content.is_empty() || context.is_empty() {
            return content.to_string();
        }
        DOUBLE_BRACE_RE
            .replace_all(content, |caps: &Captures<'_>| {
                let name = caps[1].trim();
                match context.lookup_path(name) {
                    Some(value) => stringify(value),
                    None => {
                        warn!(placeholder = name, "Placeholder not found in data");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    pub fn process_dollar_brace(&self, content: &str, context: &PlaceholderContext) -> String {
        if content.is_empty() || context.is_empty() {
            return content.to_string();
        }
        DOLLAR_BRACE_RE
            .replace_all(content, |caps: &Captures<'_>| {
                let name = caps[1].trim();
                match context.get(name) {
                    Some(value) => stringify(value),
                    None => {
                        warn!(variable = name, "Template variable not found in data");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Diagnostic counts per pattern family. Never mutates, never fails.
    pub fn stats(&self, content: &str) -> PlaceholderStats {
        if content.is_empty() {
            return PlaceholderStats::default();
        }
        PlaceholderStats {
            product_code_patterns: PRODUCT_CODE_RE.find_iter(content).count(),
            date_placeholders: content.matches(DATE_FULL_SENTINEL).count()
                + content.matches(DATE_SHORT_SENTINEL).count(),
            php_functions: EMBEDDED_CALL_RE.find_iter(content).count(),
            generic_placeholders: DOUBLE_BRACE_RE.find_iter(content).count(),
            template_variables: DOLLAR_BRACE_RE.find_iter(content).count(),
            custom: self
                .custom_patterns
                .iter()
                .map(|(name, regex)| (name.clone(), regex.find_iter(content).count()))
                .collect(),
        }
    }
}

/// The `dates` mapping, or `{date: <date>}` when only a generic date is given.
fn date_fields(context: &PlaceholderContext) -> Map<String, Value> {
    match context.mapping("dates") {
        Some(dates) if !dates.is_empty() => dates.clone(),
        _ => {
            let mut fallback = Map::new();
            if let Some(date) = context.get("date") {
                fallback.insert("date".to_string(), date.clone());
            }
            fallback
        }
    }
}

fn non_empty(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).map(stringify).filter(|s| !s.is_empty())
}

fn resolve_call_argument(argument: &str, context: &PlaceholderContext) -> String {
    let lowered = argument.to_lowercase();
    if argument.contains("コード") || lowered.contains("code") {
        return context.get_text("product_code").unwrap_or_else(|| argument.to_string());
    }
    for field in CALL_ARGUMENT_FIELDS {
        if let Some(value) = context.get_text(field) {
            if lowered.contains(field) || value.contains(argument) {
                return value;
            }
        }
    }
    argument.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn processor() -> PlaceholderProcessor {
        PlaceholderProcessor::new().with_today(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap())
    }

    fn context() -> PlaceholderContext {
        PlaceholderContext::from_value(json!({
            "product_code": "ABC123",
            "product_name": "Test Product",
            "category": "Electronics",
            "reviewer_name": "Tanaka",
            "title": "Test Title",
            "rating": 5,
            "dates": {"post_date": "2025/01/15", "short_date": "'25/01/15"},
            "meta": {"author": {"name": "Sato"}}
        }))
        .unwrap()
    }

    #[test]
    fn test_product_code_keywords_replaced_everywhere() {
        let out = processor().process_product_codes("商品コード / PRODUCT_CODE / 製品コード", &context());
        assert_eq!(out, "ABC123 / ABC123 / ABC123");
    }

    #[test]
    fn test_product_code_keyword_inside_prose_is_replaced() {
        let out = processor().process_product_codes("see the barcode", &context());
        assert_eq!(out, "see the barABC123");
    }

    #[test]
    fn test_product_code_skipped_without_value() {
        let ctx = PlaceholderContext::new().with("product_code", "").with("x", 1);
        let out = processor().process_product_codes("商品コード", &ctx);
        assert_eq!(out, "商品コード");
    }

    #[test]
    fn test_full_date_sentinel_uses_post_date() {
        let out = processor().process_dates("Date: 2025/00/00", &context());
        assert_eq!(out, "Date: 2025/01/15");
    }

    #[test]
    fn test_short_date_sentinel_uses_short_date() {
        let out = processor().process_dates("'25/00/00 UP", &context());
        assert_eq!(out, "'25/01/15 UP");
    }

    #[test]
    fn test_date_sentinels_fall_back_to_generic_date() {
        let ctx = PlaceholderContext::new().with("date", "2024/12/31");
        let out = processor().process_dates("2025/00/00 '25/00/00", &ctx);
        assert_eq!(out, "2024/12/31 2024/12/31");
    }

    #[test]
    fn test_date_sentinels_fall_back_to_today() {
        let ctx = PlaceholderContext::new().with("title", "x");
        let out = processor().process_dates("2025/00/00 '25/00/00", &ctx);
        assert_eq!(out, "2025/03/07 '25/03/07");
    }

    #[test]
    fn test_named_date_keywords() {
        let ctx = PlaceholderContext::from_value(json!({
            "dates": {"post_date": "2025/01/15", "update_date": "2025/02/01"}
        }))
        .unwrap();
        let out = processor().process_dates("post_date update_date review_date current_date", &ctx);
        assert_eq!(out, "2025/01/15 2025/02/01 review_date 2025/03/07");
    }

    #[test]
    fn test_embedded_call_rewrites_first_argument_only() {
        let out = processor().process_embedded_calls(r#"<?=prod_info("商品コード", "pname")?>"#, &context());
        assert_eq!(out, r#"<?=prod_info("ABC123", "pname")?>"#);
    }

    #[test]
    fn test_embedded_call_second_argument_never_touched() {
        let out = processor().process_embedded_calls(r#"<?=prod_info("item_code", "code")?>"#, &context());
        assert_eq!(out, r#"<?=prod_info("ABC123", "code")?>"#);
    }

    #[test]
    fn test_embedded_call_field_heuristic() {
        let p = processor();
        let ctx = context();
        assert_eq!(
            p.process_embedded_calls(r#"<?=prod_info("product_name", "pname")?>"#, &ctx),
            r#"<?=prod_info("Test Product", "pname")?>"#
        );
        assert_eq!(
            p.process_embedded_calls(r#"<?=prod_info("Electro", "cat")?>"#, &ctx),
            r#"<?=prod_info("Electronics", "cat")?>"#
        );
    }

    #[test]
    fn test_embedded_call_unmatched_argument_kept() {
        let out = processor().process_embedded_calls(r#"<?=prod_info("X", "pname")?>"#, &context());
        assert_eq!(out, r#"<?=prod_info("X", "pname")?>"#);
    }

    #[test]
    fn test_embedded_call_preserves_separator() {
        let out = processor().process_embedded_calls(r#"<?=prod_info("code","mimg")?>"#, &context());
        assert_eq!(out, r#"<?=prod_info("ABC123","mimg")?>"#);
    }

    #[test]
    fn test_double_brace_replaced_and_missing_left() {
        let out = processor().process_double_brace("{{title}} {{ missing }}", &context());
        assert_eq!(out, "Test Title {{ missing }}");
    }

    #[test]
    fn test_double_brace_dotted_path() {
        let p = processor();
        let ctx = context();
        assert_eq!(p.process_double_brace("{{meta.author.name}}", &ctx), "Sato");
        assert_eq!(p.process_double_brace("{{meta.editor.name}}", &ctx), "{{meta.editor.name}}");
    }

    #[test]
    fn test_dollar_brace_is_flat_only() {
        let out = processor().process_dollar_brace("${rating} ${meta} ${nope}", &context());
        assert_eq!(out, r#"5 {"author":{"name":"Sato"}} ${nope}"#);
        let out = processor().process_dollar_brace("${meta.author.name}", &context());
        assert_eq!(out, "${meta.author.name}");
    }

    #[test]
    fn test_apply_all_empty_context_short_circuits() {
        let out = processor().apply_all("商品コード {{title}} 2025/00/00", &PlaceholderContext::new());
        assert_eq!(out, "商品コード {{title}} 2025/00/00");
    }

    #[test]
    fn test_apply_all_empty_content() {
        assert_eq!(processor().apply_all("", &context()), "");
    }

    #[test]
    fn test_apply_all_order() {
        let content = "Product: product_code\nDate: 2025/00/00\nGeneric: {{title}}\nTemplate: ${rating}";
        let out = processor().apply_all(content, &context());
        assert_eq!(out, "Product: ABC123\nDate: 2025/01/15\nGeneric: Test Title\nTemplate: 5");
    }

    #[test]
    fn test_product_code_pass_runs_before_generic_placeholders() {
        // the keyword pass rewrites the token name before lookup
        let out = processor().apply_all("{{product_code}}", &context());
        assert_eq!(out, "{{ABC123}}");
    }

    #[test]
    fn test_stats_counts_each_family() {
        let content = "商品コード and product_code\n2025/00/00 and '25/00/00\n<?=prod_info(\"test\", \"pname\")?>\n{{title}} and {{description}}\n${rating} and ${category}";
        let stats = processor().stats(content);
        assert_eq!(stats.date_placeholders, 2);
        assert_eq!(stats.php_functions, 1);
        assert_eq!(stats.generic_placeholders, 2);
        assert_eq!(stats.template_variables, 2);
        assert_eq!(stats.product_code_patterns, 1);
    }

    #[test]
    fn test_stats_on_empty_content() {
        let stats = processor().stats("");
        assert_eq!(stats, PlaceholderStats::default());
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_custom_pattern_counts() {
        let mut p = processor();
        p.add_custom_pattern("sku", r"SKU-\d+").unwrap();
        let stats = p.stats("SKU-1 SKU-22 sku-3");
        assert_eq!(stats.custom.get("sku"), Some(&2));
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn test_invalid_custom_pattern_rejected() {
        let err = processor().add_custom_pattern("bad", "(").unwrap_err();
        assert!(matches!(err, AtobusuError::Processing { .. }));
        assert!(err.to_string().contains("Invalid regex pattern '('"));
    }

    #[test]
    fn test_date_style_formats() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(DateStyle::Full.format(d), "2025/01/05");
        assert_eq!(DateStyle::Short.format(d), "'25/01/05");
        assert_eq!(DateStyle::Iso.format(d), "2025-01-05");
        assert_eq!(DateStyle::Japanese.format(d), "2025年01月05日");
    }
}
