//! Character Conversion
//!
//! Pipeline order is fixed: encoding normalization, quotes, circled
//! numbers, special symbols. The `symbols` table is a pass-through kept only
//! so statistics can report on it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{text_prefix, AtobusuError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Quotes,
    Symbols,
    CircledNumbers,
    SpecialSymbols,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 4] = [
        RuleCategory::Quotes,
        RuleCategory::Symbols,
        RuleCategory::CircledNumbers,
        RuleCategory::SpecialSymbols,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Quotes => "quotes",
            RuleCategory::Symbols => "symbols",
            RuleCategory::CircledNumbers => "circled_numbers",
            RuleCategory::SpecialSymbols => "special_symbols",
        }
    }

    /// Categories whose compiled pattern must be rebuilt after a rule change.
    pub fn is_pattern_backed(&self) -> bool {
        matches!(self, RuleCategory::CircledNumbers | RuleCategory::SpecialSymbols)
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleCategory {
    type Err = AtobusuError;

    fn from_str(s: &str) -> Result<Self> {
        RuleCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AtobusuError::processing(format!("Unknown conversion rule category: {}", s)))
    }
}

/// Source literal -> replacement, per category. Keys are unique per category
/// and iterate in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionRuleSet {
    pub quotes: BTreeMap<String, String>,
    pub symbols: BTreeMap<String, String>,
    pub circled_numbers: BTreeMap<String, String>,
    pub special_symbols: BTreeMap<String, String>,
}

impl Default for ConversionRuleSet {
    fn default() -> Self {
        let quotes = BTreeMap::from([("\"".to_string(), "\u{201C}".to_string())]);
        let symbols = BTreeMap::from([("※".to_string(), "※".to_string())]);
        // ① (U+2460) through ⑳ (U+2473)
        let circled_numbers = (0x2460u32..=0x2473)
            .filter_map(char::from_u32)
            .map(|c| (c.to_string(), format!("&#{};", c as u32)))
            .collect();
        let special_symbols = BTreeMap::from([
            ("◎".to_string(), "&#9678;".to_string()),
            ("ハート".to_string(), "&#9825;".to_string()),
            ("♪".to_string(), "&#9834;".to_string()),
        ]);
        Self { quotes, symbols, circled_numbers, special_symbols }
    }
}

impl ConversionRuleSet {
    /// A rule set with no rules in any category.
    pub fn empty() -> Self {
        Self {
            quotes: BTreeMap::new(),
            symbols: BTreeMap::new(),
            circled_numbers: BTreeMap::new(),
            special_symbols: BTreeMap::new(),
        }
    }

    pub fn table(&self, category: RuleCategory) -> &BTreeMap<String, String> {
        match category {
            RuleCategory::Quotes => &self.quotes,
            RuleCategory::Symbols => &self.symbols,
            RuleCategory::CircledNumbers => &self.circled_numbers,
            RuleCategory::SpecialSymbols => &self.special_symbols,
        }
    }

    fn table_mut(&mut self, category: RuleCategory) -> &mut BTreeMap<String, String> {
        match category {
            RuleCategory::Quotes => &mut self.quotes,
            RuleCategory::Symbols => &mut self.symbols,
            RuleCategory::CircledNumbers => &mut self.circled_numbers,
            RuleCategory::SpecialSymbols => &mut self.special_symbols,
        }
    }
}

/// Target encoding for normalization. Unrepresentable characters become `?`
/// on encode; invalid sequences become U+FFFD on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "ascii", alias = "us-ascii")]
    Ascii,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin-1",
        }
    }

    fn max_code_point(&self) -> Option<u32> {
        match self {
            Encoding::Utf8 => None,
            Encoding::Ascii => Some(0x7F),
            Encoding::Latin1 => Some(0xFF),
        }
    }

    pub fn encode_lossy(&self, text: &str) -> Vec<u8> {
        match self.max_code_point() {
            None => text.as_bytes().to_vec(),
            Some(max) => text
                .chars()
                .map(|c| if (c as u32) <= max { c as u32 as u8 } else { b'?' })
                .collect(),
        }
    }

    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Ascii => bytes
                .iter()
                .map(|&b| if b <= 0x7F { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    pub fn can_encode(&self, text: &str) -> bool {
        match self.max_code_point() {
            None => true,
            Some(max) => text.chars().all(|c| (c as u32) <= max),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = AtobusuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(AtobusuError::processing(format!("Unsupported encoding: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub straight_quotes: usize,
    pub circled_numbers: usize,
    pub special_symbols: usize,
    pub japanese_chars: usize,
}

/// Hiragana, Katakana and CJK Unified Ideographs.
pub fn is_japanese_char(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{4E00}'..='\u{9FAF}')
}

pub struct CharacterConverter {
    rules: ConversionRuleSet,
    circled_pattern: Option<Regex>,
    special_pattern: Option<Regex>,
}

impl CharacterConverter {
    pub fn new(rules: ConversionRuleSet) -> Result<Self> {
        let mut converter = Self { rules, circled_pattern: None, special_pattern: None };
        converter.compile_patterns()?;
        Ok(converter)
    }

    pub fn rules(&self) -> &ConversionRuleSet {
        &self.rules
    }

    fn compile_patterns(&mut self) -> Result<()> {
        self.circled_pattern = alternation(&self.rules.circled_numbers)?;
        self.special_pattern = alternation(&self.rules.special_symbols)?;
        Ok(())
    }

    /// Insert or overwrite one rule. Pattern-backed categories are recompiled
    /// before this returns.
    pub fn add_rule(&mut self, category: RuleCategory, from: &str, to: &str) -> Result<()> {
        if from.is_empty() {
            return Err(AtobusuError::processing(format!(
                "Conversion rule source for '{}' must not be empty",
                category
            )));
        }
        self.rules.table_mut(category).insert(from.to_string(), to.to_string());
        if category.is_pattern_backed() {
            self.compile_patterns()?;
        }
        info!(category = %category, from, to, "Added conversion rule");
        Ok(())
    }

    pub fn normalize_encoding(&self, text: &str, encoding: Encoding) -> Result<String> {
        let normalized = encoding.decode_lossy(&encoding.encode_lossy(text));
        if !encoding.can_encode(&normalized) {
            return Err(AtobusuError::processing(format!(
                "Failed to normalize text to {}: {}",
                encoding,
                text_prefix(text, 50)
            )));
        }
        let japanese = normalized.chars().filter(|c| is_japanese_char(*c)).count();
        if japanese > 0 {
            debug!(japanese, "Found Japanese characters");
        }
        Ok(normalized)
    }

    /// Every straight quote becomes the same opening curly quote; there is no
    /// open/close alternation.
    pub fn convert_quotes(&self, text: &str) -> String {
        replace_literals(text, &self.rules.quotes)
    }

    pub fn convert_circled_numbers(&self, text: &str) -> String {
        let Some(pattern) = &self.circled_pattern else {
            return text.to_string();
        };
        let table = &self.rules.circled_numbers;
        pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let glyph = &caps[0];
                table.get(glyph).cloned().unwrap_or_else(|| glyph.to_string())
            })
            .into_owned()
    }

    pub fn convert_symbols(&self, text: &str) -> String {
        match &self.special_pattern {
            Some(pattern) if pattern.is_match(text) => {
                replace_literals(text, &self.rules.special_symbols)
            }
            _ => text.to_string(),
        }
    }

    pub fn apply_all_conversions(&self, text: &str, encoding: Encoding) -> Result<String> {
        if text.is_empty() {
            return Ok(String::new());
        }
        debug!(prefix = %text_prefix(text, 100), "Starting character conversion");

        let result = self.normalize_encoding(text, encoding)?;
        let result = self.convert_quotes(&result);
        let result = self.convert_circled_numbers(&result);
        let result = self.convert_symbols(&result);

        if result != text {
            info!("Character conversion completed with changes");
        } else {
            debug!("Character conversion completed with no changes");
        }
        Ok(result)
    }

    pub fn conversion_stats(&self, text: &str) -> ConversionStats {
        let count_table = |table: &BTreeMap<String, String>| -> usize {
            table.keys().map(|k| text.matches(k.as_str()).count()).sum()
        };
        ConversionStats {
            straight_quotes: text.matches('"').count(),
            circled_numbers: count_table(&self.rules.circled_numbers),
            special_symbols: count_table(&self.rules.special_symbols),
            japanese_chars: text.chars().filter(|c| is_japanese_char(*c)).count(),
        }
    }
}

impl Default for CharacterConverter {
    fn default() -> Self {
        let rules = ConversionRuleSet::default();
        // the default tables are plain escaped literals
        let circled_pattern = alternation(&rules.circled_numbers).ok().flatten();
        let special_pattern = alternation(&rules.special_symbols).ok().flatten();
        Self { rules, circled_pattern, special_pattern }
    }
}

/// Longest-first alternation of escaped literals, `None` for an empty table.
fn alternation(table: &BTreeMap<String, String>) -> Result<Option<Regex>> {
    if table.is_empty() {
        return Ok(None);
    }
    let mut keys: Vec<&str> = table.keys().map(String::as_str).collect();
    keys.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    let pattern = keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|");
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| AtobusuError::processing("Failed to compile conversion pattern").with_details(e))
}

fn replace_literals(text: &str, table: &BTreeMap<String, String>) -> String {
    let mut result = text.to_string();
    for (from, to) in table {
        if result.contains(from.as_str()) {
            result = result.replace(from.as_str(), to);
            debug!(from = %from, to = %to, "Literal conversion");
        }
    }
    result
}
