//! PHP Fragment Protection
//!
//! PHP islands are swapped for sentinel tokens before the templating engine
//! sees the text, then swapped back afterwards. Tokens look like
//! `__PHP_TAGS_1f0c9a2b44de_0__` and contain nothing the engine treats as
//! syntax. The hex part is a nonce drawn per `protect` call, so substituted
//! data cannot spell a token that restore would act on.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{AtobusuError, Result};
use crate::hashing::sha256_hex;

static PHP_TAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<\?(?:php)?\s.*?\?>").expect("php tags pattern"));
static PHP_ECHO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\?=.*?\?>").expect("php echo pattern"));
static PHP_SHORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\?.*?\?>").expect("php short pattern"));
static SENTINEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__PHP_(?:TAGS|ECHO|SHORT)_(?:[0-9a-f]+_)?\d+__").expect("sentinel pattern")
});

static PROTECT_CALLS: AtomicU64 = AtomicU64::new(0);
const NONCE_LEN: usize = 12;

/// Fragment families in claim priority: most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentFamily {
    /// `<?php ... ?>` and `<? ... ?>` with whitespace after the opener
    PhpTags,
    /// `<?= ... ?>`
    PhpEcho,
    /// any remaining `<? ... ?>`
    PhpShort,
}

impl FragmentFamily {
    pub const ALL: [FragmentFamily; 3] =
        [FragmentFamily::PhpTags, FragmentFamily::PhpEcho, FragmentFamily::PhpShort];

    fn label(&self) -> &'static str {
        match self {
            FragmentFamily::PhpTags => "TAGS",
            FragmentFamily::PhpEcho => "ECHO",
            FragmentFamily::PhpShort => "SHORT",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            FragmentFamily::PhpTags => &PHP_TAGS_RE,
            FragmentFamily::PhpEcho => &PHP_ECHO_RE,
            FragmentFamily::PhpShort => &PHP_SHORT_RE,
        }
    }

    fn sentinel(&self, nonce: &str, index: usize) -> String {
        format!("__PHP_{}_{}_{}__", self.label(), nonce, index)
    }
}

fn fresh_nonce() -> String {
    let call = PROTECT_CALLS.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = sha256_hex(format!("{}:{}", call, now).as_bytes());
    digest[..NONCE_LEN].to_string()
}

/// Whether any fragment family matches.
pub fn contains_foreign_syntax(text: &str) -> bool {
    FragmentFamily::ALL.iter().any(|f| f.pattern().is_match(text))
}

/// Sentinel -> original fragment, in claim order. Lives for one render call.
#[derive(Debug)]
pub struct ProtectedFragmentTable {
    nonce: String,
    entries: Vec<(String, String)>,
}

impl ProtectedFragmentTable {
    fn new() -> Self {
        Self { nonce: fresh_nonce(), entries: vec![] }
    }

    /// The per-call part every sentinel in this table carries.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sentinel: &str) -> Option<&str> {
        self.entries.iter().find(|(s, _)| s == sentinel).map(|(_, f)| f.as_str())
    }

    pub fn sentinels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    /// Put every fragment back. Later claims may enclose earlier sentinels,
    /// so entries are restored newest first. Loops in the template may have
    /// repeated a sentinel; every copy is restored.
    pub fn restore(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (sentinel, fragment) in self.entries.iter().rev() {
            result = result.replace(sentinel.as_str(), fragment);
        }
        result
    }
}

/// Replace every fragment with a sentinel. Source text that already contains
/// sentinel-shaped text is rejected, since restoring it would corrupt output.
pub fn protect(source: &str) -> Result<(String, ProtectedFragmentTable)> {
    if let Some(found) = SENTINEL_RE.find(source) {
        return Err(AtobusuError::template("Sentinel collision in template source")
            .with_details(format!("'{}' at byte {}", found.as_str(), found.start())));
    }

    let mut table = ProtectedFragmentTable::new();
    let mut protected = source.to_string();
    for family in FragmentFamily::ALL {
        let mut index = 0usize;
        let replaced = family.pattern().replace_all(&protected, |caps: &regex::Captures<'_>| {
            let sentinel = family.sentinel(&table.nonce, index);
            index += 1;
            table.entries.push((sentinel.clone(), caps[0].to_string()));
            sentinel
        });
        protected = replaced.into_owned();
    }
    if !table.is_empty() {
        debug!(fragments = table.len(), "Protected PHP fragments");
    }
    Ok((protected, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_then_restore_is_identity() {
        let sources = [
            "",
            "<p>plain</p>",
            "<?php echo 1; ?>",
            "a <?= $x ?> b <?php\nif ($y) {\n  echo 2;\n}\n?> c <?x?>",
            "<? echo 'short'; ?><?PHP echo 'upper'; ?>",
            "<?x <?php a ?> ?>",
        ];
        for source in sources {
            let (protected, table) = protect(source).unwrap();
            assert_eq!(table.restore(&protected), source, "source: {:?}", source);
        }
    }

    #[test]
    fn test_families_claim_in_priority_order() {
        let (protected, table) = protect("<?php a(); ?>|<?= b ?>|<?c?>").unwrap();
        let n = table.nonce();
        assert_eq!(protected, format!("__PHP_TAGS_{n}_0__|__PHP_ECHO_{n}_0__|__PHP_SHORT_{n}_0__"));
        assert_eq!(table.get(&format!("__PHP_TAGS_{n}_0__")), Some("<?php a(); ?>"));
        assert_eq!(table.get(&format!("__PHP_ECHO_{n}_0__")), Some("<?= b ?>"));
        assert_eq!(table.get(&format!("__PHP_SHORT_{n}_0__")), Some("<?c?>"));
    }

    #[test]
    fn test_sentinels_hide_engine_syntax() {
        let (protected, table) = protect("{{ a }}<?php echo \"{{ b }}\"; ?>").unwrap();
        assert_eq!(protected, format!("{{{{ a }}}}__PHP_TAGS_{}_0__", table.nonce()));
        assert_eq!(table.len(), 1);
        for sentinel in table.sentinels() {
            assert!(!sentinel.contains('{') && !sentinel.contains('%') && !sentinel.contains('#'));
            assert!(SENTINEL_RE.is_match(sentinel));
        }
    }

    #[test]
    fn test_indices_are_per_family() {
        let (protected, table) = protect("<?= a ?><?= b ?><?php c ?>").unwrap();
        let n = table.nonce();
        assert_eq!(protected, format!("__PHP_ECHO_{n}_0____PHP_ECHO_{n}_1____PHP_TAGS_{n}_0__"));
    }

    #[test]
    fn test_nonce_differs_per_call() {
        let (_, first) = protect("<?= a ?>").unwrap();
        let (_, second) = protect("<?= a ?>").unwrap();
        assert_eq!(first.nonce().len(), NONCE_LEN);
        assert_ne!(first.nonce(), second.nonce());
    }

    #[test]
    fn test_collision_is_fatal() {
        for source in ["literal __PHP_TAGS_0__ text", "__PHP_ECHO_abc123_4__ <?= $x ?>"] {
            let err = protect(source).unwrap_err();
            assert!(matches!(err, AtobusuError::Template { .. }), "source: {:?}", source);
        }
    }

    #[test]
    fn test_unsalted_token_in_data_is_left_alone() {
        let (protected, table) = protect("<?php secret(); ?><p>{{ note }}</p>").unwrap();
        let expanded = protected.replace("{{ note }}", "__PHP_TAGS_0__");
        assert_eq!(table.restore(&expanded), "<?php secret(); ?><p>__PHP_TAGS_0__</p>");
    }

    #[test]
    fn test_repeated_sentinels_all_restored() {
        let (protected, table) = protect("{% for i in xs %}<?= $i ?>{% endfor %}").unwrap();
        let sentinel = format!("__PHP_ECHO_{}_0__", table.nonce());
        assert!(protected.contains(&sentinel));
        assert_eq!(table.restore(&sentinel.repeat(3)), "<?= $i ?>".repeat(3));
    }

    #[test]
    fn test_contains_foreign_syntax() {
        assert!(contains_foreign_syntax("x <?= y ?>"));
        assert!(contains_foreign_syntax("<?php\n?>"));
        assert!(!contains_foreign_syntax("<p>{{ x }}</p>"));
        assert!(!contains_foreign_syntax("<? never closed"));
    }
}
