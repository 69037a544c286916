//! Template Sources
//!
//! Where template text comes from. The renderer asks a source for the raw
//! text and a version token; it never touches the filesystem itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use walkdir::WalkDir;

use crate::converter::Encoding;
use crate::error::{AtobusuError, Result};
use crate::fragments::contains_foreign_syntax;
use crate::hashing::source_version;

/// Raw template text plus a stable identity for that text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    pub text: String,
    pub version: String,
}

impl SourceText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let version = source_version(&text);
        Self { text, version }
    }
}

/// Html, Php or Mixed, decided by the presence of PHP fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Html,
    Php,
    Mixed,
    Unknown,
}

impl TemplateKind {
    pub fn detect(name: &str, text: &str) -> Self {
        if contains_foreign_syntax(text) {
            if name.to_ascii_lowercase().ends_with(".php") {
                TemplateKind::Php
            } else {
                TemplateKind::Mixed
            }
        } else {
            TemplateKind::Html
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TemplateKind::Php => "php",
            _ => "html",
        }
    }
}

pub trait TemplateSource: Send + Sync {
    fn load(&self, name: &str) -> Result<SourceText>;

    /// Sorted template names.
    fn list(&self) -> Vec<String>;

    fn exists(&self, name: &str) -> bool {
        self.load(name).is_ok()
    }

    /// Human readable location, used in cache stats.
    fn describe(&self) -> String;
}

/// Templates under one directory, named by relative path.
pub struct FileSystemTemplateSource {
    root: PathBuf,
    encoding: Encoding,
}

impl FileSystemTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), encoding: Encoding::Utf8 }
    }

    /// Decode template files with `encoding` instead of UTF-8.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(AtobusuError::input(format!("Invalid template name: {}", name)));
        }
        Ok(self.root.join(relative))
    }
}

impl TemplateSource for FileSystemTemplateSource {
    fn load(&self, name: &str) -> Result<SourceText> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(AtobusuError::template(format!("Template not found: {}", name)));
        }
        let bytes = fs::read(&path).map_err(|e| {
            AtobusuError::template(format!("Failed to load template '{}'", name)).with_details(e)
        })?;
        Ok(SourceText::new(self.encoding.decode_lossy(&bytes)))
    }

    /// Regular files under the root. Symlinks are not followed.
    fn list(&self) -> Vec<String> {
        let mut names = vec![];
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Template walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                names.push(template_name(relative));
            }
        }
        names.sort();
        names
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Relative path joined with `/` on every platform.
fn template_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Templates held in memory. Entries can be replaced while a renderer is
/// using the source.
#[derive(Default)]
pub struct InMemoryTemplateSource {
    templates: Mutex<BTreeMap<String, String>>,
}

impl InMemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&self, name: &str, text: &str) {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), text.to_string());
    }
}

impl TemplateSource for InMemoryTemplateSource {
    fn load(&self, name: &str) -> Result<SourceText> {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|text| SourceText::new(text.as_str()))
            .ok_or_else(|| AtobusuError::template(format!("Template not found: {}", name)))
    }

    fn list(&self) -> Vec<String> {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
