//! Output writer for generated documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::converter::Encoding;
use crate::error::{AtobusuError, Result};
use crate::templates::TemplateKind;

const BACKUP_SUFFIX: &str = ".bak";

fn accepted_extensions(kind: TemplateKind) -> &'static [&'static str] {
    match kind {
        TemplateKind::Php => &["php"],
        TemplateKind::Mixed => &["html", "htm", "php"],
        TemplateKind::Html | TemplateKind::Unknown => &["html", "htm"],
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatStats {
    pub count: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteStats {
    pub files_written: usize,
    pub total_bytes: usize,
    pub by_format: BTreeMap<String, FormatStats>,
    pub last_write: Option<DateTime<Utc>>,
}

pub struct OutputWriter {
    output_dir: PathBuf,
    encoding: Encoding,
    backup_existing: bool,
    stats: WriteStats,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            encoding: Encoding::Utf8,
            backup_existing: false,
            stats: WriteStats::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_backup(mut self, backup_existing: bool) -> Self {
        self.backup_existing = backup_existing;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// `<stem>.<ext>` for the kind, relative to the output directory.
    pub fn default_output_path(stem: &str, kind: TemplateKind) -> PathBuf {
        PathBuf::from(format!("{}.{}", stem, kind.extension()))
    }

    /// Write `content` and return the final path. The extension is
    /// corrected for `kind`; relative paths land under the output directory.
    pub fn write_document(&mut self, content: &str, path: &Path, kind: TemplateKind) -> Result<PathBuf> {
        let target = self.resolve(&ensure_extension(path, kind));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AtobusuError::output(format!("Cannot create directory {}", parent.display())).with_details(e)
            })?;
        }
        if self.backup_existing && target.is_file() {
            self.backup(&target)?;
        }

        if !self.encoding.can_encode(content) {
            warn!(
                path = %target.display(),
                encoding = %self.encoding,
                "Content has characters the output encoding cannot represent; they are replaced"
            );
        }
        let bytes = self.encoding.encode_lossy(content);
        fs::write(&target, &bytes).map_err(|e| {
            AtobusuError::output(format!("Failed to write file: {}", target.display())).with_details(e)
        })?;

        self.record_write(kind, bytes.len());
        info!(path = %target.display(), bytes = bytes.len(), "Output file written");
        Ok(target)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }

    fn backup(&self, target: &Path) -> Result<PathBuf> {
        let mut backup = target.as_os_str().to_owned();
        backup.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(backup);
        fs::copy(target, &backup).map_err(|e| {
            AtobusuError::output(format!("Failed to create backup for {}", target.display())).with_details(e)
        })?;
        debug!(backup = %backup.display(), "Backup created");
        Ok(backup)
    }

    fn record_write(&mut self, kind: TemplateKind, bytes: usize) {
        let label = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        self.stats.files_written += 1;
        self.stats.total_bytes += bytes;
        self.stats.last_write = Some(Utc::now());
        let entry = self.stats.by_format.entry(label).or_default();
        entry.count += 1;
        entry.bytes += bytes;
    }
}

fn ensure_extension(path: &Path, kind: TemplateKind) -> PathBuf {
    let accepted = accepted_extensions(kind);
    let current = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if accepted.contains(&current.as_str()) {
        path.to_path_buf()
    } else {
        path.with_extension(accepted[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_fixes_extension_and_tracks_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path());
        let written = writer
            .write_document("<?php echo 1; ?>", Path::new("pages/review.html"), TemplateKind::Php)
            .unwrap();
        assert_eq!(written, dir.path().join("pages/review.php"));
        assert_eq!(fs::read_to_string(&written).unwrap(), "<?php echo 1; ?>");

        writer.write_document("<p>x</p>", Path::new("index"), TemplateKind::Html).unwrap();
        let stats = writer.stats();
        assert_eq!(stats.files_written, 2);
        assert_eq!(stats.total_bytes, 16 + 8);
        assert_eq!(stats.by_format.get("php"), Some(&FormatStats { count: 1, bytes: 16 }));
        assert!(stats.last_write.is_some());
    }

    #[test]
    fn test_mixed_keeps_php_or_html_extension() {
        assert_eq!(ensure_extension(Path::new("a.php"), TemplateKind::Mixed), PathBuf::from("a.php"));
        assert_eq!(ensure_extension(Path::new("a.HTM"), TemplateKind::Mixed), PathBuf::from("a.HTM"));
        assert_eq!(ensure_extension(Path::new("a.txt"), TemplateKind::Mixed), PathBuf::from("a.html"));
    }

    #[test]
    fn test_backup_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path()).with_backup(true);
        writer.write_document("old", Path::new("page.html"), TemplateKind::Html).unwrap();
        writer.write_document("new", Path::new("page.html"), TemplateKind::Html).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("page.html")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("page.html.bak")).unwrap(), "old");
    }

    #[test]
    fn test_lossy_output_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path()).with_encoding(Encoding::Ascii);
        let path = writer.write_document("café", Path::new("a.html"), TemplateKind::Html).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"caf?");
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(OutputWriter::default_output_path("review", TemplateKind::Mixed), PathBuf::from("review.html"));
        assert_eq!(OutputWriter::default_output_path("review", TemplateKind::Php), PathBuf::from("review.php"));
    }
}
