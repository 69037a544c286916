//! Atobusu Core - review page generator
//!
//! Input record -> character conversion -> placeholder substitution ->
//! template expansion, with PHP fragments carried through byte-for-byte.
//!
//! # Pass order (fixed)
//! 1. Encoding normalization, quotes, circled numbers, special symbols
//! 2. Product code keywords, date sentinels, embedded call arguments,
//!    `{{name}}`, `${name}`
//! 3. Protect PHP, expand, restore

pub mod error;
pub mod converter;
pub mod context;
pub mod placeholders;
pub mod fragments;
pub mod templates;
pub mod renderer;
pub mod validation;
pub mod hashing;
pub mod record;
pub mod pipeline;
pub mod output;
pub mod config;
pub mod logging;

pub use error::{AtobusuError, Result};
pub use converter::{CharacterConverter, ConversionRuleSet, ConversionStats, Encoding, RuleCategory};
pub use context::PlaceholderContext;
pub use placeholders::{PlaceholderProcessor, PlaceholderStats};
pub use fragments::{protect, ProtectedFragmentTable};
pub use templates::{FileSystemTemplateSource, InMemoryTemplateSource, SourceText, TemplateKind, TemplateSource};
pub use renderer::{CacheStats, CompiledTemplate, OutputFormat, TemplateRenderer};
pub use validation::{TemplateValidation, ValidationRule, ValidationViolation, ViolationSeverity};
pub use hashing::{output_digest, source_version};
pub use record::{InputDocument, ReviewRecord, SourceType, TemplateType};
pub use pipeline::{DocumentPipeline, GenerateRequest, GeneratedDocument, PreparedRecord};
pub use output::{OutputWriter, WriteStats};
pub use config::AtobusuConfig;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
