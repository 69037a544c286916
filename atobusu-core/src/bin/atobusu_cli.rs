//! Atobusu CLI
//!
//! Commands: generate, templates, validate, stats
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure, 1 on any other error

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

use atobusu_core::{
    logging::init_tracing, AtobusuConfig, AtobusuError, CharacterConverter, DocumentPipeline,
    FileSystemTemplateSource, GenerateRequest, InputDocument, OutputFormat, OutputWriter,
    TemplateRenderer,
};

#[derive(Parser)]
#[command(name = "atobusu-cli")]
#[command(about = "Atobusu - review page generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to templates directory (overrides the configuration)
    #[arg(short, long)]
    templates_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a document from an input file
    Generate {
        /// JSON or YAML input file
        #[arg(short, long)]
        input: PathBuf,

        /// Template name; the default for the record type otherwise
        #[arg(short, long)]
        template: Option<String>,

        /// Output file; derived from the input name otherwise
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// auto, html, php or mixed
        #[arg(short, long, default_value = "auto")]
        format: String,
    },

    /// List available templates
    Templates,

    /// Validate a template
    Validate {
        /// Template name
        #[arg(short, long)]
        template: String,
    },

    /// Conversion and placeholder statistics for an input file
    Stats {
        /// JSON or YAML input file
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    init_tracing(&config.log_level);

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(kind = e.kind(), "{}", e);
            fail(&e)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AtobusuConfig, AtobusuError> {
    let mut config = match &cli.config {
        Some(path) => AtobusuConfig::load_from_file(path)?,
        None => AtobusuConfig::default(),
    };
    if let Some(dir) = &cli.templates_dir {
        config.template_directory = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_pipeline(config: &AtobusuConfig) -> Result<DocumentPipeline, AtobusuError> {
    let converter = CharacterConverter::new(config.character_conversion_rules.clone())?;
    let source = FileSystemTemplateSource::new(&config.template_directory)
        .with_encoding(config.template_encoding);
    let renderer = TemplateRenderer::new(Box::new(source));
    Ok(DocumentPipeline::new(converter, renderer).with_encoding(config.output_encoding))
}

fn run(command: Commands, config: &AtobusuConfig) -> Result<ExitCode, AtobusuError> {
    let pipeline = build_pipeline(config)?;

    match command {
        Commands::Generate { input, template, output, format } => {
            let format: OutputFormat = format.parse()?;
            let document = InputDocument::from_file(&input, config.template_encoding)?;
            let generated = pipeline.generate(&document, &GenerateRequest { template, format })?;

            let mut writer = OutputWriter::new(&config.output_directory)
                .with_encoding(config.output_encoding)
                .with_backup(config.backup_existing);
            let path = output.unwrap_or_else(|| {
                OutputWriter::default_output_path(&document.file_stem(), generated.template_kind)
            });
            let written = writer.write_document(&generated.content, &path, generated.template_kind)?;

            print_json(&json!({
                "success": true,
                "output_file": written.display().to_string(),
                "template": generated.template_name,
                "template_version": generated.template_version,
                "template_kind": generated.template_kind,
                "template_type": generated.template_type,
                "engine_version": generated.engine_version,
                "output_hash": generated.output_hash,
                "generated_at": generated.generated_at,
                "conversion_stats": generated.conversion_stats,
                "write_stats": writer.stats(),
            }));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Templates => {
            let renderer = pipeline.renderer();
            print_json(&json!({
                "templates": renderer.list_templates(),
                "cache": renderer.cache_stats(),
            }));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { template } => {
            let result = pipeline.renderer().validate_template(&template);
            print_json(&result);
            if result.valid {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2)) // Validation failure
            }
        }

        Commands::Stats { input } => {
            let document = InputDocument::from_file(&input, config.template_encoding)?;
            let content = document.content_text();
            let validation = pipeline.validate_input(&document);
            print_json(&json!({
                "input_file": input.display().to_string(),
                "valid": validation.valid,
                "violations": validation.violations,
                "conversion": pipeline.converter().conversion_stats(&content),
                "placeholders": pipeline.renderer().processor().stats(&content),
            }));
            if validation.valid {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!(r#"{{"error": "Failed to serialize output: {}"}}"#, e),
    }
}

fn fail(error: &AtobusuError) -> ExitCode {
    let output = json!({
        "success": false,
        "kind": error.kind(),
        "error": error.to_string(),
    });
    println!("{}", output);
    ExitCode::FAILURE
}
