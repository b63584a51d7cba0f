//! PDF Redaction CLI Application.
//!
//! Command-line front end for the pdf_redactor library: full redaction runs,
//! sampled previews, text extraction and template listing.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use pdf_redactor::{
    CancellationToken, DirectoryDocumentStore, DocumentStore, ProcessingProgress,
    RedactionOutcome, RedactionService, RedactorConfig, RunStatus,
};

/// PDF Redaction Tool
///
/// Detects sensitive information in PDF documents and covers it with opaque boxes.
#[derive(Parser)]
#[command(name = "pdf-redactor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Template file (JSON array) replacing the built-in templates
    #[arg(long, global = true, value_name = "FILE")]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Redact a PDF document
    Redact {
        /// Input PDF file path
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output PDF file path
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Template id (defaults to "default")
        #[arg(short, long, value_name = "ID")]
        template: Option<String>,

        /// Write the redaction report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// Entity detection endpoint
        #[arg(long, value_name = "URL", conflicts_with = "patterns_only")]
        detector_url: Option<String>,

        /// Use the built-in pattern rules only
        #[arg(long)]
        patterns_only: bool,

        /// Document store directory
        #[arg(long, value_name = "DIR", requires = "document_id")]
        store: Option<PathBuf>,

        /// Document id used in the store
        #[arg(long, value_name = "ID", requires = "store")]
        document_id: Option<String>,
    },

    /// Estimate the number of entities from sampled pages
    Preview {
        /// Input PDF file path
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Template id (defaults to "default")
        #[arg(short, long, value_name = "ID")]
        template: Option<String>,
    },

    /// Extract text from a PDF (for debugging and verification)
    Extract {
        /// Input PDF file path
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output text file (optional, defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Extract one page (1-based) in reading order
        #[arg(short, long, value_name = "N")]
        page: Option<usize>,
    },

    /// List available templates
    Templates,
}

/// Options of the redact subcommand.
struct RedactArgs<'a> {
    input: &'a Path,
    output: &'a Path,
    template: Option<&'a str>,
    report: Option<&'a Path>,
    store: Option<(&'a Path, &'a str)>,
}

/// Command handler owning the configured service.
struct RedactionHandler {
    service: RedactionService,
    verbose: bool,
}

impl RedactionHandler {
    fn new(config: &RedactorConfig, verbose: bool) -> Result<Self> {
        let service =
            RedactionService::from_config(config).context("Failed to set up redaction service")?;
        Ok(Self { service, verbose })
    }

    /// Executes a redaction run.
    fn redact(&self, args: RedactArgs<'_>) -> Result<()> {
        if !args.input.exists() {
            anyhow::bail!("Input file does not exist: {}", args.input.display());
        }

        if self.verbose {
            eprintln!("Input:    {}", args.input.display());
            eprintln!("Output:   {}", args.output.display());
            eprintln!("Template: {}", args.template.unwrap_or("default"));
        }

        let verbose = self.verbose;
        let observer = move |p: &ProcessingProgress| {
            if verbose {
                eprintln!("{}", progress_line(p));
            }
        };

        let outcome = self
            .service
            .redact_file(
                args.input,
                args.output,
                args.template,
                &observer,
                &CancellationToken::new(),
            )
            .with_context(|| "Redaction failed")?;

        if let RunStatus::ErrorStub { message } = &outcome.status {
            anyhow::bail!(
                "Redaction failed ({}); error document written to {}",
                message,
                args.output.display()
            );
        }

        persist_outcome(&outcome, args.report, args.store)?;

        if self.verbose {
            println!("\nRedaction Summary:");
            println!("  Entities found:    {}", outcome.report.total_entities);
            println!("  Entities resolved: {}", outcome.report.resolved_count());
            for (entity_type, count) in &outcome.report.entities_by_type {
                println!("  {:<18} {}", format!("{}:", entity_type), count);
            }
        }

        match &outcome.status {
            RunStatus::Redacted => println!(
                "✓ Successfully redacted {} entit(ies) → {}",
                outcome.report.total_entities,
                args.output.display()
            ),
            RunStatus::NoEntities => println!(
                "⚠ No sensitive information found; analyzed copy → {}",
                args.output.display()
            ),
            RunStatus::EmptyDocument => println!(
                "⚠ Document has no pages; labeled copy → {}",
                args.output.display()
            ),
            RunStatus::ErrorStub { .. } => {}
        }

        Ok(())
    }

    /// Prints the sampled entity estimate.
    fn preview(&self, input: &Path, template: Option<&str>) -> Result<()> {
        let bytes = std::fs::read(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let preview = self
            .service
            .preview(&bytes, template, &CancellationToken::new())
            .with_context(|| "Preview failed")?;

        let sampled: Vec<String> = preview
            .sample_pages
            .iter()
            .map(|p| (p + 1).to_string())
            .collect();
        println!(
            "Estimated entities: {} ({} page(s), sampled {})",
            preview.total_entities_estimate,
            preview.page_count,
            sampled.join(", ")
        );
        for entity in &preview.preview_entities {
            println!(
                "  page {:>3}  {:<16} {}",
                entity.page + 1,
                entity.entity_type,
                entity.text
            );
        }
        Ok(())
    }

    /// Extracts text from a PDF.
    fn extract(&self, input: &Path, output: Option<&Path>, page: Option<usize>) -> Result<()> {
        if !input.exists() {
            anyhow::bail!("Input file does not exist: {}", input.display());
        }

        let text = match page {
            Some(0) => anyhow::bail!("Pages are numbered from 1"),
            Some(number) => {
                let bytes = std::fs::read(input)
                    .with_context(|| format!("Failed to read {}", input.display()))?;
                self.service
                    .extract_page(&bytes, number - 1)
                    .with_context(|| format!("Text extraction failed for page {}", number))?
                    .text
            }
            None => self
                .service
                .extract_text(input)
                .with_context(|| "Text extraction failed")?,
        };

        if let Some(output_path) = output {
            std::fs::write(output_path, &text)
                .with_context(|| format!("Failed to write to {}", output_path.display()))?;
            println!(
                "✓ Extracted {} characters → {}",
                text.len(),
                output_path.display()
            );
        } else {
            println!("{}", text);
        }

        Ok(())
    }

    fn templates(&self) {
        for template in self.service.templates().list() {
            let types: Vec<&str> = template
                .categories
                .iter()
                .map(|c| c.category_type.as_str())
                .collect();
            println!("{:<16} {} [{}]", template.id, template.name, types.join(", "));
        }
    }
}

/// Writes the report file and stores the result of a completed run.
///
/// Error-stub outcomes are refused so the store only ever holds real
/// redactions.
fn persist_outcome(
    outcome: &RedactionOutcome,
    report: Option<&Path>,
    store: Option<(&Path, &str)>,
) -> Result<()> {
    if let RunStatus::ErrorStub { message } = &outcome.status {
        anyhow::bail!("Refusing to persist failed run: {}", message);
    }

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&outcome.report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if let Some((dir, id)) = store {
        let record = DirectoryDocumentStore::new(dir)
            .save_redaction(id, &outcome.document, &outcome.report)
            .with_context(|| format!("Failed to store document '{}'", id))?;
        tracing::info!(id, url = %record.redacted_url, "stored redaction");
    }

    Ok(())
}

/// One human-readable progress line.
fn progress_line(progress: &ProcessingProgress) -> String {
    let mut line = format!("[{:>10}] {:>3}%", progress.stage, progress.progress);
    if let (Some(page), Some(total)) = (progress.page, progress.total_pages) {
        line.push_str(&format!(" page {}/{}", page, total));
    }
    if let Some(chunk) = progress.chunk {
        line.push_str(&format!(" chunk {}/{}", chunk.index + 1, chunk.count));
    }
    if let Some(found) = progress.entities_found {
        line.push_str(&format!(" entities {}", found));
    }
    line
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Loads the configuration and applies command-line overrides.
fn build_config(cli: &Cli) -> Result<RedactorConfig> {
    let mut config = RedactorConfig::resolve(cli.config.as_deref())
        .with_context(|| "Failed to load configuration")?;

    if let Some(path) = &cli.templates {
        config.templates_path = Some(path.clone());
    }
    if let Commands::Redact {
        detector_url,
        patterns_only,
        ..
    } = &cli.command
    {
        if *patterns_only {
            config.detector.endpoint = None;
        } else if let Some(url) = detector_url {
            config.detector.endpoint = Some(url.clone());
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;
    let handler = RedactionHandler::new(&config, cli.verbose)?;

    match &cli.command {
        Commands::Redact {
            input,
            output,
            template,
            report,
            store,
            document_id,
            ..
        } => {
            let store = store.as_deref().zip(document_id.as_deref());
            handler.redact(RedactArgs {
                input,
                output,
                template: template.as_deref(),
                report: report.as_deref(),
                store,
            })?;
        }
        Commands::Preview { input, template } => {
            handler.preview(input, template.as_deref())?;
        }
        Commands::Extract {
            input,
            output,
            page,
        } => {
            handler.extract(input, output.as_deref(), *page)?;
        }
        Commands::Templates => handler.templates(),
    }

    Ok(())
}
