//! CLI binary for pdfstamp.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `WatermarkConfig` / `WatermarkOptions` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdfstamp::config::{DEFAULT_FONT_PATH, DEFAULT_MAX_FILE_SIZE, DEFAULT_UPLOAD_DIR};
use pdfstamp::{
    apply_stream, apply_watermark, display_name, inspect, preview_stream, preview_watermark,
    summarize, ProgressEvent, ProgressHandle, ProgressSink, UploadStore, WatermarkConfig,
    WatermarkOptions, WatermarkSpec,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress sink using indicatif ────────────────────────────────────────

/// Renders a run's events as a live progress bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    /// Spinner until `start` tells us the page count.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Stamping");
        self.bar.set_message("");
    }
}

impl ProgressSink for CliProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Start { total_pages } => {
                self.activate_bar(total_pages);
                self.bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!("Watermarking {total_pages} pages…"))
                ));
            }
            ProgressEvent::Progress {
                current_page,
                percent,
                ..
            } => {
                self.bar.set_position(current_page as u64);
                self.bar.set_message(format!("{percent:>3}%"));
            }
            ProgressEvent::Saving => {
                self.bar.set_prefix("Saving");
                self.bar.set_message("writing PDF…");
            }
            ProgressEvent::Complete { output_id } => {
                self.bar.finish_and_clear();
                match output_id {
                    Some(id) => eprintln!("{} Stored as {}", green("✔"), bold(&id)),
                    None => eprintln!("{} Done", green("✔")),
                }
            }
            ProgressEvent::Error { message } => {
                self.bar.abandon();
                eprintln!("{} {}", red("✘"), red(&message));
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Copy a PDF into the upload directory
  pdfstamp upload ~/Documents/report.pdf

  # Stamp every page and store the result
  pdfstamp apply report.pdf --text CONFIDENTIAL --position diagonal

  # Preview the first pages into a file (nothing is stored)
  pdfstamp preview report.pdf -o /tmp/preview.pdf --position tile --opacity 20

  # Print the raw event stream (one `data: <json>` frame per event)
  pdfstamp stream report.pdf --preview

  # Stored files, newest first
  pdfstamp list

POSITIONS:
  center     one copy in the middle of the page (default)
  diagonal   one copy along the bottom-left to top-right diagonal
  tile       a staggered grid covering the page
  Any other value is treated as diagonal.

ENVIRONMENT VARIABLES:
  UPLOAD_DIR      Directory holding uploads and outputs (default: public/uploads)
  PDFSTAMP_FONT   TrueType font to embed (default: fonts/watermark.ttf);
                  Helvetica is used when it is missing or unreadable
  MAX_FILE_SIZE   Upload size limit in bytes (default: 52428800)
  RUST_LOG        Log filter, e.g. pdfstamp=debug
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pdfstamp",
    version,
    about = "Stamp text watermarks onto PDF pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, env = "UPLOAD_DIR", default_value = DEFAULT_UPLOAD_DIR)]
    upload_dir: PathBuf,

    #[arg(long, global = true, env = "PDFSTAMP_FONT", default_value = DEFAULT_FONT_PATH)]
    font: PathBuf,

    /// Always draw with Helvetica.
    #[arg(long, global = true)]
    no_font: bool,

    #[arg(long, global = true, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    #[arg(long, global = true, env = "PDFSTAMP_PREVIEW_PAGES", default_value_t = 5)]
    preview_pages: usize,

    #[arg(long, global = true, env = "PDFSTAMP_JSON")]
    json: bool,

    #[arg(long, global = true, env = "PDFSTAMP_NO_PROGRESS")]
    no_progress: bool,

    #[arg(short, long, global = true, env = "PDFSTAMP_VERBOSE")]
    verbose: bool,

    #[arg(short, long, global = true, env = "PDFSTAMP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a local PDF into the upload directory.
    Upload { file: PathBuf },
    /// List stored PDFs, newest first.
    List,
    /// Delete a stored file.
    Delete { name: String },
    /// Show page count, page sizes and PDF version.
    Inspect {
        /// A stored file name, or a path to a local PDF.
        target: String,
    },
    /// Watermark every page of a stored file and store the result.
    Apply {
        name: String,
        #[command(flatten)]
        mark: MarkArgs,
    },
    /// Watermark the first pages of a stored file into a local PDF.
    Preview {
        name: String,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        mark: MarkArgs,
    },
    /// Print the framed event stream of a run to stdout.
    Stream {
        name: String,
        /// Preview run: stream the stamped bytes back instead of storing them.
        #[arg(long)]
        preview: bool,
        #[command(flatten)]
        mark: MarkArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct MarkArgs {
    #[arg(short, long, default_value = "WATERMARK")]
    text: String,

    /// Points, truncated to a whole number (0 means the default).
    #[arg(long, default_value_t = 20.0)]
    font_size: f64,

    /// `#RRGGBB`.
    #[arg(long, default_value = "#8B4513")]
    color: String,

    /// Percent, 1–100 (0 means the default).
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(0..=100))]
    opacity: u32,

    #[arg(short, long, default_value = "center")]
    position: String,
}

impl MarkArgs {
    fn into_spec(self) -> Result<WatermarkSpec> {
        WatermarkOptions {
            text: self.text,
            font_size: self.font_size,
            font_color: self.color,
            opacity: self.opacity,
            position: self.position,
        }
        .into_spec()
        .context("Invalid watermark options")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Keep library INFO logs out of the way while the progress bar is drawn.
    let runs_pipeline = matches!(
        cli.command,
        Command::Apply { .. } | Command::Preview { .. }
    );
    let show_progress = runs_pipeline && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let store = UploadStore::from_config(&config);
    let progress: ProgressHandle = if show_progress {
        CliProgress::new() as ProgressHandle
    } else {
        pdfstamp::progress::discard()
    };

    match cli.command {
        Command::Upload { ref file } => {
            let stored = store
                .import(file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            if cli.json {
                print_json(&stored)?;
            } else if !cli.quiet {
                eprintln!(
                    "{} Uploaded as {}  {}",
                    green("✔"),
                    bold(&stored.name),
                    dim(&format!("{} bytes", stored.size))
                );
            }
        }

        Command::List => {
            let files = store.list().await.context("Failed to list files")?;
            if cli.json {
                print_json(&files)?;
            } else if files.is_empty() {
                eprintln!("{}", dim(&format!("No PDFs in {}", store.root().display())));
            } else {
                for f in files {
                    let marker = if f.is_watermarked { cyan("WM") } else { "  ".to_string() };
                    println!(
                        "{marker}  {:<48}  {:>10}  {}",
                        f.name,
                        f.size,
                        dim(&display_name(&f.name))
                    );
                }
            }
        }

        Command::Delete { ref name } => {
            store
                .delete(name)
                .await
                .with_context(|| format!("Failed to delete '{name}'"))?;
            if !cli.quiet {
                eprintln!("{} Deleted {}", green("✔"), bold(name));
            }
        }

        Command::Inspect { ref target } => {
            let bytes = read_target(&store, target).await?;
            let info = inspect(bytes).await.context("Failed to inspect PDF")?;
            if cli.json {
                print_json(&info)?;
            } else {
                println!("File:         {target}");
                println!("Pages:        {}", info.page_count);
                println!("PDF Version:  {}", info.pdf_version);
                for (i, page) in info.pages.iter().enumerate() {
                    println!("  page {:>4}:  {:.1} × {:.1} pt", i + 1, page.width, page.height);
                }
            }
        }

        Command::Apply { ref name, ref mark } => {
            let spec = mark.clone().into_spec()?;
            let result = apply_watermark(&store, name, &spec, &config, progress).await;
            if cli.json {
                print_json(&summarize(&result))?;
            }
            let output = result.context("Watermarking failed")?;
            if !cli.quiet && !show_progress && !cli.json {
                if let Some(ref id) = output.output_id {
                    eprintln!(
                        "Watermarked {}/{} pages  →  {}  {}",
                        output.pages_processed,
                        output.total_pages,
                        id,
                        dim(&format!("({})", display_name(id)))
                    );
                }
            }
        }

        Command::Preview {
            ref name,
            ref output,
            ref mark,
        } => {
            let spec = mark.clone().into_spec()?;
            let preview = preview_watermark(&store, name, &spec, &config, progress)
                .await
                .context("Preview failed")?;
            write_file(output, &preview.bytes).await?;
            if !cli.quiet {
                eprintln!(
                    "{} Preview of {}/{} pages  →  {}",
                    green("✔"),
                    preview.pages_processed,
                    preview.total_pages,
                    bold(&output.display().to_string())
                );
            }
        }

        Command::Stream {
            ref name,
            preview,
            ref mark,
        } => {
            let spec = mark.clone().into_spec()?;
            let mut frames = if preview {
                preview_stream(store.clone(), name.clone(), spec, config.clone())
            } else {
                apply_stream(store.clone(), name.clone(), spec, config.clone())
            };
            let stdout = io::stdout();
            while let Some(frame) = frames.next().await {
                let mut handle = stdout.lock();
                handle
                    .write_all(frame.as_bytes())
                    .and_then(|_| handle.flush())
                    .context("Failed to write to stdout")?;
            }
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<WatermarkConfig> {
    let mut builder = WatermarkConfig::builder()
        .upload_dir(&cli.upload_dir)
        .preview_page_limit(cli.preview_pages)
        .max_file_size(cli.max_file_size);
    builder = if cli.no_font {
        builder.no_embedded_font()
    } else {
        builder.font_path(&cli.font)
    };
    builder.build().context("Invalid configuration")
}

/// A stored name, or failing that a readable local path.
async fn read_target(store: &UploadStore, target: &str) -> Result<Vec<u8>> {
    match store.read(target).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.is_not_found() && Path::new(target).is_file() => tokio::fs::read(target)
            .await
            .with_context(|| format!("Failed to read {target}")),
        Err(e) => Err(e).with_context(|| format!("Failed to read '{target}'")),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
