//! CLI binary for registratura.
//!
//! A thin shim over the library crate: each subcommand maps its flags to
//! library calls and prints the result.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use registratura::pipeline::input::read_local;
use registratura::{
    build_tracking_url, convert_to_pdf, merge_pdfs, AdminGrant, AllocateOptions, Allocator,
    DocumentProcessor, JsonFileCounterStore, LocalBlobStore, PdfStamper, PipelineConfig,
    PlacementOptions, ProcessOptions, ProcessingProgressCallback, ProgressCallback, StampConfig,
    StampPosition, StampRenderer, StampStyle,
};
use std::io;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the attachments of a batch and a
/// log line per attachment.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Loading");
        bar.set_message("reading attachments…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} attachments…"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total: usize, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_file_converted(&self, index: usize, total: usize, name: &str, pages: u32) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{pages} pages")),
        ));
        self.bar.inc(1);
    }

    fn on_file_skipped(&self, index: usize, total: usize, name: &str, reason: &str) {
        let reason = match reason.char_indices().nth(80) {
            Some((cut, _)) => format!("{}\u{2026}", &reason[..cut]),
            None => reason.to_string(),
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&reason),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, converted: usize, skipped: usize) {
        self.bar.finish_and_clear();
        if skipped == 0 {
            eprintln!(
                "{} {} attachments converted",
                green("✔"),
                bold(&converted.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} attachments converted  ({} skipped)",
                if converted == 0 { red("✘") } else { cyan("⚠") },
                bold(&converted.to_string()),
                converted + skipped,
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Issue the next registration number
  registratura allocate --counter counter.json

  # What would the next number be? (does not reserve it)
  registratura preview --counter counter.json --prefix DOC

  # Start 2026 at 1000 (the next number will be REG-2026-001001)
  registratura reset --counter counter.json --year 2026 --start 1000 --yes

  # Convert a scan to PDF
  registratura convert scan.jpg -o scan.pdf

  # Merge documents in order
  registratura merge cerere.pdf anexa1.pdf anexa2.pdf -o dosar.pdf

  # Stamp an existing PDF
  registratura stamp cerere.pdf --number REG-2025-000042 \
      --tracking-url https://registratura.example.ro/track/REG-2025-000042 -o out.pdf

  # Full pipeline: convert, merge, stamp and store a submission
  registratura process cerere.txt act.png https://x.ro/anexa.pdf \
      --number REG-2025-000042 --store-dir ./storage -o dosar.pdf --json

STAMP POSITIONS:
  top-left, top-right (default), bottom-left, bottom-right

ENVIRONMENT VARIABLES:
  REGISTRATURA_COUNTER        Counter file used by allocate/peek/preview/reset
  REGISTRATURA_PREFIX         Registration number prefix (default: REG)
  REGISTRATURA_ORGANIZATION   Organization printed on stamps (default: Primăria)
  REGISTRATURA_DEPARTMENT     Department printed on stamps
  REGISTRATURA_TRACKING_BASE  Base URL for QR tracking links ({base}/{number})
  REGISTRATURA_TIME_ZONE      Zone for stamp dates (default: Europe/Bucharest)
  REGISTRATURA_STORE_DIR      Directory for processed documents
  REGISTRATURA_PUBLIC_URL     Public base URL of the store directory
  RUST_LOG                    Override the log filter (e.g. registratura=debug)
"#;

/// Registration numbers, PDF conversion, merging and stamping.
#[derive(Parser, Debug)]
#[command(
    name = "registratura",
    version,
    about = "Registration numbers, PDF conversion, merging and stamping",
    long_about = "Issue year-scoped registration numbers and turn citizen submissions \
(PDFs, scans, photos, text files) into a single official PDF bearing a registration \
stamp with the organization, number, date, department and a tracking QR code.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "REGISTRATURA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "REGISTRATURA_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "REGISTRATURA_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate the next registration number.
    Allocate {
        #[command(flatten)]
        counter: CounterArgs,
        #[command(flatten)]
        number: NumberArgs,
        /// Year to allocate in (default: current year).
        #[arg(long)]
        year: Option<i32>,
    },

    /// Print the stored counter without changing it.
    Peek {
        #[command(flatten)]
        counter: CounterArgs,
        /// Output the record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the number the next allocation would return (not reserved).
    Preview {
        #[command(flatten)]
        counter: CounterArgs,
        #[command(flatten)]
        number: NumberArgs,
    },

    /// Overwrite the counter so the next number in YEAR is START + 1.
    Reset {
        #[command(flatten)]
        counter: CounterArgs,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        start: u32,
        /// Confirm the reset. Resetting below an issued number allows duplicates.
        #[arg(long)]
        yes: bool,
    },

    /// Convert one image, text file or PDF to PDF.
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Override the MIME type guessed from the extension.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Concatenate PDFs in order, skipping unreadable ones.
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render a registration stamp as PNG.
    Render {
        #[command(flatten)]
        stamp: StampArgs,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Stamp an existing PDF.
    Stamp {
        input: PathBuf,
        #[command(flatten)]
        stamp: StampArgs,
        #[command(flatten)]
        placement: PlacementArgs,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Draw a text watermark on a PDF.
    Watermark {
        input: PathBuf,
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = 12.0)]
        font_size: f32,
        #[command(flatten)]
        placement: PlacementArgs,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Convert, merge, stamp and optionally store a submission.
    Process {
        /// Local files or HTTP/HTTPS URLs, in document order.
        #[arg(required = true)]
        inputs: Vec<String>,
        #[command(flatten)]
        stamp: StampArgs,
        #[command(flatten)]
        placement: PlacementArgs,
        /// Write the stamped PDF here.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Store the result under this directory.
        #[arg(long, env = "REGISTRATURA_STORE_DIR")]
        store_dir: Option<PathBuf>,
        /// Public base URL serving the store directory.
        #[arg(long, env = "REGISTRATURA_PUBLIC_URL", requires = "store_dir")]
        public_url: Option<String>,
        /// File name of the stored document (default: the registration number).
        #[arg(long)]
        name: Option<String>,
        /// HTTP download timeout in seconds.
        #[arg(long, env = "REGISTRATURA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
        /// Output the processing result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct CounterArgs {
    /// JSON file holding the counter record.
    #[arg(long, env = "REGISTRATURA_COUNTER", default_value = "registratura_counter.json")]
    counter: PathBuf,

    /// Zone that decides the current year.
    #[arg(long, env = "REGISTRATURA_TIME_ZONE", default_value = "Europe/Bucharest", value_parser = parse_tz)]
    time_zone: Tz,
}

#[derive(Args, Debug)]
struct NumberArgs {
    #[arg(long, env = "REGISTRATURA_PREFIX")]
    prefix: Option<String>,
    /// Digits of zero padding (1–10).
    #[arg(long, env = "REGISTRATURA_PADDING")]
    padding: Option<u8>,
}

#[derive(Args, Debug)]
struct StampArgs {
    /// Registration number printed on the stamp.
    #[arg(long)]
    number: String,
    /// Received timestamp, RFC 3339 (default: now).
    #[arg(long, value_parser = parse_datetime)]
    received_at: Option<DateTime<Utc>>,
    #[arg(long, env = "REGISTRATURA_ORGANIZATION")]
    organization: Option<String>,
    #[arg(long, env = "REGISTRATURA_DEPARTMENT")]
    department: Option<String>,
    /// URL encoded in the QR code. Takes precedence over --tracking-base.
    #[arg(long)]
    tracking_url: Option<String>,
    /// Derive the QR URL as {base}/{number}.
    #[arg(long, env = "REGISTRATURA_TRACKING_BASE")]
    tracking_base: Option<String>,
    #[arg(long)]
    sender_name: Option<String>,
    #[arg(long)]
    sender_email: Option<String>,
    /// Smaller 200×120 stamp.
    #[arg(long)]
    compact: bool,
    #[arg(long, env = "REGISTRATURA_TIME_ZONE", default_value = "Europe/Bucharest", value_parser = parse_tz)]
    time_zone: Tz,
}

#[derive(Args, Debug)]
struct PlacementArgs {
    #[arg(long, default_value_t = StampPosition::TopRight)]
    position: StampPosition,
    /// Distance from the page edge in points.
    #[arg(long, default_value_t = 20.0)]
    margin: f32,
    /// 0.0–1.0.
    #[arg(long, default_value_t = 1.0)]
    opacity: f32,
    /// Points per stamp pixel.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,
    /// Stamp every page instead of only the first.
    #[arg(long)]
    all_pages: bool,
}

impl StampArgs {
    fn config(&self) -> StampConfig {
        let mut config = StampConfig::new(
            self.number.clone(),
            self.received_at.unwrap_or_else(Utc::now),
        )
        .sender(self.sender_name.clone(), self.sender_email.clone());
        if let Some(org) = &self.organization {
            config = config.organization(org.clone());
        }
        if let Some(dept) = &self.department {
            config = config.department(dept.clone());
        }
        let tracking = self.tracking_url.clone().or_else(|| {
            self.tracking_base
                .as_deref()
                .map(|base| build_tracking_url(&self.number, base))
        });
        if let Some(url) = tracking {
            config = config.tracking_url(url);
        }
        config
    }

    fn style(&self) -> StampStyle {
        if self.compact {
            StampStyle::compact()
        } else {
            StampStyle::default()
        }
    }

    fn renderer(&self) -> StampRenderer {
        StampRenderer::new(self.style()).with_time_zone(self.time_zone)
    }
}

impl PlacementArgs {
    fn options(&self) -> Result<PlacementOptions> {
        let opts = PlacementOptions {
            position: self.position,
            margin: self.margin,
            opacity: self.opacity,
            all_pages: self.all_pages,
            scale: self.scale,
        };
        opts.validate().map_err(|e| anyhow::anyhow!("invalid placement: {e}"))?;
        Ok(opts)
    }
}

fn parse_tz(s: &str) -> Result<Tz, String> {
    s.parse::<Tz>().map_err(|e| e.to_string())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 (e.g. 2025-03-14T09:30:00+02:00): {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while a progress bar is on screen.
    let json_output = matches!(cli.command, Command::Process { json: true, .. });
    let show_progress = matches!(cli.command, Command::Process { .. })
        && !cli.quiet
        && !cli.no_progress
        && !json_output;
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

    match cli.command {
        Command::Allocate {
            counter,
            number,
            year,
        } => {
            let allocator = allocator(&counter);
            let opts = AllocateOptions {
                padding: number.padding,
                prefix: number.prefix,
                year,
            };
            let issued = allocator
                .allocate(&opts)
                .await
                .context("Failed to allocate a registration number")?;
            println!("{issued}");
        }

        Command::Peek { counter, json } => {
            let record = allocator(&counter)
                .peek_current_counter()
                .await
                .context("Failed to read the counter")?;
            match (record, json) {
                (record, true) => println!(
                    "{}",
                    serde_json::to_string_pretty(&record).context("Failed to serialise counter")?
                ),
                (Some(r), false) => {
                    println!("Year:         {}", r.year);
                    println!("Last number:  {}", r.last_number);
                    println!("Updated at:   {}", r.updated_at.to_rfc3339());
                }
                (None, false) => println!("No number has been issued yet."),
            }
        }

        Command::Preview { counter, number } => {
            let opts = AllocateOptions {
                padding: number.padding,
                prefix: number.prefix,
                year: None,
            };
            let next = allocator(&counter)
                .preview_next(&opts)
                .await
                .context("Failed to preview the next number")?;
            println!("{next}");
            if !cli.quiet {
                eprintln!("{}", dim("preview only: the number is not reserved"));
            }
        }

        Command::Reset {
            counter,
            year,
            start,
            yes,
        } => {
            if !yes {
                anyhow::bail!(
                    "Refusing to reset the counter without --yes. \
                     Resetting below an issued number makes duplicates possible."
                );
            }
            let actor = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
            let record = allocator(&counter)
                .reset_counter(&AdminGrant::new(actor), year, start)
                .await
                .context("Failed to reset the counter")?;
            if !cli.quiet {
                eprintln!(
                    "{} counter set to {}/{}; next number ends in {}",
                    green("✔"),
                    record.year,
                    record.last_number,
                    record.last_number + 1
                );
            }
        }

        Command::Convert {
            input,
            output,
            mime,
        } => {
            let attachment = read_local(&input, mime.as_deref())
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let converted = tokio::task::spawn_blocking(move || {
                convert_to_pdf(&attachment.bytes, &attachment.mime, &attachment.name)
            })
            .await
            .context("Conversion task failed")?
            .context("Conversion failed")?;
            write_output(&output, &converted.pdf).await?;
            report(cli.quiet, converted.page_count, converted.pdf.len(), &output);
        }

        Command::Merge { inputs, output } => {
            let mut docs = Vec::with_capacity(inputs.len());
            for path in &inputs {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                docs.push(bytes);
            }
            let merged = tokio::task::spawn_blocking(move || merge_pdfs(&docs))
                .await
                .context("Merge task failed")?
                .context("Merge failed")?;
            if !cli.quiet {
                for s in &merged.skipped {
                    eprintln!(
                        "  {} skipped {}: {}",
                        cyan("⚠"),
                        inputs[s.index].display(),
                        red(&s.reason.to_string())
                    );
                }
            }
            write_output(&output, &merged.output.pdf).await?;
            report(cli.quiet, merged.output.page_count, merged.output.pdf.len(), &output);
        }

        Command::Render { stamp, output } => {
            let png = stamp
                .renderer()
                .render(&stamp.config())
                .context("Failed to render the stamp")?;
            write_output(&output, &png).await?;
            if !cli.quiet {
                eprintln!("{}  stamp  →  {}", green("✔"), bold(&output.display().to_string()));
            }
        }

        Command::Stamp {
            input,
            stamp,
            placement,
            output,
        } => {
            let opts = placement.options()?;
            let pdf = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let stamper = PdfStamper::new(stamp.renderer());
            let config = stamp.config();
            let stamped = tokio::task::spawn_blocking(move || stamper.stamp(&pdf, &config, &opts))
                .await
                .context("Stamp task failed")?
                .context("Stamping failed")?;
            write_output(&output, &stamped.pdf).await?;
            report(cli.quiet, stamped.page_count, stamped.pdf.len(), &output);
        }

        Command::Watermark {
            input,
            text,
            font_size,
            placement,
            output,
        } => {
            let opts = placement.options()?;
            let pdf = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let marked = tokio::task::spawn_blocking(move || {
                PdfStamper::default().watermark(&pdf, &text, font_size, &opts)
            })
            .await
            .context("Watermark task failed")?
            .context("Watermarking failed")?;
            write_output(&output, &marked.pdf).await?;
            report(cli.quiet, marked.page_count, marked.pdf.len(), &output);
        }

        Command::Process {
            inputs,
            stamp,
            placement,
            output,
            store_dir,
            public_url,
            name,
            download_timeout,
            json,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn ProcessingProgressCallback>)
            } else {
                None
            };

            let mut builder = PipelineConfig::builder()
                .stamp_style(stamp.style())
                .placement(placement.options()?)
                .time_zone(stamp.time_zone)
                .fetch_timeout_secs(download_timeout);
            if let Some(org) = &stamp.organization {
                builder = builder.organization_name(org.clone());
            }
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            let mut processor = DocumentProcessor::new(config);
            if let Some(dir) = &store_dir {
                let mut store = LocalBlobStore::new(dir);
                if let Some(url) = &public_url {
                    store = store
                        .with_public_base_url(url)
                        .context("Invalid --public-url")?;
                }
                processor = processor.with_storage(Arc::new(store));
            }

            let mut opts = ProcessOptions::new(stamp.config()).upload(store_dir.is_some());
            if let Some(name) = name {
                opts = opts.merged_name(name);
            }

            let result = processor.load_and_merge(&inputs, &opts).await;

            if let (Some(path), Some(pdf)) = (&output, &result.pdf_bytes) {
                write_output(path, pdf).await?;
            }

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?
                );
            } else if !cli.quiet {
                if !show_progress {
                    for s in &result.skipped_files {
                        eprintln!("  {} skipped {}: {}", cyan("⚠"), s.name, red(&s.reason.to_string()));
                    }
                }
                if result.success {
                    eprintln!(
                        "{}  {}  {} pages  {} bytes",
                        green("✔"),
                        bold(&stamp.number),
                        result.page_count,
                        result.file_size
                    );
                    if let Some(path) = &output {
                        eprintln!("   →  {}", bold(&path.display().to_string()));
                    }
                    if let Some(url) = &result.download_url {
                        eprintln!("   →  {}", dim(url));
                    }
                }
            }

            if !result.success {
                anyhow::bail!(
                    "Processing failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    Ok(())
}

fn allocator(args: &CounterArgs) -> Allocator {
    Allocator::new(Arc::new(JsonFileCounterStore::new(&args.counter)))
        .with_time_zone(args.time_zone)
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn report(quiet: bool, pages: u32, bytes: usize, output: &Path) {
    if !quiet {
        eprintln!(
            "{}  {} pages  {}  →  {}",
            green("✔"),
            pages,
            dim(&format!("{bytes} bytes")),
            bold(&output.display().to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp_args(extra: &[&str]) -> (StampArgs, PlacementArgs) {
        let mut argv = vec!["registratura", "stamp", "in.pdf", "-o", "out.pdf", "--number", "REG-2025-000042"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Stamp { stamp, placement, .. } => (stamp, placement),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn tracking_url_wins_over_tracking_base() {
        // Also set through the environment so the env-backed flag is populated.
        std::env::set_var("REGISTRATURA_TRACKING_BASE", "https://env.example.ro/track");
        let (stamp, _) = stamp_args(&[
            "--tracking-url",
            "https://registratura.example.ro/t/42",
            "--tracking-base",
            "https://base.example.ro/track",
        ]);
        std::env::remove_var("REGISTRATURA_TRACKING_BASE");
        assert_eq!(
            stamp.config().tracking_url.as_deref(),
            Some("https://registratura.example.ro/t/42")
        );
    }

    #[test]
    fn tracking_base_builds_url_from_number() {
        let (stamp, _) = stamp_args(&["--tracking-base", "https://registratura.example.ro/track/"]);
        assert_eq!(
            stamp.config().tracking_url.as_deref(),
            Some("https://registratura.example.ro/track/REG-2025-000042")
        );
    }

    #[test]
    fn invalid_placement_flags_are_rejected() {
        for flag in ["--opacity=-2", "--opacity=1.5", "--scale=0", "--margin=-1"] {
            let (_, placement) = stamp_args(&[flag]);
            assert!(placement.options().is_err(), "{flag}");
        }
        let (_, placement) = stamp_args(&["--opacity=0.5", "--scale=2"]);
        assert!(placement.options().is_ok());
    }
}
