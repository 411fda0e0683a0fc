use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::task::JoinHandle;

use linked_archiver::config::{ArchiverOptions, CliOverrides};
use linked_archiver::error::Result;
use linked_archiver::formats::{ContentKind, FormatRegistry};
use linked_archiver::{AnalysisProgress, Archiver};

#[derive(Parser)]
#[command(name = "linked-archiver")]
#[command(about = "Identify file formats, extract metadata and emit it as a linked-data graph")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Describe a directory tree
    linked-archiver describe ./dist -o dist.nt

    # Deterministic, compressed output under a fixed namespace
    linked-archiver describe ./a.zip ./b.tar -o out.nt.gz --stable --compress --root http://example.org/files/

    # Only SHA-256 and BLAKE3, with BitTorrent info hashes
    linked-archiver describe ./data -o data.nt --hash sha-256 --hash blake3 --torrent

    # List supported formats
    linked-archiver formats --format json
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze inputs and write an N-Triples document
    Describe(DescribeArgs),

    /// List registered formats
    Formats {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Args)]
pub struct DescribeArgs {
    /// Files or directories to analyze
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output document
    #[arg(short, long)]
    pub output: PathBuf,

    /// Option file (TOML); flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Gzip the output
    #[arg(long)]
    pub compress: bool,

    /// Deterministic identifiers and sorted output
    #[arg(long)]
    pub stable: bool,

    /// IRI of the root namespace
    #[arg(long)]
    pub root: Option<String>,

    /// Hash algorithm; repeat for several, the first names content nodes
    #[arg(long = "hash", value_name = "ALGORITHM")]
    pub hashes: Vec<String>,

    /// Enabled formats (glob patterns, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<String>,

    /// Container nesting limit
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Emit BitTorrent info hashes
    #[arg(long)]
    pub torrent: bool,

    /// Torrent piece length in bytes
    #[arg(long)]
    pub piece_length: Option<u64>,
}

impl DescribeArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            root: self.root.clone(),
            stable: self.stable,
            compress: self.compress,
            quiet: self.quiet,
            hash_algorithms: self.hashes.clone(),
            formats: self.formats.clone(),
            max_depth: self.max_depth,
            torrent: self.torrent,
            piece_length: self.piece_length,
        }
    }

    /// File options with flags applied on top.
    pub fn options(&self) -> Result<ArchiverOptions> {
        let mut options = match &self.config {
            Some(path) => ArchiverOptions::from_toml_file(path)?,
            None => ArchiverOptions::default(),
        };
        options.merge_cli(self.overrides());
        Ok(options)
    }
}

pub async fn describe(args: &DescribeArgs) -> Result<()> {
    let options = args.options()?;
    let archiver = Archiver::new(options.resolve()?);

    let spinner = (!options.quiet).then(|| start_spinner(archiver.progress().clone()));
    let outcome = archiver.describe_paths(&args.inputs).await;
    if let Some((bar, ticker)) = spinner {
        ticker.abort();
        bar.finish_and_clear();
    }
    let results = outcome?;

    archiver.write_output(&args.output, options.compress)?;

    if !options.quiet {
        let snap = archiver.progress().snapshot();
        println!(
            "Described {} input(s): {} entities, {} containers, {} triples",
            results.len(),
            snap.entities,
            snap.containers,
            archiver.graph().len()
        );
        if snap.errors > 0 {
            println!("  {} recovered error(s), see log", snap.errors);
        }
        println!("Output written to {}", args.output.display());
    }
    Ok(())
}

fn start_spinner(progress: AnalysisProgress) -> (ProgressBar, JoinHandle<()>) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let ticker_bar = bar.clone();
    let ticker = tokio::spawn(async move {
        loop {
            let snap = progress.snapshot();
            ticker_bar.set_message(format!(
                "{} entities, {} KiB hashed, {} containers",
                snap.entities,
                snap.bytes_hashed / 1024,
                snap.containers
            ));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });
    (bar, ticker)
}

#[derive(Serialize)]
struct FormatInfo {
    name: &'static str,
    header_length: usize,
    content: &'static str,
}

fn content_label(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Binary => "binary",
        ContentKind::Text => "text",
        ContentKind::Any => "any",
    }
}

pub fn list_formats(format: &str) -> Result<()> {
    let registry = FormatRegistry::new();
    let formats: Vec<FormatInfo> = registry
        .formats()
        .iter()
        .map(|f| FormatInfo {
            name: f.name(),
            header_length: f.header_length(),
            content: content_label(f.content_kind()),
        })
        .collect();

    if format == "json" {
        let output = serde_json::to_string_pretty(&formats).unwrap_or_default();
        println!("{}", output);
        return Ok(());
    }

    println!("Registered formats ({}):", formats.len());
    for info in &formats {
        println!("  {:<6} header {:>4} bytes  {}", info.name, info.header_length, info.content);
    }
    Ok(())
}
