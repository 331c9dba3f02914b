use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFlavor {
    /// Local files matched by glob patterns
    File,
    /// HTTP URLs with range support
    Http,
    /// Blobs listed from the store
    Blob,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFlavor {
    /// Local files
    File,
    /// Block blobs, committed from staged chunks
    Block,
    /// Page blobs, written in place
    Page,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Sources: glob patterns, URLs, or blob names depending on --source-kind
    #[arg(short = 'f', long = "source", required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Where the bytes come from
    #[arg(long, value_enum, default_value_t = SourceFlavor::File)]
    pub source_kind: SourceFlavor,

    /// Where the bytes go
    #[arg(short = 't', long, value_enum, default_value_t = TargetFlavor::Block)]
    pub target_kind: TargetFlavor,

    /// Destination container for blob targets
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Container to list blob sources from (defaults to --container)
    #[arg(long)]
    pub source_container: Option<String>,

    /// Base URL of the blob service
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Pre-built SAS-style query string appended to every service request
    #[arg(long)]
    pub sas: Option<String>,

    /// Destination directory for file targets
    #[arg(short = 'o', long, default_value = ".")]
    pub output: PathBuf,

    /// Block size, in MiB
    #[arg(short = 'b', long, default_value_t = 4)]
    pub block_size_mib: u64,

    /// Number of reader threads
    #[arg(short = 'r', long, default_value_t = num_cpus::get())]
    pub readers: usize,

    /// Number of writer threads
    #[arg(short = 'w', long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Maximum sources handled by one pipeline
    #[arg(long, default_value_t = 10)]
    pub files_per_pipeline: usize,

    /// Compute part MD5 hashes and attach them as content hashes
    #[arg(long)]
    pub md5: bool,

    /// Keep directory components in target names
    #[arg(long)]
    pub keep_dir_structure: bool,

    /// Rename targets, one alias per source
    #[arg(short = 'n', long = "name")]
    pub target_aliases: Vec<String>,

    /// Match blob source names exactly instead of by prefix
    #[arg(long)]
    pub exact_name_match: bool,

    /// Overwrite existing destination files
    #[arg(long)]
    pub overwrite: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    pub summary_json: bool,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    pub verbosity: String,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
