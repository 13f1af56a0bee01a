use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::Parser;
use scraper::Selector;

use crate::models::PageJob;

/// Pages archived when no URL is given on the command line.
pub const DEFAULT_LINKS: &[&str] = &["https://cs50.harvard.edu/x/2024/notes/1/"];

#[derive(Debug, Parser)]
#[command(
    name = "lecture-archiver",
    about = "Archive lecture-note pages as Markdown with local images"
)]
pub struct Cli {
    /// Pages to archive, in order (default: the built-in lecture list)
    pub urls: Vec<String>,

    /// Directory that receives one folder per page
    #[arg(short, long, env = "LECTURE_ARCHIVER_OUTPUT_DIR", default_value = "cs50_notes")]
    pub output_dir: PathBuf,

    /// CSS selector of the element holding the page's main content
    #[arg(short, long, env = "LECTURE_ARCHIVER_SELECTOR", default_value = "main")]
    pub selector: String,

    /// Suffix of every folder and Markdown file name
    #[arg(long, default_value = "lecture-notes")]
    pub suffix: String,

    /// Sequence number of the first page
    #[arg(long, default_value_t = 1)]
    pub start_index: usize,

    /// Accept invalid TLS certificates
    #[arg(long, env = "LECTURE_ARCHIVER_INSECURE_SSL", value_parser = FalseyValueParser::new())]
    pub insecure: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid content selector {0:?}")]
    Selector(String),
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub jobs: Vec<PageJob>,
    pub output_dir: PathBuf,
    pub content_selector: Selector,
    pub selector_text: String,
    pub suffix: String,
    pub insecure: bool,
}

impl TryFrom<Cli> for ArchiveConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let content_selector = Selector::parse(&cli.selector)
            .map_err(|_| ConfigError::Selector(cli.selector.clone()))?;

        let jobs = if cli.urls.is_empty() {
            PageJob::from_links(DEFAULT_LINKS.iter().copied(), cli.start_index)
        } else {
            PageJob::from_links(cli.urls, cli.start_index)
        };

        Ok(ArchiveConfig {
            jobs,
            output_dir: cli.output_dir,
            content_selector,
            selector_text: cli.selector,
            suffix: cli.suffix,
            insecure: cli.insecure,
        })
    }
}
