use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};
use url::Url;

use crate::config::ArchiveConfig;
use crate::convert::{MarkdownConverter, SrcOverrides};
use crate::fetch::{self, FetchError};
use crate::models::{placeholder_filename, ImageRef, OutputArtifact, PageJob};

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

/// Why a page job was abandoned. None of these stop the run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no element matches {0:?}")]
    MissingContent(String),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Results ──────────────────────────────────────────────────────────────────

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub markdown_path: PathBuf,
    pub images_saved: usize,
    pub images_failed: usize,
}

#[derive(Debug)]
pub enum JobOutcome {
    Saved(JobReport),
    Skipped(JobError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub saved: usize,
    pub skipped: usize,
}

// ── Archiver ─────────────────────────────────────────────────────────────────

/// Processes page jobs one after another.
pub struct Archiver {
    client: Client,
    config: ArchiveConfig,
    converter: MarkdownConverter,
}

impl Archiver {
    pub fn new(config: ArchiveConfig) -> Result<Self, FetchError> {
        let client = fetch::build_client(config.insecure)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ArchiveConfig) -> Self {
        Self {
            client,
            config,
            converter: MarkdownConverter::default(),
        }
    }

    /// Attempt every job in input order. Job failures are logged, never raised.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        for job in &self.config.jobs {
            match self.process(job).await {
                JobOutcome::Saved(report) => {
                    summary.saved += 1;
                    info!(
                        "Saved as: {} ({} images, {} failed)",
                        report.markdown_path.display(),
                        report.images_saved,
                        report.images_failed
                    );
                }
                JobOutcome::Skipped(e) => {
                    summary.skipped += 1;
                    match e {
                        JobError::MissingContent(_) => {
                            warn!("Skipping {}: {}", job.url, e)
                        }
                        _ => warn!("Error accessing {}: {}", job.url, e),
                    }
                }
            }
        }

        info!(
            "Finished: {} saved, {} skipped",
            summary.saved, summary.skipped
        );
        summary
    }

    pub async fn process(&self, job: &PageJob) -> JobOutcome {
        info!("Processing URL: {}", job.url);
        match self.try_process(job).await {
            Ok(report) => JobOutcome::Saved(report),
            Err(e) => JobOutcome::Skipped(e),
        }
    }

    async fn try_process(&self, job: &PageJob) -> Result<JobReport, JobError> {
        let page_url = Url::parse(&job.url).map_err(|source| JobError::InvalidUrl {
            url: job.url.clone(),
            source,
        })?;

        // Fetching
        let html = fetch::fetch_page(&self.client, page_url.as_str()).await?;

        // Locating content
        let document = Html::parse_document(&html);
        let region = document
            .select(&self.config.content_selector)
            .next()
            .ok_or_else(|| JobError::MissingContent(self.config.selector_text.clone()))?;

        // Rewriting images
        let artifact = OutputArtifact::for_job(&self.config.output_dir, job, &self.config.suffix);
        tokio::fs::create_dir_all(&artifact.folder)
            .await
            .map_err(|source| JobError::Io {
                path: artifact.folder.clone(),
                source,
            })?;

        let mut overrides = SrcOverrides::new();
        let images_failed = self
            .localize_images(region, &page_url, &artifact.folder, &mut overrides)
            .await?;

        // Converting
        let markdown = self
            .converter
            .convert_region(region, Some(&page_url), &overrides);

        // Persisting
        tokio::fs::write(&artifact.markdown_path, markdown.as_bytes())
            .await
            .map_err(|source| JobError::Io {
                path: artifact.markdown_path.clone(),
                source,
            })?;

        Ok(JobReport {
            markdown_path: artifact.markdown_path,
            images_saved: overrides.len(),
            images_failed,
        })
    }

    /// Download every image of `region` into `folder`, recording the local
    /// name of each one that arrived. Returns the number that failed.
    async fn localize_images<'a>(
        &self,
        region: ElementRef<'a>,
        page_url: &Url,
        folder: &Path,
        overrides: &mut SrcOverrides<'a>,
    ) -> Result<usize, JobError> {
        let mut failed = 0usize;

        for img in region.select(&IMG_SEL) {
            let src = match img.value().attr("src") {
                Some(src) if !src.is_empty() => src,
                _ => continue,
            };

            let Some(image) = ImageRef::resolve(page_url, src) else {
                warn!("Error resolving image source {:?} against {}", src, page_url);
                failed += 1;
                continue;
            };

            let filename = match image.filename {
                Some(name) => name,
                None => placeholder_filename(count_entries(folder).await?),
            };

            let dest = folder.join(&filename);
            if let Err(e) = fetch::download_image(&self.client, image.url.as_str(), &dest).await {
                warn!("Error downloading {} (src {:?}): {}", image.url, image.src, e);
                failed += 1;
                continue;
            }

            overrides.insert(img, filename);
        }

        Ok(failed)
    }
}

async fn count_entries(dir: &Path) -> Result<usize, JobError> {
    let io_err = |source| JobError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut count = 0usize;
    while entries.next_entry().await.map_err(io_err)?.is_some() {
        count += 1;
    }
    Ok(count)
}
