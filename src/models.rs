use std::path::{Path, PathBuf};

use url::Url;

/// One source URL and its position in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageJob {
    pub url: String,
    pub index: usize,
}

impl PageJob {
    /// Jobs for `links` in order, numbered from `start`.
    pub fn from_links<I, S>(links: I, start: usize) -> Vec<PageJob>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        links
            .into_iter()
            .enumerate()
            .map(|(offset, url)| PageJob {
                url: url.into(),
                index: start + offset,
            })
            .collect()
    }

    /// `01-lecture-notes` for index 1 and suffix `lecture-notes`.
    pub fn folder_name(&self, suffix: &str) -> String {
        format!("{:02}-{}", self.index, suffix)
    }
}

/// Where a job's folder and Markdown file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub folder: PathBuf,
    pub markdown_path: PathBuf,
}

impl OutputArtifact {
    pub fn for_job(base_dir: &Path, job: &PageJob, suffix: &str) -> Self {
        let name = job.folder_name(suffix);
        let folder = base_dir.join(&name);
        let markdown_path = folder.join(format!("{}.md", name));
        Self {
            folder,
            markdown_path,
        }
    }
}

/// An `<img>` source resolved against its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub src: String,
    pub url: Url,
    pub filename: Option<String>,
}

impl ImageRef {
    /// `None` when `src` cannot be joined onto `page_url`.
    pub fn resolve(page_url: &Url, src: &str) -> Option<Self> {
        let url = page_url.join(src).ok()?;
        let filename = filename_from_url(&url);
        Some(Self {
            src: src.to_string(),
            url,
            filename,
        })
    }
}

/// Final path segment of `url`, if it is non-empty.
pub fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Stand-in name for an image whose URL has no usable final segment.
pub fn placeholder_filename(existing_entries: usize) -> String {
    format!("image_{}.png", existing_entries)
}
