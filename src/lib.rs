//! Archive lecture-note pages as Markdown.
//!
//! Each page's main content element is converted to Markdown and written to
//! its own numbered folder, next to local copies of the images it references.
//! `<pre>` blocks become fenced code blocks tagged with their `language-`
//! class.

pub mod archive;
pub mod codeblock;
pub mod config;
pub mod convert;
pub mod fetch;
pub mod models;
