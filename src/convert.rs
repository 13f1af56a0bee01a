use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::codeblock::{ClassList, CodeBlockRenderer, FencedCodeBlock};

// ── Selectors ────────────────────────────────────────────────────────────────

static ROW_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());

// Private-use code points bracketing rendered code blocks until the final pass.
const CODE_START: char = '\u{E000}';
const CODE_END: char = '\u{E001}';

// ── Image source overrides ───────────────────────────────────────────────────

/// Replacement `src` values for specific `<img>` elements of a parsed tree.
///
/// The page processor records one entry per downloaded image; the converter
/// prefers these over the element's own attribute.
#[derive(Debug, Default)]
pub struct SrcOverrides<'a> {
    entries: Vec<(ElementRef<'a>, String)>,
}

impl<'a> SrcOverrides<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, img: ElementRef<'a>, src: String) {
        match self.entries.iter_mut().find(|(el, _)| *el == img) {
            Some((_, existing)) => *existing = src,
            None => self.entries.push((img, src)),
        }
    }

    pub fn get(&self, img: ElementRef<'a>) -> Option<&str> {
        self.entries
            .iter()
            .find(|(el, _)| *el == img)
            .map(|(_, src)| src.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Converter ────────────────────────────────────────────────────────────────

/// Structural HTML → Markdown conversion with a pluggable code-block rule.
#[derive(Debug, Default, Clone)]
pub struct MarkdownConverter<R = FencedCodeBlock> {
    code_blocks: R,
}

impl<R: CodeBlockRenderer> MarkdownConverter<R> {
    pub fn new(code_blocks: R) -> Self {
        Self { code_blocks }
    }

    /// Convert a standalone markup string. Relative links are left untouched.
    pub fn convert(&self, markup: &str) -> String {
        let fragment = Html::parse_fragment(markup);
        self.convert_region(fragment.root_element(), None, &SrcOverrides::new())
    }

    /// Convert an element of an already-parsed document.
    pub fn convert_region<'a>(
        &self,
        region: ElementRef<'a>,
        base_url: Option<&Url>,
        overrides: &SrcOverrides<'a>,
    ) -> String {
        let walk = Walk {
            code_blocks: &self.code_blocks,
            base_url,
            overrides,
        };
        let markdown = strip_markers(&collapse_blank_lines(&walk.element(region)));
        let markdown = markdown.trim_start_matches('\n').trim_end();
        if markdown.is_empty() {
            String::new()
        } else {
            format!("{markdown}\n")
        }
    }
}

// ── DOM tree walker → Markdown ───────────────────────────────────────────────

struct Walk<'w, 'a, R> {
    code_blocks: &'w R,
    base_url: Option<&'w Url>,
    overrides: &'w SrcOverrides<'a>,
}

impl<'w, 'a, R: CodeBlockRenderer> Walk<'w, 'a, R> {
    fn element(&self, el: ElementRef<'a>) -> String {
        let name = el.value().name();

        match name {
            "script" | "style" | "noscript" | "template" => String::new(),

            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = normalize_text(&self.children(el).replace(HARD_BREAK, " "));
                if text.is_empty() {
                    return String::new();
                }
                format!("\n\n{} {}\n\n", "#".repeat(level), text)
            }

            "p" | "figcaption" => {
                let content = self.children(el);
                let trimmed = trim_block(&content);
                if trimmed.is_empty() {
                    return String::new();
                }
                if name == "figcaption" {
                    format!("\n\n*{}*\n\n", trimmed)
                } else {
                    format!("\n\n{}\n\n", trimmed)
                }
            }

            "pre" => {
                let text = collect_text(el);
                let body = text.trim_end_matches('\n');
                let classes = ClassList::from_attr(el.value().attr("class"));
                let mut rendered = self.code_blocks.render(&classes, body);
                if rendered.is_empty() {
                    return String::new();
                }
                if !rendered.ends_with('\n') {
                    rendered.push('\n');
                }
                format!("\n\n{CODE_START}{rendered}{CODE_END}\n")
            }

            "code" => {
                let text = collect_text(el);
                if text.is_empty() {
                    return String::new();
                }
                format!("`{}`", text)
            }

            "img" => {
                let src = self.image_src(el).unwrap_or_default();
                let alt = el.value().attr("alt").map(str::trim).unwrap_or("");
                format!("![{}]({})", alt, src)
            }

            "a" => {
                let content = self.children(el);
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    return String::new();
                }
                match el.value().attr("href") {
                    Some(href) => format!("[{}]({})", trimmed, self.resolve(href)),
                    None => trimmed.to_string(),
                }
            }

            "strong" | "b" => self.wrap_inline(el, "**"),
            "em" | "i" => self.wrap_inline(el, "*"),

            "br" => HARD_BREAK.to_string(),
            "hr" => "\n\n---\n\n".to_string(),

            "ul" => self.list(el, false),
            "ol" => self.list(el, true),

            "li" => {
                let content = self.children(el);
                let trimmed = trim_block(&content);
                if trimmed.is_empty() {
                    return String::new();
                }
                format!("\n{}", list_item("-", trimmed))
            }

            "blockquote" => {
                let content = collapse_blank_lines(&self.children(el));
                let quoted = content
                    .trim()
                    .lines()
                    .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {}", l) })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("\n\n{}\n\n", quoted)
            }

            "table" => self.table(el),

            "div" | "section" | "article" | "main" | "header" | "footer" | "figure"
            | "aside" | "nav" => format!("\n{}\n", self.children(el)),

            _ => self.children(el),
        }
    }

    fn children(&self, el: ElementRef<'a>) -> String {
        let mut result = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    let text = escape_text(&collapse_whitespace(&text.text));
                    let at_line_start =
                        result.is_empty() || result.ends_with('\n') || result.ends_with(' ');
                    if text == " " && at_line_start {
                        continue;
                    }
                    result.push_str(&text);
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        result.push_str(&self.element(child_el));
                    }
                }
                _ => {}
            }
        }
        result
    }

    fn wrap_inline(&self, el: ElementRef<'a>, marker: &str) -> String {
        let content = self.children(el);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        format!("{marker}{trimmed}{marker}")
    }

    fn list(&self, el: ElementRef<'a>, ordered: bool) -> String {
        let mut result = String::new();
        let mut idx = 1usize;

        for child in el.children().filter_map(ElementRef::wrap) {
            if child.value().name() != "li" {
                continue;
            }
            let content = collapse_blank_lines(&self.children(child));
            let trimmed = trim_block(&content);
            if trimmed.is_empty() {
                continue;
            }
            if ordered {
                result.push_str(&list_item(&format!("{}.", idx), trimmed));
                idx += 1;
            } else {
                result.push_str(&list_item("-", trimmed));
            }
        }

        if result.is_empty() {
            return result;
        }
        format!("\n{}\n", result)
    }

    fn table(&self, el: ElementRef<'a>) -> String {
        let rows: Vec<Vec<String>> = el
            .select(&ROW_SEL)
            .map(|row| {
                row.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|cell| matches!(cell.value().name(), "th" | "td"))
                    .map(|cell| table_cell(&self.children(cell)))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| !cells.is_empty())
            .collect();

        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return String::new();
        }

        let mut result = String::from("\n\n");
        for (i, row) in rows.iter().enumerate() {
            let mut cells = row.clone();
            cells.resize(width, String::new());
            result.push_str(&format!("| {} |\n", cells.join(" | ")));
            if i == 0 {
                result.push_str(&format!("|{}\n", " --- |".repeat(width)));
            }
        }
        result.push('\n');
        result
    }

    fn image_src(&self, img: ElementRef<'a>) -> Option<String> {
        if let Some(local) = self.overrides.get(img) {
            return Some(local.to_string());
        }
        img.value()
            .attr("src")
            .filter(|s| !s.trim().is_empty())
            .map(|s| self.resolve(s))
    }

    fn resolve(&self, reference: &str) -> String {
        self.base_url
            .and_then(|base| base.join(reference).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| reference.to_string())
    }
}

// ── Markdown helpers ─────────────────────────────────────────────────────────

const HARD_BREAK: &str = "\\\n";

fn list_item(marker: &str, content: &str) -> String {
    let indent = " ".repeat(marker.len() + 1);
    let mut lines = content.lines();
    let mut result = format!("{} {}\n", marker, lines.next().unwrap_or("").trim_end());
    for line in lines {
        if line.trim().is_empty() {
            result.push('\n');
        } else {
            result.push_str(&format!("{}{}\n", indent, line.trim_end()));
        }
    }
    result
}

fn table_cell(content: &str) -> String {
    normalize_text(content).replace('|', "\\|")
}

/// Collapse blank-line runs to a single blank line. Rendered code blocks,
/// bracketed by `CODE_START`/`CODE_END`, pass through untouched.
fn collapse_blank_lines(markdown: &str) -> String {
    let mut result = String::with_capacity(markdown.len());
    let mut in_code = false;
    let mut blank_run = false;

    for line in markdown.split('\n') {
        if in_code {
            result.push_str(line);
            result.push('\n');
            if line.contains(CODE_END) {
                in_code = false;
                // the closing marker line becomes the blank line after the block
                blank_run = line.replace(CODE_END, "").trim().is_empty();
            }
            continue;
        }
        if line.contains(CODE_START) {
            in_code = !line.contains(CODE_END);
            blank_run = false;
            result.push_str(line);
            result.push('\n');
            continue;
        }
        if line.trim().is_empty() {
            if !blank_run {
                result.push('\n');
            }
            blank_run = true;
            continue;
        }
        blank_run = false;
        result.push_str(line.trim_end());
        result.push('\n');
    }
    result
}

fn strip_markers(markdown: &str) -> String {
    markdown.replace(is_marker, "")
}

fn is_marker(c: char) -> bool {
    c == CODE_START || c == CODE_END
}

/// Trim a block's content, dropping a hard break left dangling at its end.
fn trim_block(content: &str) -> &str {
    let trimmed = content.trim_start();
    let trimmed = trimmed.trim_end_matches(' ');
    trimmed
        .strip_suffix(HARD_BREAK)
        .unwrap_or(trimmed)
        .trim_end()
}

/// Backslash-escape the inline emphasis characters of a text node.
fn escape_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for c in text.chars().filter(|c| !is_marker(*c)) {
        if matches!(c, '*' | '_') {
            result.push('\\');
        }
        result.push(c);
    }
    result
}

// ── DOM utility helpers ──────────────────────────────────────────────────────

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().replace(is_marker, "")
}

/// Collapse whitespace and trim.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace runs to single spaces, keeping one space at either
/// edge where the source had any.
fn collapse_whitespace(text: &str) -> String {
    let words = normalize_text(text);
    if words.is_empty() {
        return if text.is_empty() { String::new() } else { " ".to_string() };
    }
    let mut result = String::with_capacity(words.len() + 2);
    if text.starts_with(char::is_whitespace) {
        result.push(' ');
    }
    result.push_str(&words);
    if text.ends_with(char::is_whitespace) {
        result.push(' ');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(markup: &str) -> String {
        MarkdownConverter::<FencedCodeBlock>::default().convert(markup)
    }

    #[test]
    fn pre_with_language_class() {
        let md = convert(r#"<pre class="language-python">x = 1</pre>"#);
        assert_eq!(md, "```python\nx = 1\n```\n");
    }

    #[test]
    fn pre_without_class() {
        assert_eq!(convert("<pre>no class</pre>"), "```\nno class\n```\n");
    }

    #[test]
    fn code_block_followed_by_one_blank_line() {
        let md = convert(
            r#"<p>Before</p><pre class="extra language-c">int main(void)
{

    return 0;
}
</pre><p>After</p>"#,
        );
        assert_eq!(
            md,
            "Before\n\n```c\nint main(void)\n{\n\n    return 0;\n}\n```\n\nAfter\n"
        );
    }

    #[test]
    fn nested_code_text_is_body() {
        let md = convert(r#"<pre class="language-sh"><code>$ make hello</code></pre>"#);
        assert_eq!(md, "```sh\n$ make hello\n```\n");
    }

    #[test]
    fn structural_rules() {
        let md = convert(
            "<h2>Title</h2>\n<p>Some <strong>bold</strong> and <em>soft</em> text \
             with <code>printf</code>.</p>\n<ul><li>one</li><li>two</li></ul>\
             <ol><li>first</li><li>second</li></ol>",
        );
        assert_eq!(
            md,
            "## Title\n\nSome **bold** and *soft* text with `printf`.\n\n\
             - one\n- two\n\n1. first\n2. second\n"
        );
    }

    #[test]
    fn links_and_images() {
        let md = convert(r#"<p><a href="https://example.com/">site</a> <img src="cat.png" alt="Cat"></p>"#);
        assert_eq!(md, "[site](https://example.com/) ![Cat](cat.png)\n");
    }

    #[test]
    fn tables_become_pipe_tables() {
        let md = convert(
            "<table><thead><tr><th>Type</th><th>Bytes</th></tr></thead>\
             <tbody><tr><td>int</td><td>4</td></tr><tr><td>char</td></tr></tbody></table>",
        );
        assert_eq!(
            md,
            "| Type | Bytes |\n| --- | --- |\n| int | 4 |\n| char |  |\n"
        );
    }

    #[test]
    fn blockquote_and_scripts() {
        let md = convert("<blockquote><p>quoted</p></blockquote><script>var x;</script>");
        assert_eq!(md, "> quoted\n");
    }

    #[test]
    fn overrides_and_base_url_apply_to_region() {
        let html = Html::parse_document(
            r#"<main><img src="/a/one.png"><img src="two.png"><a href="../x">x</a></main>"#,
        );
        let main_sel = Selector::parse("main").unwrap();
        let img_sel = Selector::parse("img").unwrap();
        let region = html.select(&main_sel).next().unwrap();
        let first = region.select(&img_sel).next().unwrap();

        let mut overrides = SrcOverrides::new();
        overrides.insert(first, "one.png".to_string());
        assert_eq!(overrides.len(), 1);

        let base = Url::parse("https://example.com/notes/1/").unwrap();
        let md = MarkdownConverter::new(FencedCodeBlock).convert_region(region, Some(&base), &overrides);
        assert_eq!(
            md,
            "![](one.png)![](https://example.com/notes/1/two.png)[x](https://example.com/notes/x)\n"
        );
    }

    struct Indented;

    impl CodeBlockRenderer for Indented {
        fn render(&self, _classes: &ClassList<'_>, body: &str) -> String {
            body.lines().map(|l| format!("    {l}\n")).collect()
        }
    }

    #[test]
    fn code_block_strategy_is_pluggable() {
        let md = MarkdownConverter::new(Indented).convert("<p>a</p><pre>x</pre>");
        assert_eq!(md, "a\n\n    x\n");
    }

    #[test]
    fn collapse_keeps_code_block_bodies() {
        let raw = format!("a\n\n\n\nb\n{CODE_START}```\n\n\n```\n{CODE_END}\n\n\nc");
        let md = strip_markers(&collapse_blank_lines(&raw));
        assert_eq!(md, "a\n\nb\n```\n\n\n```\n\nc\n");
    }

    #[test]
    fn backtick_prose_does_not_open_a_fence() {
        let md = convert("<p>```not a fence</p><p>a</p><div>\n\n</div><p>b</p>");
        assert_eq!(md, "```not a fence\n\na\n\nb\n");
    }

    #[test]
    fn blank_lines_collapse_after_code_with_backtick_lines() {
        let md = convert(
            "<pre class=\"language-md\">```\n\n\ninner\n```</pre><p>x</p><div>\n\n</div><p>y</p>",
        );
        assert_eq!(md, "```md\n```\n\n\ninner\n```\n```\n\nx\n\ny\n");
    }

    #[test]
    fn image_without_src_keeps_alt_placeholder() {
        assert_eq!(convert(r#"<p><img alt="diagram"></p>"#), "![diagram]()\n");
    }

    #[test]
    fn heading_keeps_inline_code_and_br_is_hard_break() {
        assert_eq!(
            convert("<h2>The <code>printf</code> fn</h2>"),
            "## The `printf` fn\n"
        );
        assert_eq!(
            convert("<p>line one<br>line two<br></p>"),
            "line one\\\nline two\n"
        );
    }

    #[test]
    fn emphasis_characters_in_text_are_escaped() {
        let md = convert("<p>2*3 and snake_case <code>a_b*c</code></p><pre>x_y*z</pre>");
        assert_eq!(md, "2\\*3 and snake\\_case `a_b*c`\n\n```\nx_y*z\n```\n");
    }
}
