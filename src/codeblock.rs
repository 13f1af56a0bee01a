const LANGUAGE_PREFIX: &str = "language-";
const FENCE: &str = "```";

// ── Class list normalization ─────────────────────────────────────────────────

/// A `class` attribute in whichever shape it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassList<'a> {
    Absent,
    Raw(&'a str),
    Tokens(Vec<&'a str>),
}

impl<'a> ClassList<'a> {
    pub fn from_attr(attr: Option<&'a str>) -> Self {
        match attr {
            Some(raw) => ClassList::Raw(raw),
            None => ClassList::Absent,
        }
    }

    /// Discrete class tokens in attribute order.
    pub fn tokens(&self) -> Vec<&'a str> {
        match self {
            ClassList::Absent => Vec::new(),
            ClassList::Raw(raw) => raw.split_whitespace().collect(),
            ClassList::Tokens(tokens) => tokens
                .iter()
                .flat_map(|t| t.split_whitespace())
                .collect(),
        }
    }

    /// The remainder of the first `language-` token, if any.
    pub fn language(&self) -> Option<&'a str> {
        self.tokens()
            .into_iter()
            .find_map(|token| token.strip_prefix(LANGUAGE_PREFIX))
    }
}

impl<'a> From<Vec<&'a str>> for ClassList<'a> {
    fn from(tokens: Vec<&'a str>) -> Self {
        ClassList::Tokens(tokens)
    }
}

// ── Renderer strategy ────────────────────────────────────────────────────────

/// Turns a `<pre>` element into Markdown. The converter delegates every code
/// block to an implementation of this trait.
pub trait CodeBlockRenderer {
    fn render(&self, classes: &ClassList<'_>, body: &str) -> String;
}

/// Fenced block annotated with the element's `language-` class.
#[derive(Debug, Default, Clone, Copy)]
pub struct FencedCodeBlock;

impl CodeBlockRenderer for FencedCodeBlock {
    fn render(&self, classes: &ClassList<'_>, body: &str) -> String {
        let language = classes.language().unwrap_or("");
        format!("{FENCE}{language}\n{body}\n{FENCE}\n")
    }
}
