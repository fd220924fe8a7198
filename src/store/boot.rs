//! Line model of the boot-firmware options file (`config.txt`).
//!
//! The file is kept as its original lines. Lines are classified on demand so
//! that anything the engine does not rewrite is emitted byte-for-byte.

use super::{Artifact, ArtifactId};

/// Comment line that opens the block of lines appended by meshnode.
pub const MANAGED_MARKER: &str = "# Managed by meshnode";

/// A single line of the boot file, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    text: String,
    crlf: bool,
}

impl Line {
    /// Create a line from text (no terminator).
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            crlf: false,
        }
    }

    /// Use a CRLF terminator when `crlf` is set.
    #[must_use]
    pub const fn with_crlf(mut self, crlf: bool) -> Self {
        self.crlf = crlf;
        self
    }

    /// Whether the line ends with CRLF.
    #[must_use]
    pub const fn is_crlf(&self) -> bool {
        self.crlf
    }

    /// The line's text without terminator.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Classify the line.
    #[must_use]
    pub fn kind(&self) -> LineKind<'_> {
        LineKind::classify(&self.text)
    }

    /// Replace the directive's key and value, keeping indentation, trailing
    /// comment and line terminator.
    #[must_use]
    pub fn rewritten(&self, directive: &Directive<'_>, key: &str, value: &str) -> Self {
        Self {
            text: format!("{}{key}={value}{}", directive.indent, directive.comment),
            crlf: self.crlf,
        }
    }
}

/// What a boot file line contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Empty or whitespace only.
    Blank,
    /// `#` comment.
    Comment,
    /// `[name]` conditional section header.
    Section(&'a str),
    /// `key=value`, optionally followed by a comment.
    Directive(Directive<'a>),
    /// Anything else; passed through untouched.
    Other,
}

impl<'a> LineKind<'a> {
    /// Classify a single line of text.
    ///
    /// # Examples
    ///
    /// ```
    /// use meshnode_cli::store::boot::LineKind;
    ///
    /// let LineKind::Directive(d) = LineKind::classify("dtparam=spi=on  # radio") else {
    ///     panic!("expected a directive");
    /// };
    /// assert_eq!(d.key, "dtparam");
    /// assert_eq!(d.value, "spi=on");
    /// assert_eq!(d.comment, "  # radio");
    ///
    /// assert_eq!(LineKind::classify("[pi4]"), LineKind::Section("pi4"));
    /// assert_eq!(LineKind::classify("# note"), LineKind::Comment);
    /// ```
    #[must_use]
    pub fn classify(text: &'a str) -> Self {
        let body = text.trim_start();
        if body.trim_end().is_empty() {
            return Self::Blank;
        }
        if body.starts_with('#') {
            return Self::Comment;
        }
        if let Some(inner) = body
            .trim_end()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
        {
            return Self::Section(inner.trim());
        }

        let indent = &text[..text.len() - body.len()];
        let content_end = inline_comment_start(body).unwrap_or(body.len());
        let content = body[..content_end].trim_end();
        let comment = &body[content.len()..];

        match content.split_once('=') {
            Some((key, value))
                if !key.is_empty() && !key.contains(char::is_whitespace) =>
            {
                Self::Directive(Directive {
                    indent,
                    key,
                    value,
                    comment,
                })
            }
            _ => Self::Other,
        }
    }
}

/// A `key=value` line split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    /// Leading whitespace.
    pub indent: &'a str,
    /// Text before the first `=`.
    pub key: &'a str,
    /// Text after the first `=`, up to any trailing comment.
    pub value: &'a str,
    /// Trailing whitespace plus inline comment, possibly empty.
    pub comment: &'a str,
}

/// Position of an inline comment: a `#` preceded by whitespace.
fn inline_comment_start(body: &str) -> Option<usize> {
    body.find(" #")
        .into_iter()
        .chain(body.find("\t#"))
        .min()
        .map(|idx| idx + 1)
}

/// Whether a section header keeps following lines unconditional.
#[must_use]
pub fn is_unconditional_section(name: &str) -> bool {
    name.eq_ignore_ascii_case("all")
}

/// The boot options file as an ordered sequence of lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootConfigDocument {
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl BootConfigDocument {
    /// Build a document from lines; the rendering ends with a newline when
    /// `trailing_newline` is set.
    #[must_use]
    pub const fn from_lines(lines: Vec<Line>, trailing_newline: bool) -> Self {
        Self {
            lines,
            trailing_newline,
        }
    }

    /// Parse text into lines. Never fails: unrecognised lines are kept opaque.
    #[must_use]
    pub fn parse_str(content: &str) -> Self {
        if content.is_empty() {
            return Self::default();
        }
        let trailing_newline = content.ends_with('\n');
        let body = content.strip_suffix('\n').unwrap_or(content);
        let lines = body
            .split('\n')
            .map(|raw| match raw.strip_suffix('\r') {
                Some(text) => Line {
                    text: text.to_string(),
                    crlf: true,
                },
                None => Line::new(raw),
            })
            .collect();
        Self {
            lines,
            trailing_newline,
        }
    }

    /// All lines in file order.
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Whether the file ends with a line terminator.
    #[must_use]
    pub const fn trailing_newline(&self) -> bool {
        self.trailing_newline
    }

    /// Whether the document has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Directives that apply unconditionally: those before any section
    /// header or under `[all]`.
    pub fn unconditional_directives(&self) -> impl Iterator<Item = Directive<'_>> {
        let mut unconditional = true;
        self.lines.iter().filter_map(move |line| match line.kind() {
            LineKind::Section(name) => {
                unconditional = is_unconditional_section(name);
                None
            }
            LineKind::Directive(d) if unconditional => Some(d),
            _ => None,
        })
    }

    /// Serialise back to text.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line.text);
            if line.crlf {
                out.push('\r');
            }
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

impl Artifact for BootConfigDocument {
    const ID: ArtifactId = ArtifactId::BootConfig;

    fn parse(text: &str) -> Result<Self, String> {
        Ok(Self::parse_str(text))
    }

    fn render(&self) -> Result<String, String> {
        Ok(self.render_text())
    }

    fn template() -> Self {
        Self::default()
    }
}
