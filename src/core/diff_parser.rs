use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@[ ]?(.*)").unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: invalid hunk header: {header}")]
    InvalidHunkHeader { line: usize, header: String },

    #[error("line {line}: hunk found before any file header")]
    UnexpectedHunk { line: usize },

    #[error("line {line}: hunk is shorter than expected")]
    HunkTooShort { line: usize },

    #[error("line {line}: hunk is longer than expected")]
    HunkTooLong { line: usize },

    #[error("line {line}: source file header is not followed by a target file header")]
    MissingTargetHeader { line: usize },

    #[error("line {line}: target file header without a source file header")]
    UnexpectedTargetHeader { line: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    /// Line content without the diff marker, newline included unless the
    /// diff flagged the line with `\ No newline at end of file`.
    pub value: String,
    pub source_line_no: Option<usize>,
    pub target_line_no: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hunk {
    pub source_start: usize,
    pub source_length: usize,
    pub target_start: usize,
    pub target_length: usize,
    pub section_header: String,
    pub lines: Vec<Line>,
}

impl Hunk {
    fn new(source_start: usize, source_length: usize, target_start: usize, target_length: usize, section_header: String) -> Self {
        Self {
            source_start,
            source_length,
            target_start,
            target_length,
            section_header,
            lines: Vec::new(),
        }
    }

    /// Post-change content: context and added lines in diff order.
    pub fn target_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines
            .iter()
            .filter(|line| matches!(line.kind, LineKind::Added | LineKind::Context))
    }

    pub fn source_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines
            .iter()
            .filter(|line| matches!(line.kind, LineKind::Removed | LineKind::Context))
    }

    fn seen_counts(&self) -> (usize, usize) {
        let source = self.source_lines().count();
        let target = self.target_lines().count();
        (source, target)
    }

    fn is_complete(&self) -> bool {
        self.seen_counts() == (self.source_length, self.target_length)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patch {
    pub source_file: String,
    pub target_file: String,
    pub hunks: Vec<Hunk>,
}

impl Patch {
    pub fn is_added_file(&self) -> bool {
        self.source_file == "/dev/null"
    }

    pub fn is_removed_file(&self) -> bool {
        self.target_file == "/dev/null"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSet {
    pub patches: Vec<Patch>,
}

impl PatchSet {
    pub fn parse(diff_content: &str) -> Result<Self, ParseError> {
        Parser::default().run(diff_content)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

impl FromStr for PatchSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> IntoIterator for &'a PatchSet {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}

#[derive(Default)]
struct Parser {
    patches: Vec<Patch>,
    // Set by `diff --git` until the first hunk, so that `---`/`+++` refine
    // the same patch instead of opening another one.
    git_header_open: bool,
    pending_source: Option<(usize, String)>,
    hunk: Option<Hunk>,
    // Cursors into the hunk being filled.
    source_line: usize,
    target_line: usize,
}

impl Parser {
    fn run(mut self, diff_content: &str) -> Result<PatchSet, ParseError> {
        let mut last_line_no = 0;

        for (index, raw) in diff_content.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            last_line_no = line_no;

            if self.hunk_in_progress() {
                self.push_hunk_line(raw, line_no)?;
                continue;
            }

            if raw.starts_with('\\') {
                self.strip_last_newline();
                continue;
            }

            if let Some((source_line_no, _)) = &self.pending_source {
                if !raw.starts_with("+++ ") {
                    return Err(ParseError::MissingTargetHeader {
                        line: *source_line_no,
                    });
                }
            }

            if let Some(rest) = raw.strip_prefix("diff --git ") {
                self.close_hunk();
                let (source, target) = split_git_header(rest);
                self.patches.push(Patch {
                    source_file: source,
                    target_file: target,
                    hunks: Vec::new(),
                });
                self.git_header_open = true;
            } else if let Some(rest) = raw.strip_prefix("--- ") {
                self.close_hunk();
                self.pending_source = Some((line_no, header_file_name(rest)));
            } else if let Some(rest) = raw.strip_prefix("+++ ") {
                let (_, source) = self
                    .pending_source
                    .take()
                    .ok_or(ParseError::UnexpectedTargetHeader { line: line_no })?;
                let target = header_file_name(rest);
                self.open_file(source, target);
            } else if raw.starts_with("@@") {
                self.close_hunk();
                self.open_hunk(raw, line_no)?;
            } else if self.last_hunk_closed() && is_hunk_body_line(raw) {
                return Err(ParseError::HunkTooLong { line: line_no });
            }
        }

        if let Some((line, _)) = self.pending_source {
            return Err(ParseError::MissingTargetHeader { line });
        }
        if self.hunk_in_progress() {
            return Err(ParseError::HunkTooShort {
                line: last_line_no + 1,
            });
        }
        self.close_hunk();

        Ok(PatchSet {
            patches: self.patches,
        })
    }

    fn hunk_in_progress(&self) -> bool {
        self.hunk.as_ref().map_or(false, |hunk| !hunk.is_complete())
    }

    fn last_hunk_closed(&self) -> bool {
        self.hunk.is_some()
            || self
                .patches
                .last()
                .map_or(false, |patch| !patch.hunks.is_empty())
    }

    fn open_file(&mut self, source: String, target: String) {
        self.close_hunk();
        if self.git_header_open {
            if let Some(patch) = self.patches.last_mut() {
                patch.source_file = source;
                patch.target_file = target;
            }
        } else {
            self.patches.push(Patch {
                source_file: source,
                target_file: target,
                hunks: Vec::new(),
            });
        }
        self.git_header_open = false;
    }

    fn open_hunk(&mut self, raw: &str, line_no: usize) -> Result<(), ParseError> {
        if self.patches.is_empty() {
            return Err(ParseError::UnexpectedHunk { line: line_no });
        }

        let header = raw.trim_end_matches(['\r', '\n']);
        let invalid = || ParseError::InvalidHunkHeader {
            line: line_no,
            header: header.to_string(),
        };
        let caps = HUNK_HEADER.captures(header).ok_or_else(invalid)?;
        let number = |idx: usize, default: usize| -> Result<usize, ParseError> {
            match caps.get(idx) {
                Some(m) => m.as_str().parse().map_err(|_| invalid()),
                None => Ok(default),
            }
        };

        let source_start = number(1, 0)?;
        let source_length = number(2, 1)?;
        let target_start = number(3, 0)?;
        let target_length = number(4, 1)?;
        let section_header = caps.get(5).map_or("", |m| m.as_str()).to_string();

        // Ranges must stay addressable so line cursors cannot overflow.
        if source_start.checked_add(source_length).is_none()
            || target_start.checked_add(target_length).is_none()
        {
            return Err(invalid());
        }

        self.git_header_open = false;
        self.source_line = source_start;
        self.target_line = target_start;
        self.hunk = Some(Hunk::new(
            source_start,
            source_length,
            target_start,
            target_length,
            section_header,
        ));
        Ok(())
    }

    fn push_hunk_line(&mut self, raw: &str, line_no: usize) -> Result<(), ParseError> {
        let Some(hunk) = self.hunk.as_mut() else {
            return Ok(());
        };

        if raw.starts_with('\\') {
            if let Some(last) = hunk.lines.last_mut() {
                trim_newline(&mut last.value);
            }
            return Ok(());
        }

        let (kind, value) = match raw.chars().next() {
            Some('+') => (LineKind::Added, &raw[1..]),
            Some('-') => (LineKind::Removed, &raw[1..]),
            Some(' ') => (LineKind::Context, &raw[1..]),
            // Some tools drop the leading space of blank context lines.
            Some('\r') | Some('\n') => (LineKind::Context, raw),
            _ => return Err(ParseError::HunkTooShort { line: line_no }),
        };

        let (source_seen, target_seen) = hunk.seen_counts();
        let overflows = match kind {
            LineKind::Added => target_seen >= hunk.target_length,
            LineKind::Removed => source_seen >= hunk.source_length,
            LineKind::Context => {
                source_seen >= hunk.source_length || target_seen >= hunk.target_length
            }
        };
        if overflows {
            return Err(ParseError::HunkTooLong { line: line_no });
        }

        let (source_line_no, target_line_no) = match kind {
            LineKind::Added => (None, Some(advance(&mut self.target_line))),
            LineKind::Removed => (Some(advance(&mut self.source_line)), None),
            LineKind::Context => (
                Some(advance(&mut self.source_line)),
                Some(advance(&mut self.target_line)),
            ),
        };

        hunk.lines.push(Line {
            kind,
            value: value.to_string(),
            source_line_no,
            target_line_no,
        });
        Ok(())
    }

    fn close_hunk(&mut self) {
        if let Some(hunk) = self.hunk.take() {
            if let Some(patch) = self.patches.last_mut() {
                patch.hunks.push(hunk);
            }
        }
    }

    fn strip_last_newline(&mut self) {
        let last = match self.hunk.as_mut() {
            Some(hunk) => hunk.lines.last_mut(),
            None => self
                .patches
                .last_mut()
                .and_then(|patch| patch.hunks.last_mut())
                .and_then(|hunk| hunk.lines.last_mut()),
        };
        if let Some(line) = last {
            trim_newline(&mut line.value);
        }
    }
}

/// Returns the current line number and moves the cursor past it.
fn advance(cursor: &mut usize) -> usize {
    let current = *cursor;
    *cursor = cursor.saturating_add(1);
    current
}

fn trim_newline(value: &mut String) {
    if value.ends_with('\n') {
        value.pop();
        if value.ends_with('\r') {
            value.pop();
        }
    }
}

fn is_hunk_body_line(raw: &str) -> bool {
    matches!(raw.chars().next(), Some('+') | Some('-') | Some(' '))
}

/// File name of a `---`/`+++` header, minus any tab-separated timestamp.
fn header_file_name(rest: &str) -> String {
    let name = rest.trim_end_matches(['\r', '\n']);
    name.split('\t').next().unwrap_or(name).to_string()
}

fn split_git_header(rest: &str) -> (String, String) {
    let rest = rest.trim_end_matches(['\r', '\n']);

    // Unrenamed files repeat the same path, which may itself contain " b/".
    let mid = rest.len() / 2;
    if rest.len() % 2 == 1 && rest.is_char_boundary(mid) && rest.is_char_boundary(mid + 1) {
        let (source, target) = (&rest[..mid], &rest[mid + 1..]);
        if rest.as_bytes()[mid] == b' '
            && source.strip_prefix("a/").is_some()
            && source.strip_prefix("a/") == target.strip_prefix("b/")
        {
            return (source.to_string(), target.to_string());
        }
    }

    match rest.find(" b/") {
        Some(idx) => (rest[..idx].to_string(), rest[idx + 1..].to_string()),
        None => {
            let mut parts = rest.split_whitespace();
            let source = parts.next().unwrap_or_default().to_string();
            let target = parts.next().unwrap_or_default().to_string();
            (source, target)
        }
    }
}
