use std::path::Path;

use crate::error::JobError;

pub const DIRECTIVE_MARKER: char = '#';

/// A playlist held in memory as its ordered lines
///
/// Line terminators are stripped on parse and restored on [`PlaylistDocument::to_text`]
/// using the ending detected in the source, so an untouched document renders back
/// to the exact text it was parsed from (mixed endings are normalised).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDocument {
    lines: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
}

impl PlaylistDocument {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            line_ending: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: text.ends_with('\n'),
        }
    }

    /// Reads and parses the playlist stored at `path`
    ///
    /// # Errors
    /// Errors when the file cannot be read or is not UTF-8
    pub async fn load(path: &Path) -> Result<Self, JobError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JobError::io(format!("Reading playlist {}", path.display()), e))?;
        Ok(Self::parse(&text))
    }

    /// Overwrites `path` with the rendered document
    ///
    /// # Errors
    /// Errors when the file cannot be written
    pub async fn persist(&self, path: &Path) -> Result<(), JobError> {
        tokio::fs::write(path, self.to_text())
            .await
            .map_err(|e| JobError::io(format!("Writing playlist {}", path.display()), e))
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Same formatting, different body
    #[must_use]
    pub fn with_lines(&self, lines: Vec<String>) -> Self {
        Self {
            lines,
            line_ending: self.line_ending,
            trailing_newline: self.trailing_newline,
        }
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join(self.line_ending);
        if self.trailing_newline && !self.lines.is_empty() {
            text.push_str(self.line_ending);
        }
        text
    }

    /// Segment references in document order, trimmed
    pub fn segment_references(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| is_segment_reference(l))
            .map(|l| l.trim())
    }
}

#[must_use]
pub fn is_directive(line: &str) -> bool {
    line.starts_with(DIRECTIVE_MARKER)
}

#[must_use]
pub fn is_segment_reference(line: &str) -> bool {
    !is_directive(line) && !line.trim().is_empty()
}

/// Last path component of a reference, without query string or fragment
///
/// `https://cdn.example.com/a/seg0.ts?token=1` -> `seg0.ts`
#[must_use]
pub fn basename(reference: &str) -> &str {
    let path = reference
        .split_once(['?', '#'])
        .map_or(reference, |(path, _)| path);
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
