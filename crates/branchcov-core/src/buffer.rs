use std::path::{Path, PathBuf};

use crate::{CoverError, Result};

/// Source text with offset <-> line/column mapping.
///
/// Lines are 0-based; columns count characters, not bytes, so that the
/// branch coverage image lines up with what an editor shows.
#[derive(Debug, Clone)]
pub struct Buffer {
    name: String,
    path: Option<PathBuf>,
    source: String,
    first_line: usize,
    line_starts: Vec<usize>,
}

impl Buffer {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = compute_line_starts(&source);
        Self {
            name: name.into(),
            path: None,
            source,
            first_line: 1,
            line_starts,
        }
    }

    /// Read a buffer from disk; the path doubles as the buffer name
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CoverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut buffer = Self::new(path.display().to_string(), source);
        buffer.path = Some(path.to_path_buf());
        Ok(buffer)
    }

    /// Line number reported for the first line of this buffer
    pub fn with_first_line(mut self, first_line: usize) -> Self {
        self.first_line = first_line;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn first_line(&self) -> usize {
        self.first_line
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Source lines without their terminators
    pub fn source_lines(&self) -> Vec<&str> {
        self.source
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }

    /// 0-based line containing the byte offset
    pub fn line_for_position(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    /// 0-based character column of the byte offset within its line
    pub fn column_for_position(&self, offset: usize) -> usize {
        let line = self.line_for_position(offset);
        let start = self.line_starts[line];
        let end = offset.min(self.source.len());
        self.source
            .get(start..end)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0)
    }

    /// Text of a byte range, empty when the range does not resolve
    pub fn slice(&self, range: std::ops::Range<usize>) -> &str {
        self.source.get(range).unwrap_or("")
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(
        source
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i + 1),
    );
    starts
}
