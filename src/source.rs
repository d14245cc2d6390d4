//! Types related to source files.
//!
//! The checker never reads source text itself; the upstream parser attaches a
//! [`Span`] to every syntactic node and we thread those through to
//! diagnostics. Spans on internally synthesised nodes are [`Span::Empty`].

use std::ops::Range;

/// A file id, assigned by whichever file database the embedder uses.
pub type FileId = usize;

/// Byte offsets into source files.
pub type BytePos = u32;

/// A source span, or nothing for synthesised nodes.
#[derive(Debug, Copy, Clone)]
pub enum Span {
    Range(FileRange),
    Empty,
}

impl Span {
    pub fn new(file_id: FileId, start: BytePos, end: BytePos) -> Span {
        Span::Range(FileRange {
            file_id,
            start,
            end,
        })
    }

    /// Merge two spans. Spans from different files (or empty spans) merge to
    /// [`Span::Empty`].
    pub fn merge(&self, other: &Span) -> Span {
        match (self, other) {
            (Span::Range(a), Span::Range(b)) if a.file_id == b.file_id => Span::Range(FileRange {
                file_id: a.file_id,
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            }),
            (Span::Range(_), Span::Empty) => *self,
            (Span::Empty, Span::Range(_)) => *other,
            (_, _) => Span::Empty,
        }
    }

    pub fn file_id(&self) -> Option<FileId> {
        match self {
            Span::Range(range) => Some(range.file_id),
            Span::Empty => None,
        }
    }

    /// The byte range, for handing to `codespan-reporting` labels.
    pub fn byte_range(&self) -> Range<usize> {
        match self {
            Span::Range(range) => range.start as usize..range.end as usize,
            Span::Empty => 0..0,
        }
    }
}

impl Default for Span {
    fn default() -> Span {
        Span::Empty
    }
}

/// A byte range in a single source file.
#[derive(Debug, Copy, Clone)]
pub struct FileRange {
    file_id: FileId,
    start: BytePos,
    end: BytePos,
}

impl FileRange {
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn start(&self) -> BytePos {
        self.start
    }

    pub fn end(&self) -> BytePos {
        self.end
    }
}
