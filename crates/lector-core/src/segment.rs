//! Segments of the loaded document.
//!
//! A [`SegmentStore`] is immutable once built; loading a new document
//! replaces it wholesale. Cloning is cheap (shared slice).

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

// Sentence end: terminal punctuation (plus closing quotes/brackets) followed
// by whitespace, or a blank line.
static RE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["'\x{201D}\x{2019})\]]*\s+|\n[ \t]*\n\s*"#).unwrap()
});
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One addressable unit of document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub index: usize,
    pub text: String,
}

/// Ordered, read-only sequence of segments for one document.
#[derive(Debug, Clone, Default)]
pub struct SegmentStore {
    segments: Arc<[Segment]>,
}

impl SegmentStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from already-segmented texts. Blank entries are kept so
    /// indices line up with the caller's own numbering.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<Segment> = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Segment {
                index,
                text: text.into(),
            })
            .collect();
        Self {
            segments: segments.into(),
        }
    }

    /// Split plain text into sentence segments.
    pub fn from_text(text: &str) -> Self {
        Self::from_texts(split_sentences(text))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

/// Split text at sentence-ending punctuation followed by whitespace, or at
/// blank lines. Internal whitespace is collapsed and empty pieces dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in RE_BOUNDARY.find_iter(text) {
        // Keep the punctuation, drop the trailing whitespace.
        let end = m.start() + m.as_str().trim_end().len();
        push_normalized(&mut sentences, &text[start..end]);
        start = m.end();
    }
    push_normalized(&mut sentences, &text[start..]);

    sentences
}

fn push_normalized(out: &mut Vec<String>, piece: &str) {
    let collapsed = RE_WHITESPACE.replace_all(piece.trim(), " ");
    if !collapsed.is_empty() {
        out.push(collapsed.into_owned());
    }
}
