//! Builds the full source unit by splicing generated fragments into the
//! skeleton at a tracked cursor, recording which line ranges belong to which
//! document object so diagnostics can be attributed later.

/// Line range of one inserted fragment. Lines are 1-based and inclusive;
/// ranges are ascending and non-overlapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSpan {
    pub owner: String,
    pub start: usize,
    pub end: usize,
}

/// Attribution of a diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAttribution {
    /// Inside an inserted fragment owned by this object.
    Fragment(String),
    /// A skeleton line, renumbered back to the skeleton's own counting.
    Skeleton(usize),
    /// Inside the aggregate fragment span but in a gap between fragments;
    /// no further line remapping is possible.
    Ambiguous,
}

#[derive(Debug)]
pub struct SourceAssembler {
    text: String,
    spans: Vec<FragmentSpan>,
    insert_pos: usize,
    insert_line: usize,
}

impl SourceAssembler {
    /// `anchor` is the byte offset in `skeleton` where fragments are
    /// inserted.
    pub fn new(skeleton: &str, anchor: usize) -> Self {
        let insert_line = skeleton[..anchor].matches('\n').count() + 1;
        Self {
            text: skeleton.to_string(),
            spans: Vec::new(),
            insert_pos: anchor,
            insert_line,
        }
    }

    /// Appends `fragment` at the cursor and records its line span under
    /// `owner`. A fragment without a trailing newline occupies no whole line
    /// and gets no span.
    pub fn insert(&mut self, fragment: &str, owner: &str) {
        let newlines = fragment.matches('\n').count();
        self.text.insert_str(self.insert_pos, fragment);
        if newlines > 0 {
            self.spans.push(FragmentSpan {
                owner: owner.to_string(),
                start: self.insert_line,
                end: self.insert_line + newlines - 1,
            });
        }
        self.insert_line += newlines;
        self.insert_pos += fragment.len();
    }

    pub fn source(&self) -> &str {
        &self.text
    }

    pub fn spans(&self) -> &[FragmentSpan] {
        &self.spans
    }

    /// Owner of the fragment containing `line`, if any.
    pub fn owner_at(&self, line: usize) -> Option<&str> {
        self.spans
            .iter()
            .find(|s| line >= s.start && line <= s.end)
            .map(|s| s.owner.as_str())
    }

    #[cfg(test)]
    pub(crate) fn push_span(&mut self, span: FragmentSpan) {
        self.spans.push(span);
    }

    /// Maps an assembled-source line back to its origin.
    pub fn map_line(&self, line: usize) -> LineAttribution {
        let (Some(first), Some(last)) = (self.spans.first(), self.spans.last()) else {
            return LineAttribution::Skeleton(line);
        };
        if line < first.start {
            return LineAttribution::Skeleton(line);
        }
        if line > last.end {
            return LineAttribution::Skeleton(line - (last.end - first.start + 1));
        }
        match self.owner_at(line) {
            Some(owner) => LineAttribution::Fragment(owner.to_string()),
            None => LineAttribution::Ambiguous,
        }
    }
}
