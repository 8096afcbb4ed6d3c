use serde::{Deserialize, Serialize};

/// Caret location. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Editor range using the field names editors put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRange {
    pub start_line_number: u32,
    pub start_column: u32,
    pub end_line_number: u32,
    pub end_column: u32,
}

impl EditRange {
    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line_number: start_line,
            start_column,
            end_line_number: end_line,
            end_column,
        }
    }

    /// Empty range at `position`, used for pure insertions.
    pub const fn caret(position: Position) -> Self {
        Self::new(position.line, position.column, position.line, position.column)
    }

    pub const fn start(&self) -> Position {
        Position::new(self.start_line_number, self.start_column)
    }

    pub const fn end(&self) -> Position {
        Position::new(self.end_line_number, self.end_column)
    }

    pub fn is_empty(&self) -> bool {
        self.start() == self.end()
    }

    /// Returns the range with start ordered before end.
    pub fn normalized(&self) -> Self {
        let (start, end) = if self.end() < self.start() {
            (self.end(), self.start())
        } else {
            (self.start(), self.end())
        };
        Self::new(start.line, start.column, end.line, end.column)
    }
}

/// One range replacement. A batch of these is applied in order, each against
/// the buffer as left by the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub range: EditRange,
    pub text: String,
}

impl TextChange {
    pub fn replace(range: EditRange, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn insert(at: Position, text: impl Into<String>) -> Self {
        Self::replace(EditRange::caret(at), text)
    }

    pub fn delete(range: EditRange) -> Self {
        Self::replace(range, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn normalized_swaps_reversed_ranges() {
        let reversed = EditRange::new(3, 4, 1, 2);
        assert_eq!(reversed.normalized(), EditRange::new(1, 2, 3, 4));
        let forward = EditRange::new(1, 1, 1, 5);
        assert_eq!(forward.normalized(), forward);
    }

    #[test_timeout::timeout]
    fn range_serializes_with_editor_field_names() {
        let value = serde_json::to_value(EditRange::new(1, 2, 3, 4)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "startLineNumber": 1,
                "startColumn": 2,
                "endLineNumber": 3,
                "endColumn": 4
            })
        );
    }
}
