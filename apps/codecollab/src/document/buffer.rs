use collab_proto::{EditRange, Position, TextChange};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("edit starts on line {line} but the buffer has {lines} lines")]
    OutOfBounds { line: u32, lines: u32 },
}

/// Plain text addressed by 1-based line and column; columns count chars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> u32 {
        u32::try_from(self.text.split('\n').count()).unwrap_or(u32::MAX)
    }

    /// Applies one replacement against the current text.
    ///
    /// Reversed ranges are normalised. Columns past a line end and an end
    /// past the last line clamp; a start past the last line is rejected.
    pub fn apply(&mut self, change: &TextChange) -> Result<(), EditError> {
        let range = change.range.normalized();
        let lines = self.line_count();
        if range.start_line_number > lines {
            return Err(EditError::OutOfBounds {
                line: range.start_line_number,
                lines,
            });
        }
        let start = self.offset(range.start());
        let end = if range.end_line_number > lines {
            self.text.len()
        } else {
            self.offset(range.end())
        };
        self.text.replace_range(start..end.max(start), &change.text);
        Ok(())
    }

    /// Clamps `position` onto the text.
    pub fn clamp(&self, position: Position) -> Position {
        let lines = self.line_count();
        let line = position.line.clamp(1, lines);
        let width = self
            .line(line)
            .map(|text| u32::try_from(text.chars().count()).unwrap_or(u32::MAX))
            .unwrap_or(0);
        Position::new(line, position.column.clamp(1, width.saturating_add(1)))
    }

    pub fn end_position(&self) -> Position {
        let lines = self.line_count();
        self.clamp(Position::new(lines, u32::MAX))
    }

    fn line(&self, line: u32) -> Option<&str> {
        self.text.split('\n').nth(line.saturating_sub(1) as usize)
    }

    fn offset(&self, position: Position) -> usize {
        let target = position.line.max(1) as usize - 1;
        let mut line_start = 0;
        for (index, line) in self.text.split('\n').enumerate() {
            if index == target {
                let column = position.column.max(1) as usize - 1;
                return match line.char_indices().nth(column) {
                    Some((byte, _)) => line_start + byte,
                    None => line_start + line.len(),
                };
            }
            line_start += line.len() + 1;
        }
        self.text.len()
    }
}

/// Where the caret lands after inserting `text` at `at`.
pub fn position_after(at: Position, text: &str) -> Position {
    let mut lines = text.split('\n');
    let first = lines.next().unwrap_or_default();
    let mut extra_lines = 0u32;
    let mut last = first;
    for line in lines {
        extra_lines += 1;
        last = line;
    }
    let width = u32::try_from(last.chars().count()).unwrap_or(u32::MAX);
    if extra_lines == 0 {
        Position::new(at.line, at.column.saturating_add(width))
    } else {
        Position::new(at.line.saturating_add(extra_lines), width + 1)
    }
}

/// Range covering the whole buffer, handy for wholesale replacement.
pub fn full_range(buffer: &TextBuffer) -> EditRange {
    let end = buffer.end_position();
    EditRange::new(1, 1, end.line, end.column)
}
