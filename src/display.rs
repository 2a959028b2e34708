use std::sync::Mutex;

/// Character display addressed by 1-based row and column.
/// Rendering and the wire protocol live behind this trait.
pub trait Display: Send + Sync {
    fn clear(&self);
    fn clear_line(&self, row: u8);
    fn write_line(&self, text: &str, row: u8, col: u8);
    fn write_line_centered(&self, text: &str, row: u8);
}

/// Pads `text` so that it sits in the middle of a `cols` wide line.
/// Text longer than the line is truncated.
pub fn center(text: &str, cols: usize) -> String {
    let len = text.chars().count();
    if len >= cols {
        return text.chars().take(cols).collect();
    }
    let left = (cols - len) / 2;
    format!("{:left$}{}", "", text, left = left)
}

/// In-memory text grid. Used as the display when no panel driver is wired,
/// every change is mirrored to the log.
pub struct FrameBuffer {
    cols: usize,
    rows: Mutex<Vec<String>>,
}

impl FrameBuffer {
    pub fn new(rows: u8, cols: u8) -> Self {
        FrameBuffer {
            cols: cols.into(),
            rows: Mutex::new(vec![String::new(); rows.into()]),
        }
    }

    /// Snapshot of one row with trailing blanks removed
    pub fn line(&self, row: u8) -> String {
        let rows = self.rows.lock().unwrap();
        row.checked_sub(1)
            .and_then(|i| rows.get(usize::from(i)))
            .map(|l| l.trim_end().to_string())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.rows.lock().unwrap().iter().any(|l| l.contains(needle))
    }

    fn put(&self, text: &str, row: u8, col: u8) {
        let mut rows = self.rows.lock().unwrap();
        let Some(line) = row
            .checked_sub(1)
            .and_then(|i| rows.get_mut(usize::from(i)))
        else {
            log::warn!("display row {} out of range", row);
            return;
        };
        let mut chars: Vec<char> = format!("{:width$}", line, width = self.cols)
            .chars()
            .collect();
        let start = usize::from(col.max(1) - 1);
        for (i, c) in text.chars().enumerate() {
            if let Some(slot) = chars.get_mut(start + i) {
                *slot = c;
            }
        }
        chars.truncate(self.cols);
        *line = chars.into_iter().collect();
        log::debug!("lcd[{}] {}", row, line.trim_end());
    }
}

impl Display for FrameBuffer {
    fn clear(&self) {
        for line in self.rows.lock().unwrap().iter_mut() {
            line.clear();
        }
    }

    fn clear_line(&self, row: u8) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(line) = row.checked_sub(1).and_then(|i| rows.get_mut(usize::from(i))) {
            line.clear();
        }
    }

    fn write_line(&self, text: &str, row: u8, col: u8) {
        self.put(text, row, col);
    }

    fn write_line_centered(&self, text: &str, row: u8) {
        self.clear_line(row);
        self.put(&center(text, self.cols), row, 1);
    }
}
