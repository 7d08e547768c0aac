// Matrix geometry
pub const KEYBOARD_COLS: usize = 13;
pub const KEYBOARD_ROWS: usize = 8;

// Rows are active-low: a cleared bit is a pressed key
const RELEASED_COLUMN: u8 = 0xFF;

/// One full matrix scan, one byte per column.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyState {
    columns: [u8; KEYBOARD_COLS],
}

impl KeyState {
    pub const fn released() -> Self {
        Self {
            columns: [RELEASED_COLUMN; KEYBOARD_COLS],
        }
    }

    /// Returns `None` unless `bytes` holds exactly one byte per column.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEYBOARD_COLS {
            return None;
        }

        let mut columns = [RELEASED_COLUMN; KEYBOARD_COLS];
        columns.copy_from_slice(bytes);
        Some(Self { columns })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.columns
    }

    /// # Panics
    ///
    /// Panics if `col` or `row` lies outside the matrix.
    pub fn is_pressed(&self, col: usize, row: usize) -> bool {
        let mask = row_mask(row);
        self.columns[col] & mask == 0
    }

    /// # Panics
    ///
    /// Panics if `col` or `row` lies outside the matrix.
    pub fn set(&mut self, col: usize, row: usize, pressed: bool) {
        let mask = row_mask(row);
        if pressed {
            self.columns[col] &= !mask;
        } else {
            self.columns[col] |= mask;
        }
    }

    pub fn with_key(mut self, col: usize, row: usize, pressed: bool) -> Self {
        self.set(col, row, pressed);
        self
    }

    pub fn pressed_count(&self) -> usize {
        self.columns
            .iter()
            .map(|column| column.count_zeros() as usize)
            .sum()
    }

    pub fn is_released(&self) -> bool {
        self.columns.iter().all(|column| *column == RELEASED_COLUMN)
    }
}

impl Default for KeyState {
    fn default() -> Self {
        Self::released()
    }
}

impl std::fmt::Debug for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyState[")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", column)?;
        }
        write!(f, "]")
    }
}

#[inline]
fn row_mask(row: usize) -> u8 {
    assert!(row < KEYBOARD_ROWS, "row {} outside the matrix", row);
    1 << row
}
