use std::fmt;

/// An academic-year label of the form `YYYY/YYYY+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AcademicYear {
    start: i32,
    end: i32,
}

impl AcademicYear {
    pub fn new(start: i32) -> Self {
        Self {
            start,
            end: start + 1,
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        let (a, b) = label.trim().split_once('/')?;
        let start: i32 = a.trim().parse().ok()?;
        let end: i32 = b.trim().parse().ok()?;
        if a.trim().len() != 4 || b.trim().len() != 4 || end != start + 1 {
            return None;
        }
        Some(Self { start, end })
    }

    /// Both halves incremented: `2024/2025` -> `2025/2026`.
    pub fn next(self) -> Self {
        Self {
            start: self.start + 1,
            end: self.end + 1,
        }
    }

    pub fn label(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:04}", self.start, self.end)
    }
}
