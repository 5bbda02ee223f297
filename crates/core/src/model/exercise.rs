use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ids::ExerciseId;

//
// ─── CATEGORY ──────────────────────────────────────────────────────────────────
//

/// Passage category a suite draws one exercise from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExerciseCategory {
    P1,
    P2,
    P3,
}

impl ExerciseCategory {
    /// Suite order.
    pub const ALL: [ExerciseCategory; 3] = [Self::P1, Self::P2, Self::P3];

    /// Normalizes the loose category labels found in exam indexes
    /// (`P1`, `p1`, `part1`, `Part 1`, `passage-1`) into the fixed set.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let digits = compact
            .strip_prefix("passage")
            .or_else(|| compact.strip_prefix("part"))
            .or_else(|| compact.strip_prefix('p'))?;
        match digits {
            "1" => Some(Self::P1),
            "2" => Some(Self::P2),
            "3" => Some(Self::P3),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for ExerciseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── EXERCISE REF ──────────────────────────────────────────────────────────────
//

/// One orderable unit of practice content, as listed by the exam index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRef {
    pub id: ExerciseId,
    pub title: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ExerciseRef {
    #[must_use]
    pub fn new(
        id: impl Into<ExerciseId>,
        title: impl Into<String>,
        category: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            kind: kind.into(),
        }
    }

    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case("reading")
    }

    #[must_use]
    pub fn normalized_category(&self) -> Option<ExerciseCategory> {
        ExerciseCategory::normalize(&self.category)
    }
}
