use serde::Serialize;
use thiserror::Error;

/// Whole-run failures. Any of these aborts the transition with nothing committed.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("no class sections exist; cannot determine the current academic year")]
    NoCurrentYear,

    #[error("malformed academic year label: {0:?}")]
    MalformedYear(String),

    #[error("no class sections found for academic year {0}")]
    NoSectionsInYear(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCurrentYear => "no_current_year",
            Self::MalformedYear(_) => "malformed_year",
            Self::NoSectionsInYear(_) => "no_sections",
            Self::InvalidSettings(_) => "bad_config",
            Self::Persistence(_) => "db_tx_failed",
        }
    }
}

pub type TransitionResult<T> = Result<T, TransitionError>;

/// Why a single student was left out of a run. Recorded in the summary, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// The ledger references a student row that cannot be loaded.
    StudentMissing,
    /// Still enrolled in an earlier year than the one being transitioned.
    #[serde(rename_all = "camelCase")]
    LeftBehind { academic_year: String },
    /// A grade record exists but its final mark was never computed.
    #[serde(rename_all = "camelCase")]
    MissingFinalMark { subject_id: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StudentMissing => write!(f, "student record not found"),
            Self::LeftBehind { academic_year } => {
                write!(f, "still enrolled in {academic_year}")
            }
            Self::MissingFinalMark { subject_id } => {
                write!(f, "missing final mark for subject {subject_id}")
            }
        }
    }
}
