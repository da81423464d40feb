use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::rules::{DistinguishedNegatives, FinalMark};

/// How the first-language and mathematics subjects are located in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum SubjectRoles {
    /// Case-insensitive substring search over subject names; first catalog match wins.
    #[serde(rename_all = "camelCase")]
    NameSearch {
        first_language_terms: Vec<String>,
        mathematics_terms: Vec<String>,
    },
    /// Explicit subject ids.
    #[serde(rename_all = "camelCase")]
    Configured {
        first_language: Option<String>,
        mathematics: Option<String>,
    },
}

impl Default for SubjectRoles {
    fn default() -> Self {
        Self::NameSearch {
            first_language_terms: vec!["português".to_string(), "portuguese".to_string()],
            mathematics_terms: vec![
                "matemática".to_string(),
                "mathematics".to_string(),
                "math".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistinguishedSubjects {
    pub first_language: Option<String>,
    pub mathematics: Option<String>,
}

impl DistinguishedSubjects {
    pub fn negatives(&self, finals: &[FinalMark], pass_mark: i64) -> DistinguishedNegatives {
        let failed = |id: &Option<String>| {
            id.as_deref().is_some_and(|id| {
                finals
                    .iter()
                    .any(|f| f.subject_id == id && f.mark < pass_mark)
            })
        };
        DistinguishedNegatives {
            first_language: failed(&self.first_language),
            mathematics: failed(&self.mathematics),
        }
    }
}

impl SubjectRoles {
    pub fn resolve(&self, conn: &Connection) -> rusqlite::Result<DistinguishedSubjects> {
        match self {
            SubjectRoles::Configured {
                first_language,
                mathematics,
            } => Ok(DistinguishedSubjects {
                first_language: first_language.clone(),
                mathematics: mathematics.clone(),
            }),
            SubjectRoles::NameSearch {
                first_language_terms,
                mathematics_terms,
            } => {
                let mut stmt = conn.prepare("SELECT id, name FROM subjects ORDER BY rowid")?;
                let catalog = stmt
                    .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DistinguishedSubjects {
                    first_language: search(&catalog, first_language_terms),
                    mathematics: search(&catalog, mathematics_terms),
                })
            }
        }
    }
}

fn search(catalog: &[(String, String)], terms: &[String]) -> Option<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .find_map(|term| {
            catalog
                .iter()
                .find(|(_, name)| name.to_lowercase().contains(&term))
                .map(|(id, _)| id.clone())
        })
}
