//! Find-or-create of next-year class sections.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::year::AcademicYear;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSection {
    pub id: String,
    pub grade_level: i64,
    pub letter: String,
    pub academic_year: String,
    pub homeroom_teacher_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub section: ClassSection,
    pub created: bool,
}

const SECTION_COLUMNS: &str = "id, grade_level, letter, academic_year, homeroom_teacher_id";

fn section_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassSection> {
    Ok(ClassSection {
        id: r.get(0)?,
        grade_level: r.get(1)?,
        letter: r.get(2)?,
        academic_year: r.get(3)?,
        homeroom_teacher_id: r.get(4)?,
    })
}

pub fn load_section(conn: &Connection, section_id: &str) -> rusqlite::Result<Option<ClassSection>> {
    conn.query_row(
        &format!("SELECT {SECTION_COLUMNS} FROM class_sections WHERE id = ?"),
        [section_id],
        section_from_row,
    )
    .optional()
}

pub fn find_section(
    conn: &Connection,
    year: AcademicYear,
    grade_level: i64,
    letter: &str,
) -> rusqlite::Result<Option<ClassSection>> {
    conn.query_row(
        &format!(
            "SELECT {SECTION_COLUMNS} FROM class_sections
             WHERE academic_year = ? AND grade_level = ? AND letter = ?"
        ),
        params![year.label(), grade_level, letter],
        section_from_row,
    )
    .optional()
}

pub fn sections_in_year(conn: &Connection, year: AcademicYear) -> rusqlite::Result<Vec<ClassSection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SECTION_COLUMNS} FROM class_sections
         WHERE academic_year = ?
         ORDER BY grade_level, letter"
    ))?;
    let rows = stmt
        .query_map([year.label()], section_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns the section at (`year`, `grade_level`, `source.letter`), creating it when
/// absent. A new section inherits the source's homeroom teacher and a copy of every
/// teaching assignment. An existing section is returned untouched.
pub fn resolve_destination(
    conn: &Connection,
    year: AcademicYear,
    grade_level: i64,
    source: &ClassSection,
) -> rusqlite::Result<Resolved> {
    if let Some(section) = find_section(conn, year, grade_level, &source.letter)? {
        return Ok(Resolved {
            section,
            created: false,
        });
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO class_sections(id, grade_level, letter, academic_year, homeroom_teacher_id)
         VALUES(?, ?, ?, ?, ?)",
        params![
            id,
            grade_level,
            source.letter,
            year.label(),
            source.homeroom_teacher_id
        ],
    );
    match inserted {
        Ok(_) => {}
        // Lost a race on UNIQUE(grade_level, letter, academic_year): the row is there now.
        Err(e)
            if matches!(
                &e,
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
            ) =>
        {
            if let Some(section) = find_section(conn, year, grade_level, &source.letter)? {
                return Ok(Resolved {
                    section,
                    created: false,
                });
            }
            return Err(e);
        }
        Err(e) => return Err(e),
    }

    clone_assignments(conn, &source.id, &id)?;

    Ok(Resolved {
        section: ClassSection {
            id,
            grade_level,
            letter: source.letter.clone(),
            academic_year: year.label(),
            homeroom_teacher_id: source.homeroom_teacher_id.clone(),
        },
        created: true,
    })
}

fn clone_assignments(conn: &Connection, from_section: &str, to_section: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO teaching_assignments(section_id, subject_id, teacher_id)
         SELECT ?, subject_id, teacher_id
         FROM teaching_assignments
         WHERE section_id = ?",
        params![to_section, from_section],
    )
}
