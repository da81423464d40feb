//! Enrollment ledger.
//!
//! Rows are only ever appended. A student's section for a year is the newest row
//! whose section belongs to that year; later corrections shadow earlier rows
//! without touching them.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::year::AcademicYear;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentSource {
    Registration,
    Transition,
    Correction,
}

impl EnrollmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Transition => "transition",
            Self::Correction => "correction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub section_id: String,
    pub academic_year: String,
    pub grade_level: i64,
    pub letter: String,
    pub source: String,
    pub recorded_at: String,
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn enrollment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        section_id: r.get(2)?,
        academic_year: r.get(3)?,
        grade_level: r.get(4)?,
        letter: r.get(5)?,
        source: r.get(6)?,
        recorded_at: r.get(7)?,
    })
}

const ENROLLMENT_COLUMNS: &str = "e.id, e.student_id, e.section_id, cs.academic_year, cs.grade_level, cs.letter, e.source, e.recorded_at";

pub fn append(
    conn: &Connection,
    student_id: &str,
    section_id: &str,
    source: EnrollmentSource,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, section_id, source, recorded_at)
         VALUES(?, ?, ?, ?, ?)",
        params![id, student_id, section_id, source.as_str(), now_ts()],
    )?;
    Ok(id)
}

/// Oldest first.
pub fn history(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<Enrollment>> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS}
         FROM enrollments e
         JOIN class_sections cs ON cs.id = e.section_id
         WHERE e.student_id = ?
         ORDER BY e.rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn section_for_year(
    conn: &Connection,
    student_id: &str,
    year: AcademicYear,
) -> rusqlite::Result<Option<Enrollment>> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS}
         FROM enrollments e
         JOIN class_sections cs ON cs.id = e.section_id
         WHERE e.student_id = ? AND cs.academic_year = ?
         ORDER BY e.rowid DESC
         LIMIT 1"
    );
    conn.query_row(&sql, params![student_id, year.label()], enrollment_from_row)
        .optional()
}

/// The row the student's current-section pointer is derived from: the newest row
/// in the latest academic year the student appears in.
pub fn current_enrollment(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Enrollment>> {
    let rows = history(conn, student_id)?;
    let mut best: Option<(AcademicYear, Enrollment)> = None;
    for row in rows {
        let Some(year) = AcademicYear::parse(&row.academic_year) else {
            continue;
        };
        // history is oldest first, so `>=` keeps the newest row within a year.
        if best.as_ref().map(|(y, _)| year >= *y).unwrap_or(true) {
            best = Some((year, row));
        }
    }
    Ok(best.map(|(_, row)| row))
}

/// Students whose newest row for the section's year points at this section.
pub fn current_members(conn: &Connection, section_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.student_id
         FROM enrollments e
         JOIN class_sections cs ON cs.id = e.section_id
         WHERE e.section_id = ?1
           AND e.rowid = (
             SELECT MAX(e2.rowid)
             FROM enrollments e2
             JOIN class_sections cs2 ON cs2.id = e2.section_id
             WHERE e2.student_id = e.student_id
               AND cs2.academic_year = cs.academic_year
           )
         ORDER BY e.rowid",
    )?;
    let ids = stmt
        .query_map([section_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
