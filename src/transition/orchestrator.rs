//! Year-end transition pass.
//!
//! The whole pass runs inside one `BEGIN IMMEDIATE` transaction: the write lock
//! serializes concurrent runs against the same workspace, and any persistence
//! error drops the transaction so nothing is committed.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use super::error::{SkipReason, TransitionError, TransitionResult};
use super::ledger::{self, EnrollmentSource};
use super::resolver::{self, ClassSection};
use super::rules::{Decision, FinalMark, PromotionPolicy};
use super::settings;
use super::subjects::{DistinguishedSubjects, SubjectRoles};
use super::year::AcademicYear;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Commit,
    /// Runs the full pass and rolls it back.
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedStudent {
    pub student_id: String,
    pub section_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSummary {
    pub from_academic_year: String,
    pub new_academic_year: String,
    pub promoted: usize,
    pub retained: usize,
    pub graduated: usize,
    pub sections_created: usize,
    pub already_transitioned: usize,
    pub skipped: Vec<SkippedStudent>,
    pub policy_gaps: Vec<i64>,
}

/// Most recent academic-year label present among class sections.
pub fn current_year(conn: &Connection) -> TransitionResult<AcademicYear> {
    let mut stmt = conn.prepare("SELECT DISTINCT academic_year FROM class_sections")?;
    let labels = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut latest: Option<AcademicYear> = None;
    for label in labels {
        let year = AcademicYear::parse(&label).ok_or(TransitionError::MalformedYear(label))?;
        latest = latest.max(Some(year));
    }
    latest.ok_or(TransitionError::NoCurrentYear)
}

pub fn run(conn: &mut Connection, mode: RunMode) -> TransitionResult<TransitionSummary> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = current_year(&tx)?;
    let policy = settings::load_promotion_policy(&tx)
        .map_err(|e| TransitionError::InvalidSettings(e.to_string()))?;
    let roles = settings::load_subject_roles(&tx)
        .map_err(|e| TransitionError::InvalidSettings(e.to_string()))?;

    let summary = transition_year(&tx, current, &policy, &roles)?;

    match mode {
        RunMode::Commit => {
            record_run(&tx, &summary)?;
            tx.commit()?;
            tracing::info!(
                from_year = %summary.from_academic_year,
                to_year = %summary.new_academic_year,
                "transition committed"
            );
        }
        RunMode::Preview => {
            tx.rollback()?;
        }
    }
    Ok(summary)
}

/// Moves every student enrolled in `current` into next year's sections.
///
/// Students that already hold a next-year enrollment, or that graduated, are
/// counted as `already_transitioned` and left alone, so repeating a pass for the
/// same year converges instead of duplicating rows.
pub fn transition_year(
    conn: &Connection,
    current: AcademicYear,
    policy: &PromotionPolicy,
    roles: &SubjectRoles,
) -> TransitionResult<TransitionSummary> {
    let next = current.next();
    let span = tracing::info_span!("transition", from_year = %current, to_year = %next);
    let _guard = span.enter();

    let sources = resolver::sections_in_year(conn, current)?;
    if sources.is_empty() {
        return Err(TransitionError::NoSectionsInYear(current.label()));
    }

    let distinguished = roles.resolve(conn)?;
    if distinguished.first_language.is_none() || distinguished.mathematics.is_none() {
        tracing::warn!(?distinguished, "distinguished subjects not fully resolved");
    }

    let mut summary = TransitionSummary {
        from_academic_year: current.label(),
        new_academic_year: next.label(),
        ..TransitionSummary::default()
    };

    for source in &sources {
        transition_section(conn, source, current, next, policy, &distinguished, &mut summary)?;
    }
    report_left_behind(conn, current, &mut summary)?;

    tracing::info!(
        promoted = summary.promoted,
        retained = summary.retained,
        graduated = summary.graduated,
        sections_created = summary.sections_created,
        already_transitioned = summary.already_transitioned,
        skipped = summary.skipped.len(),
        "transition pass finished"
    );
    Ok(summary)
}

fn transition_section(
    conn: &Connection,
    source: &ClassSection,
    current: AcademicYear,
    next: AcademicYear,
    policy: &PromotionPolicy,
    distinguished: &DistinguishedSubjects,
    summary: &mut TransitionSummary,
) -> TransitionResult<()> {
    if policy.band_for(source.grade_level).is_none()
        && !summary.policy_gaps.contains(&source.grade_level)
    {
        tracing::warn!(
            grade_level = source.grade_level,
            "no promotion band for grade level; students default to promote"
        );
        summary.policy_gaps.push(source.grade_level);
    }

    let promoted = if policy.is_terminal(source.grade_level) {
        None
    } else {
        Some(resolve(conn, next, source.grade_level + 1, source, summary)?)
    };
    let retained = resolve(conn, next, source.grade_level, source, summary)?;

    for student_id in ledger::current_members(conn, &source.id)? {
        if ledger::section_for_year(conn, &student_id, next)?.is_some()
            || has_graduated(conn, &student_id)?
        {
            summary.already_transitioned += 1;
            continue;
        }

        let finals = match load_finals(conn, &student_id, current)? {
            Ok(f) => f,
            Err(reason) => {
                tracing::warn!(
                    student_id = %student_id,
                    section_id = %source.id,
                    %reason,
                    "student skipped"
                );
                summary.skipped.push(SkippedStudent {
                    student_id,
                    section_id: source.id.clone(),
                    reason,
                });
                continue;
            }
        };

        let flags = distinguished.negatives(&finals, policy.pass_mark);
        match (policy.evaluate(source.grade_level, &finals, flags), &promoted) {
            (Decision::Retain, _) => {
                place(conn, &student_id, &retained, source.grade_level)?;
                summary.retained += 1;
            }
            (Decision::Promote, Some(dest)) => {
                place(conn, &student_id, dest, source.grade_level + 1)?;
                summary.promoted += 1;
            }
            // Passing the terminal level is graduation.
            (Decision::Promote, None) | (Decision::Graduate, _) => {
                conn.execute(
                    "UPDATE students SET current_section_id = NULL, updated_at = ? WHERE id = ?",
                    params![now_ts(), student_id],
                )?;
                summary.graduated += 1;
            }
        }
    }
    Ok(())
}

fn resolve(
    conn: &Connection,
    next: AcademicYear,
    grade_level: i64,
    source: &ClassSection,
    summary: &mut TransitionSummary,
) -> TransitionResult<ClassSection> {
    let resolved = resolver::resolve_destination(conn, next, grade_level, source)?;
    if resolved.created {
        tracing::info!(
            section_id = %resolved.section.id,
            grade_level,
            letter = %resolved.section.letter,
            "created section"
        );
        summary.sections_created += 1;
    }
    Ok(resolved.section)
}

fn place(
    conn: &Connection,
    student_id: &str,
    dest: &ClassSection,
    grade_level: i64,
) -> TransitionResult<()> {
    ledger::append(conn, student_id, &dest.id, EnrollmentSource::Transition)?;
    conn.execute(
        "UPDATE students SET grade_level = ?, current_section_id = ?, updated_at = ? WHERE id = ?",
        params![grade_level, dest.id, now_ts(), student_id],
    )?;
    Ok(())
}

/// A current-year member with no section pointer was graduated by an earlier pass.
fn has_graduated(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    let pointer: Option<Option<String>> = conn
        .query_row(
            "SELECT current_section_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(matches!(pointer, Some(None)))
}

/// Students still pointing at a section from an earlier year were skipped by a
/// previous pass; they stay in every later summary until someone moves them.
fn report_left_behind(
    conn: &Connection,
    current: AcademicYear,
    summary: &mut TransitionSummary,
) -> TransitionResult<()> {
    let mut stmt = conn.prepare(
        "SELECT s.id, cs.id, cs.academic_year
         FROM students s
         JOIN class_sections cs ON cs.id = s.current_section_id
         ORDER BY s.rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, section_id, label) in rows {
        let behind = AcademicYear::parse(&label).is_some_and(|y| y < current);
        if !behind {
            continue;
        }
        tracing::warn!(
            student_id = %student_id,
            academic_year = %label,
            "student left behind by an earlier transition"
        );
        summary.skipped.push(SkippedStudent {
            student_id,
            section_id,
            reason: SkipReason::LeftBehind {
                academic_year: label,
            },
        });
    }
    Ok(())
}

/// An empty grade set counts as zero negatives.
fn load_finals(
    conn: &Connection,
    student_id: &str,
    year: AcademicYear,
) -> TransitionResult<Result<Vec<FinalMark>, SkipReason>> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Ok(Err(SkipReason::StudentMissing));
    }

    let mut stmt = conn.prepare(
        "SELECT subject_id, final_mark
         FROM grade_records
         WHERE student_id = ? AND academic_year = ?
         ORDER BY subject_id",
    )?;
    let rows = stmt
        .query_map(params![student_id, year.label()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<i64>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut finals = Vec::with_capacity(rows.len());
    for (subject_id, mark) in rows {
        match mark {
            Some(mark) => finals.push(FinalMark { subject_id, mark }),
            None => return Ok(Err(SkipReason::MissingFinalMark { subject_id })),
        }
    }
    Ok(Ok(finals))
}

fn record_run(conn: &Connection, summary: &TransitionSummary) -> TransitionResult<()> {
    let summary_json = serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "INSERT INTO transition_runs(id, from_year, to_year, summary_json, ran_at)
         VALUES(?, ?, ?, ?, ?)",
        params![
            Uuid::new_v4().to_string(),
            summary.from_academic_year,
            summary.new_academic_year,
            summary_json,
            now_ts()
        ],
    )?;
    Ok(())
}

/// Committed runs, newest first.
pub fn run_history(conn: &Connection) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_year, to_year, summary_json, ran_at
         FROM transition_runs
         ORDER BY rowid DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let summary_raw: String = r.get(3)?;
            Ok(serde_json::json!({
                "id": r.get::<_, String>(0)?,
                "fromAcademicYear": r.get::<_, String>(1)?,
                "newAcademicYear": r.get::<_, String>(2)?,
                "summary": serde_json::from_str::<serde_json::Value>(&summary_raw)
                    .unwrap_or(serde_json::Value::Null),
                "ranAt": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    struct School {
        conn: Connection,
    }

    impl School {
        fn new() -> Self {
            let conn = Connection::open_in_memory().expect("open");
            db::init_schema(&conn).expect("schema");
            conn.execute("INSERT INTO teachers(id, name) VALUES('t1', 'Marta')", [])
                .expect("teacher");
            for (id, name) in [
                ("pt", "Português"),
                ("mat", "Matemática"),
                ("hist", "História"),
                ("ing", "Inglês"),
            ] {
                conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", params![id, name])
                    .expect("subject");
            }
            Self { conn }
        }

        fn section(&self, id: &str, grade: i64, letter: &str, year: &str) {
            self.conn
                .execute(
                    "INSERT INTO class_sections(id, grade_level, letter, academic_year, homeroom_teacher_id)
                     VALUES(?, ?, ?, ?, 't1')",
                    params![id, grade, letter, year],
                )
                .expect("section");
            for subject in ["pt", "mat"] {
                self.conn
                    .execute(
                        "INSERT INTO teaching_assignments(section_id, subject_id, teacher_id) VALUES(?, ?, 't1')",
                        params![id, subject],
                    )
                    .expect("assignment");
            }
        }

        fn student(&self, id: &str, section_id: &str, grade: i64) {
            self.conn
                .execute(
                    "INSERT INTO students(id, name, grade_level, current_section_id) VALUES(?, ?, ?, ?)",
                    params![id, id, grade, section_id],
                )
                .expect("student");
            ledger::append(&self.conn, id, section_id, EnrollmentSource::Registration)
                .expect("registration");
        }

        fn finals(&self, student_id: &str, year: &str, marks: &[(&str, Option<i64>)]) {
            for (subject, mark) in marks {
                self.conn
                    .execute(
                        "INSERT INTO grade_records(id, student_id, subject_id, academic_year, final_mark)
                         VALUES(?, ?, ?, ?, ?)",
                        params![Uuid::new_v4().to_string(), student_id, subject, year, mark],
                    )
                    .expect("grade");
            }
        }

        fn count(&self, sql: &str) -> i64 {
            self.conn.query_row(sql, [], |r| r.get(0)).expect("count")
        }

        fn pointer(&self, student_id: &str) -> (Option<i64>, Option<String>) {
            self.conn
                .query_row(
                    "SELECT grade_level, current_section_id FROM students WHERE id = ?",
                    [student_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .expect("pointer")
        }
    }

    const Y24: &str = "2024/2025";

    fn passing() -> Vec<(&'static str, Option<i64>)> {
        vec![("pt", Some(14)), ("mat", Some(12)), ("hist", Some(11)), ("ing", Some(15))]
    }

    #[test]
    fn current_year_is_latest_label() {
        let school = School::new();
        school.section("a", 7, "A", "2023/2024");
        school.section("b", 7, "A", Y24);
        school.section("c", 5, "C", "2022/2023");
        assert_eq!(current_year(&school.conn).expect("year").label(), Y24);
    }

    #[test]
    fn no_sections_aborts_before_any_write() {
        let mut school = School::new();
        let err = run(&mut school.conn, RunMode::Commit).expect_err("must fail");
        assert!(matches!(err, TransitionError::NoCurrentYear));
        assert_eq!(school.count("SELECT COUNT(*) FROM transition_runs"), 0);
    }

    #[test]
    fn malformed_year_label_aborts() {
        let mut school = School::new();
        school.section("a", 7, "A", "next year");
        let err = run(&mut school.conn, RunMode::Commit).expect_err("must fail");
        assert!(matches!(err, TransitionError::MalformedYear(_)));
        assert_eq!(school.count("SELECT COUNT(*) FROM class_sections"), 1);
    }

    #[test]
    fn full_pass_promotes_retains_and_graduates() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.section("12a", 12, "A", Y24);
        school.student("ana", "7a", 7);
        school.student("rui", "7a", 7);
        school.student("eva", "12a", 12);
        school.finals("ana", Y24, &passing());
        school.finals(
            "rui",
            Y24,
            &[("pt", Some(8)), ("mat", Some(7)), ("hist", Some(9)), ("ing", Some(4))],
        );
        school.finals("eva", Y24, &passing());

        let summary = run(&mut school.conn, RunMode::Commit).expect("run");
        assert_eq!(summary.new_academic_year, "2025/2026");
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.retained, 1);
        assert_eq!(summary.graduated, 1);
        // 8A + 7A for the grade-7 section, 12A only for the terminal one.
        assert_eq!(summary.sections_created, 3);
        assert!(summary.skipped.is_empty());

        let next = AcademicYear::new(2025);
        let ana = ledger::section_for_year(&school.conn, "ana", next)
            .expect("query")
            .expect("enrolled");
        assert_eq!(ana.grade_level, 8);
        assert_eq!(school.pointer("ana"), (Some(8), Some(ana.section_id.clone())));

        let rui = ledger::section_for_year(&school.conn, "rui", next)
            .expect("query")
            .expect("enrolled");
        assert_eq!(rui.grade_level, 7);
        assert_eq!(school.pointer("rui").0, Some(7));

        assert!(ledger::section_for_year(&school.conn, "eva", next)
            .expect("query")
            .is_none());
        assert_eq!(school.pointer("eva"), (Some(12), None));
        assert_eq!(ledger::history(&school.conn, "eva").expect("history").len(), 1);

        assert_eq!(school.count("SELECT COUNT(*) FROM transition_runs"), 1);
        assert_eq!(
            school.count(
                "SELECT COUNT(*) FROM class_sections WHERE academic_year = '2025/2026' AND grade_level = 13"
            ),
            0
        );
    }

    #[test]
    fn repeating_the_same_year_converges() {
        let school = School::new();
        school.section("7a", 7, "A", Y24);
        school.section("9b", 9, "B", Y24);
        school.section("12a", 12, "A", Y24);
        school.student("ana", "7a", 7);
        school.student("rui", "9b", 9);
        school.student("eva", "12a", 12);
        school.finals("ana", Y24, &passing());
        school.finals("rui", Y24, &passing());
        school.finals("eva", Y24, &passing());

        let policy = PromotionPolicy::default();
        let roles = SubjectRoles::default();
        let year = AcademicYear::new(2024);

        let first = transition_year(&school.conn, year, &policy, &roles).expect("first");
        let sections = school.count("SELECT COUNT(*) FROM class_sections");
        let assignments = school.count("SELECT COUNT(*) FROM teaching_assignments");
        let enrollments = school.count("SELECT COUNT(*) FROM enrollments");

        let second = transition_year(&school.conn, year, &policy, &roles).expect("second");
        assert_eq!(first.promoted, 2);
        assert_eq!(first.graduated, 1);
        assert_eq!(first.sections_created, 5);
        assert_eq!(second.sections_created, 0);
        assert_eq!(second.promoted, 0);
        assert_eq!(second.graduated, 0);
        assert_eq!(second.already_transitioned, 3);
        assert_eq!(school.count("SELECT COUNT(*) FROM class_sections"), sections);
        assert_eq!(school.count("SELECT COUNT(*) FROM teaching_assignments"), assignments);
        assert_eq!(school.count("SELECT COUNT(*) FROM enrollments"), enrollments);
        assert_eq!(school.pointer("ana").0, Some(8));
        assert_eq!(school.pointer("eva"), (Some(12), None));
    }

    #[test]
    fn consecutive_years_build_exact_history() {
        let mut school = School::new();
        school.section("5a", 5, "A", "2020/2021");
        school.student("ana", "5a", 5);

        let years = 4;
        for k in 0..years {
            let label = AcademicYear::new(2020 + k).label();
            school.finals("ana", &label, &passing());
            let summary = run(&mut school.conn, RunMode::Commit).expect("run");
            assert_eq!(summary.from_academic_year, label);
            assert_eq!(summary.promoted, 1);
        }

        let rows = ledger::history(&school.conn, "ana").expect("history");
        let transitions = rows.iter().filter(|r| r.source == "transition").count();
        assert_eq!(transitions, years as usize);

        for k in 0..=years {
            let year = AcademicYear::new(2020 + k);
            let row = ledger::section_for_year(&school.conn, "ana", year)
                .expect("query")
                .expect("row for year");
            assert_eq!(row.academic_year, year.label());
            assert_eq!(row.grade_level, 5 + k as i64);
        }
        assert_eq!(school.pointer("ana").0, Some(9));
    }

    #[test]
    fn empty_grade_set_counts_as_zero_negatives() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.section("12a", 12, "A", Y24);
        school.student("ana", "7a", 7);
        school.student("eva", "12a", 12);

        let first = run(&mut school.conn, RunMode::Commit).expect("first");
        assert_eq!(first.promoted, 1);
        assert_eq!(first.graduated, 1);
        assert!(first.skipped.is_empty());
        assert_eq!(school.pointer("ana").0, Some(8));

        let second = run(&mut school.conn, RunMode::Commit).expect("second");
        assert_eq!(second.from_academic_year, "2025/2026");
        assert_eq!(second.promoted, 1);
        assert!(second.skipped.is_empty());
        let ana = ledger::current_enrollment(&school.conn, "ana")
            .expect("query")
            .expect("enrolled");
        assert_eq!(ana.academic_year, "2026/2027");
        assert_eq!(ana.grade_level, 9);
        assert_eq!(school.pointer("eva"), (Some(12), None));
    }

    #[test]
    fn unresolved_students_are_reported_on_every_later_run() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.student("ana", "7a", 7);
        school.student("eva", "7a", 7);
        school.finals("ana", Y24, &passing());
        school.finals("eva", Y24, &[("pt", Some(12)), ("mat", None)]);

        let first = run(&mut school.conn, RunMode::Commit).expect("first");
        assert_eq!(first.promoted, 1);
        assert_eq!(first.skipped.len(), 1);
        assert_eq!(first.skipped[0].student_id, "eva");
        assert_eq!(
            first.skipped[0].reason,
            SkipReason::MissingFinalMark {
                subject_id: "mat".to_string()
            }
        );
        assert_eq!(school.pointer("eva"), (Some(7), Some("7a".to_string())));

        let second = run(&mut school.conn, RunMode::Commit).expect("second");
        assert_eq!(second.from_academic_year, "2025/2026");
        assert_eq!(second.promoted, 1);
        assert_eq!(second.skipped.len(), 1);
        assert_eq!(second.skipped[0].student_id, "eva");
        assert_eq!(second.skipped[0].section_id, "7a");
        assert_eq!(
            second.skipped[0].reason,
            SkipReason::LeftBehind {
                academic_year: Y24.to_string()
            }
        );
        assert_eq!(school.pointer("eva"), (Some(7), Some("7a".to_string())));
    }

    #[test]
    fn failure_midway_commits_nothing() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.student("ana", "7a", 7);
        school.student("rui", "7a", 7);
        school.finals("ana", Y24, &passing());
        school.finals("rui", Y24, &passing());
        school
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_rui BEFORE INSERT ON enrollments
                 WHEN NEW.student_id = 'rui'
                 BEGIN SELECT RAISE(ABORT, 'enrollment rejected'); END;",
            )
            .expect("trigger");

        let sections = school.count("SELECT COUNT(*) FROM class_sections");
        let assignments = school.count("SELECT COUNT(*) FROM teaching_assignments");
        let enrollments = school.count("SELECT COUNT(*) FROM enrollments");

        let err = run(&mut school.conn, RunMode::Commit).expect_err("must fail");
        assert!(matches!(err, TransitionError::Persistence(_)));
        assert_eq!(err.code(), "db_tx_failed");

        assert_eq!(school.count("SELECT COUNT(*) FROM class_sections"), sections);
        assert_eq!(school.count("SELECT COUNT(*) FROM teaching_assignments"), assignments);
        assert_eq!(school.count("SELECT COUNT(*) FROM enrollments"), enrollments);
        assert_eq!(school.count("SELECT COUNT(*) FROM transition_runs"), 0);
        assert_eq!(school.pointer("ana"), (Some(7), Some("7a".to_string())));
    }

    #[test]
    fn unreadable_settings_abort_with_bad_config() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.student("ana", "7a", 7);
        db::settings_set_json(
            &school.conn,
            settings::PROMOTION_KEY,
            &serde_json::json!({ "passMark": "ten" }),
        )
        .expect("settings");

        let err = run(&mut school.conn, RunMode::Commit).expect_err("must fail");
        assert!(matches!(err, TransitionError::InvalidSettings(_)));
        assert_eq!(err.code(), "bad_config");
        assert_eq!(school.count("SELECT COUNT(*) FROM class_sections"), 1);
    }

    #[test]
    fn grade_nine_tie_break_uses_catalog_subjects() {
        let mut school = School::new();
        school.section("9a", 9, "A", Y24);
        school.student("ana", "9a", 9);
        school.student("rui", "9a", 9);
        school.finals(
            "ana",
            Y24,
            &[("pt", Some(12)), ("mat", Some(8)), ("hist", Some(9)), ("ing", Some(14))],
        );
        school.finals(
            "rui",
            Y24,
            &[("pt", Some(7)), ("mat", Some(9)), ("hist", Some(12)), ("ing", Some(14))],
        );

        let summary = run(&mut school.conn, RunMode::Commit).expect("run");
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.retained, 1);
        assert_eq!(school.pointer("ana").0, Some(10));
        assert_eq!(school.pointer("rui").0, Some(9));
    }

    #[test]
    fn undefined_band_promotes_and_reports_gap() {
        let mut school = School::new();
        school.section("3a", 3, "A", Y24);
        school.student("ana", "3a", 3);
        school.finals("ana", Y24, &[("pt", Some(2)), ("mat", Some(3))]);

        let summary = run(&mut school.conn, RunMode::Commit).expect("run");
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.policy_gaps, vec![3]);
    }

    #[test]
    fn preview_leaves_no_trace() {
        let mut school = School::new();
        school.section("7a", 7, "A", Y24);
        school.student("ana", "7a", 7);
        school.finals("ana", Y24, &passing());

        let preview = run(&mut school.conn, RunMode::Preview).expect("preview");
        assert_eq!(preview.promoted, 1);
        assert_eq!(preview.sections_created, 2);
        assert_eq!(school.count("SELECT COUNT(*) FROM class_sections"), 1);
        assert_eq!(school.count("SELECT COUNT(*) FROM enrollments"), 1);
        assert_eq!(school.count("SELECT COUNT(*) FROM transition_runs"), 0);
        assert_eq!(school.pointer("ana"), (Some(7), Some("7a".to_string())));

        let committed = run(&mut school.conn, RunMode::Commit).expect("commit");
        assert_eq!(committed, preview);
        assert_eq!(run_history(&school.conn).expect("history").len(), 1);
    }
}
