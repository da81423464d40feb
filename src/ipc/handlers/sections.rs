use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, is_unique_violation, opt_i64, opt_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::transition::ledger;
use crate::transition::resolver::{self, ClassSection};
use crate::transition::AcademicYear;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

const MARK_MIN: i64 = 0;
const MARK_MAX: i64 = 20;

fn load_section_or_err(
    conn: &Connection,
    req: &Request,
    section_id: &str,
) -> Result<ClassSection, JsonValue> {
    match resolver::load_section(conn, section_id) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(err(&req.id, "not_found", "section not found", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn section_json(s: &ClassSection) -> JsonValue {
    json!({
        "id": s.id,
        "gradeLevel": s.grade_level,
        "letter": s.letter,
        "academicYear": s.academic_year,
        "name": format!("{}º {}", s.grade_level, s.letter),
        "homeroomTeacherId": s.homeroom_teacher_id,
    })
}

fn member_rows(conn: &Connection, section_id: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let ids = ledger::current_members(conn, section_id)?;
    let mut stmt = conn.prepare("SELECT name FROM students WHERE id = ?")?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let name: Option<String> = stmt.query_row([&id], |r| r.get(0)).optional()?;
        out.push((id, name.unwrap_or_default()));
    }
    Ok(out)
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_level = match required_i64(req, "gradeLevel") {
        Ok(v) if v > 0 => v,
        Ok(_) => return err(&req.id, "bad_params", "gradeLevel must be positive", None),
        Err(e) => return e,
    };
    let letter = match required_str(req, "letter") {
        Ok(v) => v.to_uppercase(),
        Err(e) => return e,
    };
    let year_label = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(year) = AcademicYear::parse(&year_label) else {
        return err(
            &req.id,
            "bad_params",
            "academicYear must look like YYYY/YYYY+1",
            Some(json!({ "academicYear": year_label })),
        );
    };
    let homeroom = match opt_str(req, "homeroomTeacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let section = ClassSection {
        id: Uuid::new_v4().to_string(),
        grade_level,
        letter,
        academic_year: year.label(),
        homeroom_teacher_id: homeroom,
    };
    match conn.execute(
        "INSERT INTO class_sections(id, grade_level, letter, academic_year, homeroom_teacher_id)
         VALUES(?, ?, ?, ?, ?)",
        params![
            section.id,
            section.grade_level,
            section.letter,
            section.academic_year,
            section.homeroom_teacher_id
        ],
    ) {
        Ok(_) => ok(&req.id, json!({ "sectionId": section.id, "section": section_json(&section) })),
        Err(e) if is_unique_violation(&e) => err(
            &req.id,
            "conflict",
            "section already exists for this grade, letter and year",
            Some(json!({ "gradeLevel": grade_level, "letter": section.letter, "academicYear": section.academic_year })),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_sections" })),
        ),
    }
}

fn handle_sections_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sections": [] }));
    };
    let filter = match opt_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, grade_level, letter, academic_year, homeroom_teacher_id
         FROM class_sections
         WHERE ?1 IS NULL OR academic_year = ?1
         ORDER BY academic_year, grade_level, letter",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&filter], |r| {
            Ok(ClassSection {
                id: r.get(0)?,
                grade_level: r.get(1)?,
                letter: r.get(2)?,
                academic_year: r.get(3)?,
                homeroom_teacher_id: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let sections = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::with_capacity(sections.len());
    for s in &sections {
        let count = match ledger::current_members(conn, &s.id) {
            Ok(m) => m.len(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let mut v = section_json(s);
        v["studentCount"] = json!(count);
        out.push(v);
    }
    ok(&req.id, json!({ "sections": out }))
}

fn handle_sections_members(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_section_or_err(conn, req, &section_id) {
        return e;
    }
    match member_rows(conn, &section_id) {
        Ok(rows) => {
            let students: Vec<JsonValue> = rows
                .into_iter()
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sections_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match load_section_or_err(conn, req, &section_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let homeroom_name: Option<String> = match section.homeroom_teacher_id.as_deref() {
        Some(tid) => match conn
            .query_row("SELECT name FROM teachers WHERE id = ?", [tid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        None => None,
    };

    let mut stmt = match conn.prepare(
        "SELECT ta.subject_id, s.name, ta.teacher_id, t.name
         FROM teaching_assignments ta
         JOIN subjects s ON s.id = ta.subject_id
         LEFT JOIN teachers t ON t.id = ta.teacher_id
         WHERE ta.section_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments = match stmt
        .query_map([&section_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    drop(stmt);

    let students = match member_rows(conn, &section_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut grade_stmt = match conn.prepare(
        "SELECT subject_id, p1, p2, p3, exam, final_mark
         FROM grade_records
         WHERE student_id = ? AND academic_year = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut grades = Vec::new();
    for (student_id, student_name) in &students {
        let by_subject: HashMap<String, [Option<i64>; 5]> = match grade_stmt
            .query_map(params![student_id, section.academic_year], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    [
                        r.get::<_, Option<i64>>(1)?,
                        r.get::<_, Option<i64>>(2)?,
                        r.get::<_, Option<i64>>(3)?,
                        r.get::<_, Option<i64>>(4)?,
                        r.get::<_, Option<i64>>(5)?,
                    ],
                ))
            })
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        for (subject_id, subject_name, _, _) in &assignments {
            let m = by_subject.get(subject_id).copied().unwrap_or([None; 5]);
            grades.push(json!({
                "studentId": student_id,
                "studentName": student_name,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "p1": m[0],
                "p2": m[1],
                "p3": m[2],
                "exam": m[3],
                "final": m[4],
            }));
        }
    }

    let mut info = section_json(&section);
    info["homeroomTeacher"] = json!(homeroom_name);
    let teachers: Vec<JsonValue> = assignments
        .iter()
        .map(|(sid, sname, tid, tname)| {
            json!({
                "subjectId": sid,
                "subject": sname,
                "teacherId": tid,
                "teacher": tname,
            })
        })
        .collect();
    let students_json: Vec<JsonValue> = students
        .iter()
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();

    ok(
        &req.id,
        json!({
            "info": info,
            "teachers": teachers,
            "students": students_json,
            "grades": grades,
        }),
    )
}

fn handle_sections_assignments_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = load_section_or_err(conn, req, &section_id) {
        return e;
    }
    let Some(items) = req.params.get("assignments").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing assignments", None);
    };

    let mut parsed: Vec<(String, Option<String>)> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(subject_id) = item
            .get("subjectId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        else {
            return err(
                &req.id,
                "bad_params",
                format!("assignments[{i}].subjectId is required"),
                None,
            );
        };
        let teacher_id = item
            .get("teacherId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        parsed.push((subject_id, teacher_id));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM teaching_assignments WHERE section_id = ?",
        [&section_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    for (subject_id, teacher_id) in &parsed {
        if let Err(e) = tx.execute(
            "INSERT INTO teaching_assignments(section_id, subject_id, teacher_id) VALUES(?, ?, ?)",
            params![section_id, subject_id, teacher_id],
        ) {
            let _ = tx.rollback();
            let code = if is_unique_violation(&e) {
                "conflict"
            } else {
                "db_insert_failed"
            };
            return err(
                &req.id,
                code,
                e.to_string(),
                Some(json!({ "subjectId": subject_id })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "count": parsed.len() }))
}

fn handle_sections_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match load_section_or_err(conn, req, &section_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let mut marks = [None; 5];
    for (slot, key) in marks.iter_mut().zip(["p1", "p2", "p3", "exam", "final"]) {
        match opt_i64(req, key) {
            Ok(Some(v)) if !(MARK_MIN..=MARK_MAX).contains(&v) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{key} must be between {MARK_MIN} and {MARK_MAX}"),
                    None,
                )
            }
            Ok(v) => *slot = v,
            Err(e) => return e,
        }
    }

    match conn.execute(
        "INSERT INTO grade_records(id, student_id, subject_id, academic_year, p1, p2, p3, exam, final_mark)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, academic_year) DO UPDATE SET
           p1 = COALESCE(excluded.p1, p1),
           p2 = COALESCE(excluded.p2, p2),
           p3 = COALESCE(excluded.p3, p3),
           exam = COALESCE(excluded.exam, exam),
           final_mark = COALESCE(excluded.final_mark, final_mark)",
        params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            section.academic_year,
            marks[0],
            marks[1],
            marks[2],
            marks[3],
            marks[4]
        ],
    ) {
        Ok(_) => ok(&req.id, json!({ "academicYear": section.academic_year })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grade_records" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.list" => Some(handle_sections_list(state, req)),
        "sections.details" => Some(handle_sections_details(state, req)),
        "sections.members" => Some(handle_sections_members(state, req)),
        "sections.assignments.set" => Some(handle_sections_assignments_set(state, req)),
        "sections.grades.upsert" => Some(handle_sections_grades_upsert(state, req)),
        _ => None,
    }
}
