use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::transition::ledger::{self, EnrollmentSource};
use crate::transition::resolver;
use crate::transition::AcademicYear;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn student_exists(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Re-derives the denormalized pointer from the ledger.
fn sync_current_section(conn: &Connection, student_id: &str) -> rusqlite::Result<()> {
    let current = ledger::current_enrollment(conn, student_id)?;
    conn.execute(
        "UPDATE students SET current_section_id = ?, grade_level = COALESCE(?, grade_level), updated_at = ? WHERE id = ?",
        params![
            current.as_ref().map(|e| e.section_id.clone()),
            current.as_ref().map(|e| e.grade_level),
            now_ts(),
            student_id
        ],
    )?;
    Ok(())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let birth_date = match opt_str(req, "birthDate") {
        Ok(Some(v)) => match NaiveDate::parse_from_str(&v, "%Y-%m-%d") {
            Ok(d) => Some(d.format("%Y-%m-%d").to_string()),
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    "birthDate must be YYYY-MM-DD",
                    Some(json!({ "birthDate": v })),
                )
            }
        },
        Ok(None) => None,
        Err(e) => return e,
    };
    let gender = match opt_str(req, "gender") {
        Ok(Some(g)) => {
            let g = g.to_uppercase();
            if g != "M" && g != "F" {
                return err(&req.id, "bad_params", "gender must be M or F", None);
            }
            Some(g)
        }
        Ok(None) => None,
        Err(e) => return e,
    };
    let phone = match opt_str(req, "phone") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let address = match opt_str(req, "address") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match opt_str(req, "sectionId") {
        Ok(Some(sid)) => match resolver::load_section(conn, &sid) {
            Ok(Some(s)) => Some(s),
            Ok(None) => return err(&req.id, "not_found", "section not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Ok(None) => None,
        Err(e) => return e,
    };

    let student_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO students(id, name, birth_date, gender, phone, address, grade_level, current_section_id, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            student_id,
            name,
            birth_date,
            gender,
            phone,
            address,
            section.as_ref().map(|s| s.grade_level),
            section.as_ref().map(|s| s.id.clone()),
            now_ts()
        ],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Some(s) = &section {
        if let Err(e) = ledger::append(&tx, &student_id, &s.id, EnrollmentSource::Registration) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn
        .query_row(
            "SELECT s.id, s.name, s.birth_date, s.gender, s.phone, s.address, s.grade_level,
                    s.current_section_id, cs.grade_level, cs.letter, cs.academic_year
             FROM students s
             LEFT JOIN class_sections cs ON cs.id = s.current_section_id
             WHERE s.id = ?",
            [&student_id],
            |r| {
                let section_id: Option<String> = r.get(7)?;
                let current_section = match section_id {
                    Some(id) => json!({
                        "id": id,
                        "gradeLevel": r.get::<_, Option<i64>>(8)?,
                        "letter": r.get::<_, Option<String>>(9)?,
                        "academicYear": r.get::<_, Option<String>>(10)?,
                    }),
                    None => JsonValue::Null,
                };
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "birthDate": r.get::<_, Option<String>>(2)?,
                    "gender": r.get::<_, Option<String>>(3)?,
                    "phone": r.get::<_, Option<String>>(4)?,
                    "address": r.get::<_, Option<String>>(5)?,
                    "gradeLevel": r.get::<_, Option<i64>>(6)?,
                    "currentSection": current_section,
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match resolver::load_section(conn, &section_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let source = match ledger::history(conn, &student_id) {
        Ok(rows) if rows.is_empty() => EnrollmentSource::Registration,
        Ok(_) => EnrollmentSource::Correction,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let enrollment_id = match ledger::append(&tx, &student_id, &section_id, source) {
        Ok(id) => id,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };
    if let Err(e) = sync_current_section(&tx, &student_id) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "source": source.as_str() }),
    )
}

fn handle_students_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match ledger::history(conn, &student_id) {
        Ok(rows) => ok(&req.id, json!({ "enrollments": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_section_for_year(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
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
            None,
        );
    };
    match ledger::section_for_year(conn, &student_id, year) {
        Ok(enrollment) => ok(&req.id, json!({ "enrollment": enrollment })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.enroll" => Some(handle_students_enroll(state, req)),
        "students.history" => Some(handle_students_history(state, req)),
        "students.sectionForYear" => Some(handle_students_section_for_year(state, req)),
        _ => None,
    }
}
