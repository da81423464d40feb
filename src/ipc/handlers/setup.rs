use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::transition::rules::PromotionPolicy;
use crate::transition::settings::{self, PROMOTION_KEY, SUBJECT_ROLES_KEY};
use crate::transition::subjects::SubjectRoles;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Promotion,
    SubjectRoles,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "promotion" => Some(Self::Promotion),
            "subjectRoles" => Some(Self::SubjectRoles),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Promotion => PROMOTION_KEY,
            Self::SubjectRoles => SUBJECT_ROLES_KEY,
        }
    }
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    Ok(match section {
        SetupSection::Promotion => serde_json::to_value(settings::load_promotion_policy(conn)?)?,
        SetupSection::SubjectRoles => serde_json::to_value(settings::load_subject_roles(conn)?)?,
    })
}

/// Shallow merge of `patch` onto `current`, then a typed round-trip so only
/// well-formed sections are ever stored.
fn merge_section_patch(
    section: SetupSection,
    current: &Value,
    patch: &Map<String, Value>,
) -> Result<Value, String> {
    let mut merged = match current {
        // Switching resolver mode drops the fields of the previous mode.
        Value::Object(_) if patch.contains_key("mode") => Map::new(),
        Value::Object(obj) => obj.clone(),
        _ => Map::new(),
    };
    for (k, v) in patch {
        merged.insert(k.clone(), v.clone());
    }
    let merged = Value::Object(merged);

    match section {
        SetupSection::Promotion => {
            let policy: PromotionPolicy =
                serde_json::from_value(merged).map_err(|e| format!("promotion: {e}"))?;
            policy.validate()?;
            serde_json::to_value(policy).map_err(|e| e.to_string())
        }
        SetupSection::SubjectRoles => {
            let roles: SubjectRoles =
                serde_json::from_value(merged).map_err(|e| format!("subjectRoles: {e}"))?;
            serde_json::to_value(roles).map_err(|e| e.to_string())
        }
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Some(raw) = req.params.get("section").and_then(|v| v.as_str()) {
        let Some(section) = SetupSection::parse(raw) else {
            return err(&req.id, "bad_params", "unknown section", None);
        };
        return match load_section(conn, section) {
            Ok(v) => {
                let mut result = Map::new();
                result.insert(raw.to_string(), v);
                ok(&req.id, Value::Object(result))
            }
            Err(e) => err(&req.id, "bad_config", e.to_string(), None),
        };
    }

    let promotion = match load_section(conn, SetupSection::Promotion) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_config", e.to_string(), None),
    };
    let roles = match settings::load_subject_roles(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_config", e.to_string(), None),
    };
    let resolved = match roles.resolve(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "promotion": promotion,
            "subjectRoles": roles,
            "resolvedSubjects": resolved,
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    // A stored section that no longer parses is replaced rather than merged into.
    let current = load_section(conn, section).unwrap_or_else(|e| {
        tracing::warn!(section = section.key(), error = %e, "discarding unreadable settings");
        Value::Object(Map::new())
    });
    let next = match merge_section_patch(section, &current, patch_obj) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if let Err(e) = db::settings_set_json(conn, section.key(), &next) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "settings updated");
    let mut result = Map::new();
    result.insert("ok".into(), Value::Bool(true));
    result.insert(section_raw.to_string(), next);
    ok(&req.id, Value::Object(result))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_mark_patch_keeps_default_bands() {
        let current = serde_json::to_value(PromotionPolicy::default()).expect("to_value");
        let patch = json!({ "passMark": 9 });
        let next = merge_section_patch(
            SetupSection::Promotion,
            &current,
            patch.as_object().expect("object"),
        )
        .expect("merge");
        let policy: PromotionPolicy = serde_json::from_value(next).expect("policy");
        assert_eq!(policy.pass_mark, 9);
        assert_eq!(policy.bands, PromotionPolicy::default().bands);
    }

    #[test]
    fn overlapping_bands_patch_is_rejected() {
        let current = serde_json::to_value(PromotionPolicy::default()).expect("to_value");
        let patch = json!({
            "bands": [
                { "minGrade": 5, "maxGrade": 9, "rule": { "kind": "maxNegatives", "max": 3 } },
                { "minGrade": 9, "maxGrade": 9, "rule": { "kind": "coreSubjectTieBreak", "max": 2 } }
            ]
        });
        let res = merge_section_patch(
            SetupSection::Promotion,
            &current,
            patch.as_object().expect("object"),
        );
        assert!(res.is_err());
    }

    #[test]
    fn switching_resolver_mode_drops_old_fields() {
        let current = serde_json::to_value(SubjectRoles::default()).expect("to_value");
        let patch = json!({ "mode": "configured", "firstLanguage": "pt-id" });
        let next = merge_section_patch(
            SetupSection::SubjectRoles,
            &current,
            patch.as_object().expect("object"),
        )
        .expect("merge");
        assert_eq!(next["mode"], "configured");
        assert_eq!(next["firstLanguage"], "pt-id");
        assert!(next.get("firstLanguageTerms").is_none());
    }
}
