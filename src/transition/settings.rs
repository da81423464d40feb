use anyhow::anyhow;
use rusqlite::Connection;
use serde::de::DeserializeOwned;

use super::rules::PromotionPolicy;
use super::subjects::SubjectRoles;
use crate::db;

pub const PROMOTION_KEY: &str = "setup.promotion";
pub const SUBJECT_ROLES_KEY: &str = "setup.subjectRoles";

fn load_section<T: DeserializeOwned + Default>(conn: &Connection, key: &str) -> anyhow::Result<T> {
    match db::settings_get_json(conn, key)? {
        Some(v) => serde_json::from_value(v).map_err(|e| anyhow!("{key}: {e}")),
        None => Ok(T::default()),
    }
}

pub fn load_promotion_policy(conn: &Connection) -> anyhow::Result<PromotionPolicy> {
    let policy: PromotionPolicy = load_section(conn, PROMOTION_KEY)?;
    policy
        .validate()
        .map_err(|m| anyhow!("{PROMOTION_KEY}: {m}"))?;
    Ok(policy)
}

pub fn load_subject_roles(conn: &Connection) -> anyhow::Result<SubjectRoles> {
    load_section(conn, SUBJECT_ROLES_KEY)
}
