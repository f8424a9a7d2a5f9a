//! Read side of the permission graph.
//!
//! The tables belong to the application's CRUD layer; the cache only reads
//! them. `init_db` exists so a fresh database (and every test) has them.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};

use crate::error::Result;

/// Grouped relation: left id -> set of right ids.
pub type Relation = HashMap<String, HashSet<String>>;

/// Create the `sec_*` tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sec_users (
            id    TEXT PRIMARY KEY NOT NULL,
            name  TEXT NOT NULL
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_teams (
            id    TEXT PRIMARY KEY NOT NULL,
            name  TEXT NOT NULL
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_roles (
            id    TEXT PRIMARY KEY NOT NULL,
            name  TEXT NOT NULL
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_permissions (
            name  TEXT PRIMARY KEY NOT NULL
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_user_roles (
            user_id  TEXT NOT NULL,
            role_id  TEXT NOT NULL,
            PRIMARY KEY (user_id, role_id)
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_team_users (
            team_id  TEXT NOT NULL,
            user_id  TEXT NOT NULL,
            PRIMARY KEY (team_id, user_id)
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_team_roles (
            team_id  TEXT NOT NULL,
            role_id  TEXT NOT NULL,
            PRIMARY KEY (team_id, role_id)
        ) STRICT;
        CREATE TABLE IF NOT EXISTS sec_role_permissions (
            role_id     TEXT NOT NULL,
            permission  TEXT NOT NULL,
            PRIMARY KEY (role_id, permission)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_sec_team_users_user ON sec_team_users(user_id);",
    )?;
    Ok(())
}

fn load_relation(conn: &Connection, sql: &str) -> Result<Relation> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut relation = Relation::new();
    let pairs = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for pair in pairs {
        let (left, right) = pair?;
        relation.entry(left).or_default().insert(right);
    }
    Ok(relation)
}

fn load_set(conn: &Connection, sql: &str, key: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let set = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(set)
}

pub fn load_role_permissions(conn: &Connection) -> Result<Relation> {
    load_relation(conn, "SELECT role_id, permission FROM sec_role_permissions")
}

pub fn load_user_roles(conn: &Connection) -> Result<Relation> {
    load_relation(conn, "SELECT user_id, role_id FROM sec_user_roles")
}

/// Keyed by user, unlike the table.
pub fn load_user_teams(conn: &Connection) -> Result<Relation> {
    load_relation(conn, "SELECT user_id, team_id FROM sec_team_users")
}

pub fn load_team_roles(conn: &Connection) -> Result<Relation> {
    load_relation(conn, "SELECT team_id, role_id FROM sec_team_roles")
}

pub fn fetch_role_permissions(conn: &Connection, role_id: &str) -> Result<HashSet<String>> {
    load_set(conn, "SELECT permission FROM sec_role_permissions WHERE role_id = ?1", role_id)
}

pub fn fetch_user_roles(conn: &Connection, user_id: &str) -> Result<HashSet<String>> {
    load_set(conn, "SELECT role_id FROM sec_user_roles WHERE user_id = ?1", user_id)
}

pub fn fetch_team_users(conn: &Connection, team_id: &str) -> Result<HashSet<String>> {
    load_set(conn, "SELECT user_id FROM sec_team_users WHERE team_id = ?1", team_id)
}

pub fn fetch_team_roles(conn: &Connection, team_id: &str) -> Result<HashSet<String>> {
    load_set(conn, "SELECT role_id FROM sec_team_roles WHERE team_id = ?1", team_id)
}
