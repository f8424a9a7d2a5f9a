use std::collections::{BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cadence_core::types::UserId;
use cadence_scheduler::event_log::{self, SECURITY_CACHE};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Relation};
use crate::error::Result;
use crate::events::SecurityEvent;
use crate::types::{RefreshReport, UserAccess};

#[derive(Debug, Default)]
struct Graph {
    role_permissions: Relation,
    user_roles: Relation,
    user_teams: Relation,
    team_roles: Relation,
}

#[derive(Debug)]
struct CacheState {
    graph: Graph,
    loaded_at: Option<DateTime<Utc>>,
    /// Events created at or after this instant have not been applied yet.
    checkpoint: DateTime<Utc>,
}

/// Per-process replica of the permission graph.
///
/// Built in full by [`load`](Self::load) and then patched from
/// `SECURITY_CACHE` events by [`refresh`](Self::refresh). Every patch is a
/// re-fetch or an eviction, so applying an event twice is harmless.
#[derive(Debug)]
pub struct PermissionCache {
    state: RwLock<CacheState>,
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionCache {
    /// An empty cache that will pick up every event still in the log.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                graph: Graph::default(),
                loaded_at: None,
                checkpoint: DateTime::<Utc>::default(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuild from the tables. Events older than this call are considered
    /// applied.
    #[instrument(skip_all)]
    pub fn load(&self, conn: &Connection) -> Result<()> {
        let started = Utc::now();
        let graph = Graph {
            role_permissions: db::load_role_permissions(conn)?,
            user_roles: db::load_user_roles(conn)?,
            user_teams: db::load_user_teams(conn)?,
            team_roles: db::load_team_roles(conn)?,
        };
        info!(
            roles = graph.role_permissions.len(),
            users = graph.user_roles.len(),
            teams = graph.team_roles.len(),
            "permission cache loaded"
        );

        let mut state = self.write();
        state.graph = graph;
        state.loaded_at = Some(started);
        state.checkpoint = started;
        Ok(())
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.read().loaded_at
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.read().checkpoint
    }

    /// Apply every `SECURITY_CACHE` event created since the checkpoint, then
    /// move the checkpoint to the instant captured before reading.
    ///
    /// On a store error the checkpoint stays put and the next pass retries
    /// the same events.
    pub fn refresh(&self, conn: &Connection) -> Result<RefreshReport> {
        let now = Utc::now();
        let events = event_log::read_since(conn, SECURITY_CACHE, self.checkpoint())?;

        let mut report = RefreshReport::default();
        for entry in events {
            match entry.value.parse::<SecurityEvent>() {
                Ok(event) => {
                    self.apply(conn, &event)?;
                    report.applied += 1;
                }
                Err(e) => {
                    warn!(id = entry.id, error = %e, "unparseable security event skipped");
                    report.skipped += 1;
                }
            }
        }

        self.write().checkpoint = now;
        if report.applied > 0 {
            debug!(applied = report.applied, "security events applied");
        }
        Ok(report)
    }

    /// Patch the cache for one event. Re-fetches happen before the write
    /// lock is taken.
    pub fn apply(&self, conn: &Connection, event: &SecurityEvent) -> Result<()> {
        match event {
            SecurityEvent::Reload => return self.load(conn),
            SecurityEvent::RolePermission(role) => {
                let permissions = db::fetch_role_permissions(conn, role)?;
                replace(&mut self.write().graph.role_permissions, role, permissions);
            }
            SecurityEvent::UserRole(user) => {
                let roles = db::fetch_user_roles(conn, user)?;
                replace(&mut self.write().graph.user_roles, user, roles);
            }
            SecurityEvent::TeamRole(team) => {
                let roles = db::fetch_team_roles(conn, team)?;
                replace(&mut self.write().graph.team_roles, team, roles);
            }
            SecurityEvent::TeamUser(team) => {
                let members = db::fetch_team_users(conn, team)?;
                let mut state = self.write();
                let user_teams = &mut state.graph.user_teams;
                remove_everywhere(user_teams, team);
                for user in members {
                    user_teams.entry(user).or_default().insert(team.clone());
                }
            }
            SecurityEvent::DeleteRole(role) => {
                let mut state = self.write();
                state.graph.role_permissions.remove(role);
                remove_everywhere(&mut state.graph.user_roles, role);
                remove_everywhere(&mut state.graph.team_roles, role);
            }
            SecurityEvent::DeleteUser(user) => {
                let mut state = self.write();
                state.graph.user_roles.remove(user);
                state.graph.user_teams.remove(user);
            }
            SecurityEvent::DeleteTeam(team) => {
                let mut state = self.write();
                state.graph.team_roles.remove(team);
                remove_everywhere(&mut state.graph.user_teams, team);
            }
            SecurityEvent::PermissionRename { old, new } => {
                for permissions in self.write().graph.role_permissions.values_mut() {
                    if permissions.remove(old) {
                        permissions.insert(new.clone());
                    }
                }
            }
            SecurityEvent::PermissionDelete(name) => {
                remove_everywhere(&mut self.write().graph.role_permissions, name);
            }
        }
        debug!(%event, "security event applied");
        Ok(())
    }

    /// Direct roles plus roles of every team the user belongs to.
    pub fn roles_of(&self, user_id: &str) -> BTreeSet<String> {
        let state = self.read();
        roles_in(&state.graph, user_id)
    }

    pub fn permissions_of(&self, user_id: &str) -> BTreeSet<String> {
        let state = self.read();
        let roles = roles_in(&state.graph, user_id);
        roles
            .iter()
            .filter_map(|role| state.graph.role_permissions.get(role))
            .flatten()
            .cloned()
            .collect()
    }

    /// The system identity holds every permission.
    pub fn has_permission(&self, user: &UserId, permission: &str) -> bool {
        if user.is_system() {
            return true;
        }
        let state = self.read();
        let roles = roles_in(&state.graph, user.as_str());
        roles
            .iter()
            .filter_map(|role| state.graph.role_permissions.get(role))
            .any(|permissions| permissions.contains(permission))
    }

    pub fn access_of(&self, user_id: &str) -> UserAccess {
        let teams = {
            let state = self.read();
            let mut teams: Vec<String> = state
                .graph
                .user_teams
                .get(user_id)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default();
            teams.sort();
            teams
        };
        UserAccess {
            user_id: user_id.to_string(),
            roles: self.roles_of(user_id).into_iter().collect(),
            teams,
            permissions: self.permissions_of(user_id).into_iter().collect(),
        }
    }
}

fn roles_in(graph: &Graph, user_id: &str) -> BTreeSet<String> {
    let mut roles: BTreeSet<String> = graph.user_roles.get(user_id).into_iter().flatten().cloned().collect();
    for team in graph.user_teams.get(user_id).into_iter().flatten() {
        roles.extend(graph.team_roles.get(team).into_iter().flatten().cloned());
    }
    roles
}

fn replace(relation: &mut Relation, key: &str, values: HashSet<String>) {
    if values.is_empty() {
        relation.remove(key);
    } else {
        relation.insert(key.to_string(), values);
    }
}

/// Drop `value` from every set, and drop sets left empty.
fn remove_everywhere(relation: &mut Relation, value: &str) {
    relation.retain(|_, values| {
        values.remove(value);
        !values.is_empty()
    });
}
