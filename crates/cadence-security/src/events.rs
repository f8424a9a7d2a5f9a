use std::fmt;
use std::str::FromStr;

use cadence_scheduler::event_log::{self, SECURITY_CACHE};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, SecurityError};

/// A change to the permission graph, as carried on the `SECURITY_CACHE`
/// channel. The wire form is `<Opcode>,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    DeleteRole(String),
    DeleteUser(String),
    DeleteTeam(String),
    /// Permissions of a role changed.
    RolePermission(String),
    /// Direct roles of a user changed.
    UserRole(String),
    /// Members of a team changed.
    TeamUser(String),
    /// Roles of a team changed.
    TeamRole(String),
    PermissionRename { old: String, new: String },
    PermissionDelete(String),
    /// Rebuild the whole cache.
    Reload,
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEvent::DeleteRole(id) => write!(f, "DeleteRole,{id}"),
            SecurityEvent::DeleteUser(id) => write!(f, "DeleteUser,{id}"),
            SecurityEvent::DeleteTeam(id) => write!(f, "DeleteTeam,{id}"),
            SecurityEvent::RolePermission(id) => write!(f, "RolePermission,{id}"),
            SecurityEvent::UserRole(id) => write!(f, "UserRole,{id}"),
            SecurityEvent::TeamUser(id) => write!(f, "TeamUser,{id}"),
            SecurityEvent::TeamRole(id) => write!(f, "TeamRole,{id}"),
            SecurityEvent::PermissionRename { old, new } => write!(f, "PermissionRename,{old},{new}"),
            SecurityEvent::PermissionDelete(name) => write!(f, "PermissionDelete,{name}"),
            SecurityEvent::Reload => write!(f, "Reload"),
        }
    }
}

impl FromStr for SecurityEvent {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SecurityError::InvalidEvent(s.to_string());
        let (opcode, payload) = match s.split_once(',') {
            Some((op, rest)) => (op.trim(), Some(rest.trim())),
            None => (s.trim(), None),
        };
        let id = || match payload {
            Some(p) if !p.is_empty() => Ok(p.to_string()),
            _ => Err(invalid()),
        };

        match opcode {
            "DeleteRole" => Ok(SecurityEvent::DeleteRole(id()?)),
            "DeleteUser" => Ok(SecurityEvent::DeleteUser(id()?)),
            "DeleteTeam" => Ok(SecurityEvent::DeleteTeam(id()?)),
            "RolePermission" => Ok(SecurityEvent::RolePermission(id()?)),
            "UserRole" => Ok(SecurityEvent::UserRole(id()?)),
            "TeamUser" => Ok(SecurityEvent::TeamUser(id()?)),
            "TeamRole" => Ok(SecurityEvent::TeamRole(id()?)),
            "PermissionDelete" => Ok(SecurityEvent::PermissionDelete(id()?)),
            "PermissionRename" => {
                let (old, new) = payload.and_then(|p| p.split_once(',')).ok_or_else(invalid)?;
                let (old, new) = (old.trim(), new.trim());
                if old.is_empty() || new.is_empty() {
                    return Err(invalid());
                }
                Ok(SecurityEvent::PermissionRename { old: old.to_string(), new: new.to_string() })
            }
            "Reload" if payload.is_none() => Ok(SecurityEvent::Reload),
            _ => Err(invalid()),
        }
    }
}

/// Announce a permission graph change to every process.
///
/// Call after the change is committed: a cache that reads the event before
/// the change is visible would re-fetch the old relation.
pub fn publish(conn: &Connection, event: &SecurityEvent) -> Result<i64> {
    let id = event_log::append(conn, SECURITY_CACHE, &event.to_string())?;
    debug!(%event, id, "security event published");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_values() {
        assert_eq!("DeleteRole,42".parse::<SecurityEvent>().unwrap(), SecurityEvent::DeleteRole("42".into()));
        assert_eq!("TeamUser, ops ".parse::<SecurityEvent>().unwrap(), SecurityEvent::TeamUser("ops".into()));
        assert_eq!(
            "PermissionRename,jobs.read,jobs.view".parse::<SecurityEvent>().unwrap(),
            SecurityEvent::PermissionRename { old: "jobs.read".into(), new: "jobs.view".into() }
        );
        assert_eq!("Reload".parse::<SecurityEvent>().unwrap(), SecurityEvent::Reload);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "DeleteRole", "DeleteRole,", "Explode,1", "PermissionRename,only-one", "Reload,now"] {
            assert!(
                matches!(bad.parse::<SecurityEvent>(), Err(SecurityError::InvalidEvent(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn display_is_the_wire_form() {
        let event = SecurityEvent::PermissionRename { old: "a".into(), new: "b".into() };
        assert_eq!(event.to_string(), "PermissionRename,a,b");
        assert_eq!(event.to_string().parse::<SecurityEvent>().unwrap(), event);
        assert_eq!(SecurityEvent::UserRole("u1".into()).to_string(), "UserRole,u1");
    }
}
