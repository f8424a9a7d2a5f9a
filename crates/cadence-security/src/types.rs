use serde::Serialize;

/// Effective access of one user, as the cache sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccess {
    pub user_id: String,
    /// Direct roles and roles inherited through teams, sorted.
    pub roles: Vec<String>,
    pub teams: Vec<String>,
    pub permissions: Vec<String>,
}

/// What one refresh pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub applied: usize,
    /// Values that did not parse.
    pub skipped: usize,
}
