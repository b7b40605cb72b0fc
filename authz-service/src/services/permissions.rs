//! Permission resolution over a versioned grants snapshot.
//!
//! Resolution is a pure function of (snapshot, assigned roles), so the same
//! role assignment always yields the same permission set at issuance and at
//! refresh-time re-resolution.

use std::collections::{BTreeMap, BTreeSet};

/// Wildcard granted to the universal role; short-circuits both permission
/// checks and tenant matching.
pub const WILDCARD: &str = "*";

/// Versioned snapshot of role-to-permission grants, loaded from the directory
/// and passed by reference into resolution. Never read from global state.
#[derive(Debug, Clone)]
pub struct RoleGrants {
    pub revision: i64,
    universal_role: String,
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl RoleGrants {
    pub fn new(
        revision: i64,
        universal_role: impl Into<String>,
        grants: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            revision,
            universal_role: universal_role.into(),
            grants,
        }
    }

    pub fn universal_role(&self) -> &str {
        &self.universal_role
    }

    /// Resolve the union of permissions across the given roles. A principal
    /// holding the universal role resolves to the wildcard alone.
    pub fn resolve(&self, roles: &[String]) -> BTreeSet<String> {
        if roles.iter().any(|r| *r == self.universal_role) {
            return BTreeSet::from([WILDCARD.to_string()]);
        }

        let mut resolved = BTreeSet::new();
        for role in roles {
            if let Some(perms) = self.grants.get(role) {
                resolved.extend(perms.iter().cloned());
            }
        }
        resolved
    }
}

/// Check a resolved permission set against a required permission.
/// Absence is denial.
pub fn is_granted(permissions: &BTreeSet<String>, required: &str) -> bool {
    permissions.contains(WILDCARD) || permissions.contains(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants() -> RoleGrants {
        let mut map = BTreeMap::new();
        map.insert(
            "risk_analyst".to_string(),
            BTreeSet::from(["assessment.read".to_string(), "assessment.create".to_string()]),
        );
        map.insert(
            "viewer".to_string(),
            BTreeSet::from(["assessment.read".to_string(), "client.read".to_string()]),
        );
        RoleGrants::new(1, "system_admin", map)
    }

    #[test]
    fn resolves_union_across_roles() {
        let grants = grants();
        let resolved = grants.resolve(&["risk_analyst".to_string(), "viewer".to_string()]);

        assert_eq!(
            resolved,
            BTreeSet::from([
                "assessment.read".to_string(),
                "assessment.create".to_string(),
                "client.read".to_string(),
            ])
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let grants = grants();
        let roles = vec!["viewer".to_string(), "risk_analyst".to_string()];

        assert_eq!(grants.resolve(&roles), grants.resolve(&roles));
    }

    #[test]
    fn unknown_role_resolves_to_nothing() {
        let resolved = grants().resolve(&["ghost".to_string()]);
        assert!(resolved.is_empty());
    }

    #[test]
    fn universal_role_resolves_to_wildcard() {
        let resolved = grants().resolve(&["system_admin".to_string()]);
        assert_eq!(resolved, BTreeSet::from([WILDCARD.to_string()]));
        assert!(is_granted(&resolved, "anything.at_all"));
    }

    #[test]
    fn absence_is_denial() {
        let resolved = grants().resolve(&["risk_analyst".to_string()]);
        assert!(is_granted(&resolved, "assessment.create"));
        assert!(!is_granted(&resolved, "client.delete"));
    }
}
