//! Authentication principal resolved from an `X-API-Key` header.

use uuid::Uuid;

use crate::models::{ApiKeyKind, Role};

/// The authenticated identity attached to a request.
///
/// Produced by the API layer after key validation; consumed by handlers and
/// the query pipeline for RBAC and notebook-access checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPrincipal {
    /// A validated API key bound to a user.
    Key {
        user_id: Uuid,
        role: Role,
        key_id: Uuid,
        kind: ApiKeyKind,
        /// Bootstrap credential not yet rotated. Everything except login and
        /// rotation is refused while set.
        must_rotate: bool,
    },
    /// No credentials, or credentials that failed validation.
    Anonymous,
}

impl AuthPrincipal {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::Key {
                role: Role::Admin,
                ..
            }
        )
    }

    pub fn must_rotate(&self) -> bool {
        matches!(self, Self::Key { must_rotate: true, .. })
    }

    /// The user behind this principal, if any.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Key { user_id, .. } => Some(*user_id),
            Self::Anonymous => None,
        }
    }

    /// The key that authenticated this request, if any.
    pub fn key_id(&self) -> Option<Uuid> {
        match self {
            Self::Key { key_id, .. } => Some(*key_id),
            Self::Anonymous => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_principal(role: Role, must_rotate: bool) -> AuthPrincipal {
        AuthPrincipal::Key {
            user_id: Uuid::new_v4(),
            role,
            key_id: Uuid::new_v4(),
            kind: ApiKeyKind::Primary,
            must_rotate,
        }
    }

    #[test]
    fn anonymous_is_not_authenticated() {
        let p = AuthPrincipal::Anonymous;
        assert!(!p.is_authenticated());
        assert!(!p.is_admin());
        assert!(p.user_id().is_none());
        assert!(p.key_id().is_none());
    }

    #[test]
    fn key_principal_accessors() {
        let p = key_principal(Role::Member, false);
        assert!(p.is_authenticated());
        assert!(!p.is_admin());
        assert!(!p.must_rotate());
        assert!(p.user_id().is_some());
    }

    #[test]
    fn admin_role_detected() {
        assert!(key_principal(Role::Admin, false).is_admin());
    }

    #[test]
    fn rotation_gate_flag() {
        assert!(key_principal(Role::Admin, true).must_rotate());
    }
}
