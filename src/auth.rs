// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Actor identity and activation authorization.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{ActivationScope, ActorRole, Member, MemberId};

/// Authenticated caller as supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: MemberId,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<MemberId>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Resolve the session's role string once, at the boundary.
    pub fn from_session(id: impl Into<MemberId>, role: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(id, role.parse()?))
    }
}

pub trait Authorizer: Send + Sync {
    fn authorize_activation(&self, actor: &Actor, target: &Member) -> Result<(), ValidationError>;
}

/// Role-based rules: leaders, customer support and admins may activate
/// anyone; members only their direct referrals.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn authorize_activation(&self, actor: &Actor, target: &Member) -> Result<(), ValidationError> {
        let allowed = match actor.role.activation_scope() {
            ActivationScope::Any => true,
            ActivationScope::DirectReferrals => target.sponsor.as_ref() == Some(&actor.id),
            ActivationScope::None => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(ValidationError::Unauthorized {
                actor: actor.id.clone(),
                role: actor.role,
                target: target.id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn target(sponsor: Option<&str>) -> Member {
        Member {
            id: MemberId::from("a"),
            referral_code: "CODEA".into(),
            sponsor: sponsor.map(MemberId::from),
            is_activated: false,
            role: ActorRole::Member,
            external_account_id: "ext-a".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn leader_may_activate_anyone() {
        let actor = Actor::new("leader-1", ActorRole::Leader);
        assert!(RoleAuthorizer.authorize_activation(&actor, &target(None)).is_ok());
    }

    #[test]
    fn member_limited_to_direct_referrals() {
        let sponsor = Actor::new("b", ActorRole::Member);
        let stranger = Actor::new("z", ActorRole::Member);
        let a = target(Some("b"));
        assert!(RoleAuthorizer.authorize_activation(&sponsor, &a).is_ok());
        assert!(matches!(
            RoleAuthorizer.authorize_activation(&stranger, &a),
            Err(ValidationError::Unauthorized { .. })
        ));
    }

    #[test]
    fn merchant_cannot_activate() {
        let actor = Actor::new("m", ActorRole::Merchant);
        assert!(RoleAuthorizer.authorize_activation(&actor, &target(Some("m"))).is_err());
    }

    #[test]
    fn session_role_parsed_once() {
        let actor = Actor::from_session("cs-1", "Customer Support").expect("test: role");
        assert_eq!(actor.role, ActorRole::CustomerSupport);
        assert!(matches!(
            Actor::from_session("x", "OVERLORD"),
            Err(ValidationError::UnknownRole(_))
        ));
    }
}
