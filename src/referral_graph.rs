// Copyright (c) 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Referral graph: sponsorship edges and bounded upward traversal.
//!
//! Every member has at most one sponsor and the induced graph is a forest.
//! Self-referral and cycles are rejected when an edge is created; traversal
//! still caps its hop count and tracks visited members so corrupted data
//! surfaces as a [`GraphError`] instead of an endless walk.
//!
//! Missing levels (the forest root was reached) resolve to the house
//! account, so a resolved chain always has exactly `max_depth` entries.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::distribution::MAX_LEVELS;
use crate::error::{GraphError, ValidationError};
use crate::store::Store;
use crate::types::{ActorRole, Member, MemberId};

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 12;

const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// MemberDirectory
// ---------------------------------------------------------------------------

/// Read-only view of members, sponsor edges and external account ids.
pub trait MemberDirectory: Send + Sync {
    fn member(&self, id: &MemberId) -> Option<Member>;

    fn member_by_referral_code(&self, code: &str) -> Option<Member>;

    fn sponsor_of(&self, id: &MemberId) -> Result<Option<MemberId>, GraphError> {
        self.member(id)
            .map(|m| m.sponsor)
            .ok_or_else(|| GraphError::UnknownMember(id.clone()))
    }

    /// Account id at the external wallet provider.
    fn external_account(&self, id: &MemberId) -> Result<String, GraphError> {
        self.member(id)
            .map(|m| m.external_account_id)
            .ok_or_else(|| GraphError::UnknownMember(id.clone()))
    }
}

/// Reject an edge `member -> sponsor` that would be a self-referral or
/// close a cycle.
pub fn ensure_acyclic<D: MemberDirectory + ?Sized>(
    directory: &D,
    member: &MemberId,
    sponsor: &MemberId,
) -> Result<(), ValidationError> {
    if member == sponsor {
        return Err(ValidationError::SelfReferral(member.clone()));
    }

    let mut seen = HashSet::new();
    let mut cursor = Some(sponsor.clone());
    while let Some(id) = cursor {
        if &id == member {
            return Err(ValidationError::ReferralCycle {
                member: member.clone(),
                sponsor: sponsor.clone(),
            });
        }
        // Pre-existing corruption above the sponsor is reported by traversal.
        if !seen.insert(id.clone()) {
            break;
        }
        cursor = directory.member(&id).and_then(|m| m.sponsor);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Registration request for a new member.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub id: Option<MemberId>,
    /// Explicit referral code; generated when absent.
    pub referral_code: Option<String>,
    /// Referral code of the sponsoring member, if any.
    pub sponsor_code: Option<String>,
    pub role: ActorRole,
    pub external_account_id: String,
}

impl NewMember {
    pub fn new(role: ActorRole, external_account_id: impl Into<String>) -> Self {
        Self {
            id: None,
            referral_code: None,
            sponsor_code: None,
            role,
            external_account_id: external_account_id.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<MemberId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_referral_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }

    pub fn sponsored_by(mut self, sponsor_code: impl Into<String>) -> Self {
        self.sponsor_code = Some(sponsor_code.into());
        self
    }
}

/// Random uppercase referral code without easily confused glyphs.
pub fn generate_referral_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REFERRAL_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..REFERRAL_CODE_ALPHABET.len());
            REFERRAL_CODE_ALPHABET[idx] as char
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ReferralGraph
// ---------------------------------------------------------------------------

pub struct ReferralGraph<D: ?Sized = Store> {
    directory: Arc<D>,
    house: MemberId,
}

impl<D: ?Sized> Clone for ReferralGraph<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            house: self.house.clone(),
        }
    }
}

impl<D: MemberDirectory + ?Sized> ReferralGraph<D> {
    pub fn new(directory: Arc<D>, house: MemberId) -> Self {
        Self { directory, house }
    }

    /// Fallback beneficiary for missing levels.
    pub fn house(&self) -> &MemberId {
        &self.house
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Ancestors of `member`, index 0 = direct sponsor. Always returns
    /// exactly `max_depth` entries, padding with the house account.
    pub fn resolve_ancestors(
        &self,
        member: &MemberId,
        max_depth: usize,
    ) -> Result<Vec<MemberId>, GraphError> {
        if max_depth > MAX_LEVELS {
            return Err(GraphError::DepthLimit {
                requested: max_depth,
                limit: MAX_LEVELS,
            });
        }

        let start = self
            .directory
            .member(member)
            .ok_or_else(|| GraphError::UnknownMember(member.clone()))?;

        let mut chain = Vec::with_capacity(max_depth);
        let mut seen = HashSet::from([member.clone()]);
        let mut child = start.id;
        let mut cursor = start.sponsor;

        while chain.len() < max_depth {
            let Some(sponsor_id) = cursor else {
                break;
            };
            if !seen.insert(sponsor_id.clone()) {
                tracing::error!(
                    member = %member,
                    revisited = %sponsor_id,
                    "referral cycle in stored sponsor edges"
                );
                return Err(GraphError::CycleDetected {
                    start: member.clone(),
                    revisited: sponsor_id,
                });
            }
            let Some(sponsor) = self.directory.member(&sponsor_id) else {
                tracing::error!(member = %child, sponsor = %sponsor_id, "dangling sponsor edge");
                return Err(GraphError::DanglingSponsor {
                    member: child,
                    sponsor: sponsor_id,
                });
            };
            chain.push(sponsor_id);
            child = sponsor.id;
            cursor = sponsor.sponsor;
        }

        chain.resize(max_depth, self.house.clone());
        Ok(chain)
    }
}

impl ReferralGraph<Store> {
    /// Graph over `store`, falling back to the store's house account.
    pub fn for_store(store: Arc<Store>) -> Self {
        let house = store.house().clone();
        Self::new(store, house)
    }

    /// Create a member with a zero wallet and its sponsorship edge.
    pub fn register_member(&self, request: NewMember) -> Result<Member, ValidationError> {
        let sponsor = match &request.sponsor_code {
            Some(code) => Some(
                self.directory
                    .member_by_referral_code(code)
                    .ok_or_else(|| ValidationError::UnknownReferralCode(code.clone()))?
                    .id,
            ),
            None => None,
        };

        let id = request.id.clone().unwrap_or_else(MemberId::generate);
        if sponsor.as_ref() == Some(&id) {
            return Err(ValidationError::SelfReferral(id));
        }

        let mut rng = rand::thread_rng();
        let mut last_code = String::new();
        for _ in 0..CODE_ATTEMPTS {
            let code = request
                .referral_code
                .clone()
                .unwrap_or_else(|| generate_referral_code(&mut rng));
            let member = Member {
                id: id.clone(),
                referral_code: code.clone(),
                sponsor: sponsor.clone(),
                is_activated: false,
                role: request.role,
                external_account_id: request.external_account_id.clone(),
                created_at: Utc::now(),
            };
            match self.directory.insert_member(member.clone()) {
                Ok(()) => {
                    tracing::info!(
                        member = %member.id,
                        sponsor = ?member.sponsor,
                        role = %member.role,
                        "member registered"
                    );
                    return Ok(member);
                }
                Err(ValidationError::DuplicateReferralCode(_))
                    if request.referral_code.is_none() =>
                {
                    last_code = code;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ValidationError::DuplicateReferralCode(last_code))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Directory that accepts any edges, including corrupt ones.
    #[derive(Default)]
    struct RawDirectory {
        members: HashMap<MemberId, Member>,
    }

    impl RawDirectory {
        fn with(mut self, id: &str, sponsor: Option<&str>) -> Self {
            let member = Member {
                id: MemberId::from(id),
                referral_code: format!("CODE-{id}"),
                sponsor: sponsor.map(MemberId::from),
                is_activated: false,
                role: ActorRole::Member,
                external_account_id: format!("ext-{id}"),
                created_at: Utc::now(),
            };
            self.members.insert(member.id.clone(), member);
            self
        }
    }

    impl MemberDirectory for RawDirectory {
        fn member(&self, id: &MemberId) -> Option<Member> {
            self.members.get(id).cloned()
        }

        fn member_by_referral_code(&self, code: &str) -> Option<Member> {
            self.members.values().find(|m| m.referral_code == code).cloned()
        }
    }

    fn graph(dir: RawDirectory) -> ReferralGraph<RawDirectory> {
        ReferralGraph::new(Arc::new(dir), MemberId::from("house"))
    }

    fn ids(chain: &[MemberId]) -> Vec<&str> {
        chain.iter().map(|m| m.as_str()).collect()
    }

    #[test]
    fn short_chain_pads_with_house() {
        let g = graph(
            RawDirectory::default()
                .with("c", None)
                .with("b", Some("c"))
                .with("a", Some("b")),
        );
        let chain = g
            .resolve_ancestors(&MemberId::from("a"), 5)
            .expect("test: resolve");
        assert_eq!(ids(&chain), vec!["b", "c", "house", "house", "house"]);
    }

    #[test]
    fn root_member_resolves_entirely_to_house() {
        let g = graph(RawDirectory::default().with("root", None));
        let chain = g
            .resolve_ancestors(&MemberId::from("root"), 3)
            .expect("test: resolve");
        assert_eq!(ids(&chain), vec!["house"; 3]);
    }

    #[test]
    fn long_chain_is_truncated_at_depth() {
        let mut dir = RawDirectory::default().with("m0", None);
        for i in 1..10 {
            let parent = format!("m{}", i - 1);
            dir = dir.with(&format!("m{i}"), Some(&parent));
        }
        let g = graph(dir);
        let chain = g
            .resolve_ancestors(&MemberId::from("m9"), 5)
            .expect("test: resolve");
        assert_eq!(ids(&chain), vec!["m8", "m7", "m6", "m5", "m4"]);
    }

    #[test]
    fn zero_depth_is_empty() {
        let g = graph(RawDirectory::default().with("a", None));
        let chain = g
            .resolve_ancestors(&MemberId::from("a"), 0)
            .expect("test: resolve");
        assert!(chain.is_empty());
    }

    #[test]
    fn unknown_member_is_graph_error() {
        let g = graph(RawDirectory::default());
        let err = g.resolve_ancestors(&MemberId::from("ghost"), 3);
        assert_eq!(err, Err(GraphError::UnknownMember(MemberId::from("ghost"))));
    }

    #[test]
    fn depth_above_limit_rejected() {
        let g = graph(RawDirectory::default().with("a", None));
        let err = g.resolve_ancestors(&MemberId::from("a"), 6);
        assert!(matches!(err, Err(GraphError::DepthLimit { requested: 6, limit: 5 })));
    }

    #[test]
    fn corrupt_cycle_is_detected() {
        let g = graph(
            RawDirectory::default()
                .with("a", Some("b"))
                .with("b", Some("c"))
                .with("c", Some("b")),
        );
        let err = g.resolve_ancestors(&MemberId::from("a"), 5);
        assert!(
            matches!(err, Err(GraphError::CycleDetected { ref revisited, .. }) if revisited.as_str() == "b"),
            "expected CycleDetected, got {err:?}"
        );
    }

    #[test]
    fn cycle_beyond_depth_is_not_walked() {
        // Traversal stops at max_depth before reaching the corrupt loop.
        let g = graph(
            RawDirectory::default()
                .with("a", Some("b"))
                .with("b", Some("c"))
                .with("c", Some("d"))
                .with("d", Some("c")),
        );
        let chain = g
            .resolve_ancestors(&MemberId::from("a"), 2)
            .expect("test: bounded walk");
        assert_eq!(ids(&chain), vec!["b", "c"]);
    }

    #[test]
    fn dangling_sponsor_is_graph_error() {
        let g = graph(RawDirectory::default().with("a", Some("missing")));
        let err = g.resolve_ancestors(&MemberId::from("a"), 3);
        assert_eq!(
            err,
            Err(GraphError::DanglingSponsor {
                member: MemberId::from("a"),
                sponsor: MemberId::from("missing"),
            })
        );
    }

    #[test]
    fn acyclic_check_rejects_self_and_cycles() {
        let dir = RawDirectory::default()
            .with("c", None)
            .with("b", Some("c"))
            .with("a", Some("b"));
        let a = MemberId::from("a");
        let c = MemberId::from("c");
        assert_eq!(
            ensure_acyclic(&dir, &a, &a),
            Err(ValidationError::SelfReferral(a.clone()))
        );
        // c -> a would close a -> b -> c -> a.
        assert!(matches!(
            ensure_acyclic(&dir, &c, &a),
            Err(ValidationError::ReferralCycle { .. })
        ));
        assert!(ensure_acyclic(&dir, &a, &c).is_ok());
    }

    #[test]
    fn generated_codes_use_alphabet() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let code = generate_referral_code(&mut rng);
        assert_eq!(code.len(), REFERRAL_CODE_LEN);
        assert!(code.bytes().all(|b| REFERRAL_CODE_ALPHABET.contains(&b)));
        assert_ne!(code, generate_referral_code(&mut rng));
    }
}
