//! Canonical identity resolution.
//!
//! The same technician can show up under a directory id, an email address
//! or a legacy alias. Every comparison against `assigned_to` goes through
//! a [`CanonicalIdentity`] so those spellings are treated as one person.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::Actor;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{TechnicianProfile, TechnicianRef};
use crate::store::TechnicianDirectory;

/// One person and every identifier they answer to.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalIdentity {
    /// Directory id when known, otherwise the raw identifier supplied.
    pub primary_id: String,
    pub identifiers: BTreeSet<String>,
    pub profile: Option<TechnicianProfile>,
}

impl CanonicalIdentity {
    fn from_profile(profile: TechnicianProfile, extra: impl IntoIterator<Item = String>) -> Self {
        let mut identifiers: BTreeSet<String> =
            profile.identifiers().map(str::to_string).collect();
        identifiers.extend(extra);
        Self {
            primary_id: profile.id.clone(),
            identifiers,
            profile: Some(profile),
        }
    }

    /// Identity not present in the directory.
    pub fn unresolved(id: &str, extra: impl IntoIterator<Item = String>) -> Self {
        let mut identifiers = BTreeSet::from([id.to_string()]);
        identifiers.extend(extra);
        Self {
            primary_id: id.to_string(),
            identifiers,
            profile: None,
        }
    }

    /// Whether `id` is one of this person's identifiers.
    pub fn matches(&self, id: &str) -> bool {
        self.identifiers.contains(id)
            || self
                .identifiers
                .iter()
                .any(|known| known.contains('@') && known.eq_ignore_ascii_case(id))
    }

    pub fn identifier_list(&self) -> Vec<String> {
        self.identifiers.iter().cloned().collect()
    }
}

/// Resolves raw identifiers to canonical identities via the directory.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn TechnicianDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn TechnicianDirectory>) -> Self {
        Self { directory }
    }

    /// Look a technician up by id, alias or email.
    pub async fn find(
        &self,
        tenant_id: &str,
        raw: &str,
    ) -> DispatchResult<Option<TechnicianProfile>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DispatchError::InvalidInput(
                "technician identifier must not be empty".to_string(),
            ));
        }
        Ok(self
            .directory
            .lookup(tenant_id, &TechnicianRef::parse(raw))
            .await?)
    }

    /// Resolve a technician that must exist in the directory.
    pub async fn resolve_technician(
        &self,
        tenant_id: &str,
        raw: &str,
    ) -> DispatchResult<TechnicianProfile> {
        self.find(tenant_id, raw)
            .await?
            .ok_or_else(|| DispatchError::technician_not_found(raw))
    }

    /// Canonical identity of the acting user.
    ///
    /// Tries the actor id first, then the email. Actors unknown to the
    /// directory (dispatch desk staff, admins) resolve to their own ids.
    pub async fn resolve_actor(
        &self,
        tenant_id: &str,
        actor: &Actor,
    ) -> DispatchResult<CanonicalIdentity> {
        let own: Vec<String> = std::iter::once(actor.id.clone())
            .chain(actor.email.clone())
            .collect();

        let mut profile = self.find(tenant_id, &actor.id).await?;
        if profile.is_none() {
            if let Some(email) = actor.email.as_deref() {
                profile = self.find(tenant_id, email).await?;
            }
        }

        Ok(match profile {
            Some(profile) => CanonicalIdentity::from_profile(profile, own),
            None => CanonicalIdentity::unresolved(&actor.id, own),
        })
    }

    /// Canonical identity of any identifier, falling back to the raw value.
    pub async fn resolve(&self, tenant_id: &str, raw: &str) -> DispatchResult<CanonicalIdentity> {
        Ok(match self.find(tenant_id, raw).await? {
            Some(profile) => CanonicalIdentity::from_profile(profile, [raw.trim().to_string()]),
            None => CanonicalIdentity::unresolved(raw.trim(), []),
        })
    }
}
