use std::sync::Arc;

use tracing::instrument;

use crate::authz::context::ContextResolver;
use crate::authz::errors::AuthzError;
use crate::authz::evaluate::{evaluate, EvalScope};
use crate::authz::permission::{Permission, PermissionSet};
use crate::authz::predicate::{to_predicate, QueryBuilder};
use crate::authz::provider::{RelatedContext, Resource};
use crate::authz::registry::Registry;
use crate::authz::types::{Principal, ResourceType};

/// Who wants to do what to which kind of resource.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub principal: &'a Principal,
    pub resource_type: &'a ResourceType,
    pub action: &'a str,
}

impl<'a> AuthorizationRequest<'a> {
    pub fn new(principal: &'a Principal, resource_type: &'a ResourceType, action: &'a str) -> Self {
        Self {
            principal,
            resource_type,
            action,
        }
    }
}

/// Outcome of an instance check. A denial is `granted == false`, never an error.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub granted: bool,
    /// The candidate that granted, or empty on denial. Evaluation stops at
    /// the first grant, so later candidates are never consulted.
    pub granted_by: Vec<Arc<Permission>>,
}

/// Outcome of a collection check.
#[derive(Debug, Clone)]
pub struct CompiledPredicate<F> {
    /// No permission matched role, type and action. Skip the store entirely.
    pub always_denied: bool,
    /// `None` exactly when `always_denied` is set.
    pub predicate: Option<F>,
    pub candidates: Vec<Arc<Permission>>,
}

impl<F> CompiledPredicate<F> {
    fn denied() -> Self {
        Self {
            always_denied: true,
            predicate: None,
            candidates: Vec::new(),
        }
    }
}

/// Resolves requests against a frozen [`Registry`] and a caller-supplied
/// [`PermissionSet`] snapshot. Holds no per-request state and is safe to
/// share across threads.
#[derive(Debug, Clone)]
pub struct AuthorizationService {
    registry: Arc<Registry>,
}

impl AuthorizationService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decide whether `request` is allowed on `instance`.
    pub fn check(
        &self,
        permissions: &PermissionSet,
        request: &AuthorizationRequest<'_>,
        instance: &dyn Resource,
    ) -> Result<Decision, AuthzError> {
        self.decide(permissions, request, instance, None)
    }

    /// Like [`check`](Self::check), with first-hop relations already loaded
    /// by the caller. Entries in `related` win over provider lookups.
    pub fn check_with_context(
        &self,
        permissions: &PermissionSet,
        request: &AuthorizationRequest<'_>,
        instance: &dyn Resource,
        related: &RelatedContext,
    ) -> Result<Decision, AuthzError> {
        self.decide(permissions, request, instance, Some(related))
    }

    #[instrument(
        level = "debug",
        skip_all,
        fields(
            principal = %request.principal.id,
            resource_type = %request.resource_type,
            action = request.action,
        )
    )]
    fn decide(
        &self,
        permissions: &PermissionSet,
        request: &AuthorizationRequest<'_>,
        instance: &dyn Resource,
        related: Option<&RelatedContext>,
    ) -> Result<Decision, AuthzError> {
        // 1. Candidate permissions for the held roles
        let candidates = self.candidates(permissions, request)?;

        // 2. Nothing to evaluate means deny
        if candidates.is_empty() {
            tracing::debug!("No candidate permissions, denying");
            return Ok(Decision::default());
        }

        // 3. Evaluate in candidate order, stopping at the first grant. An
        //    error before any grant fails the whole request
        let resolver = ContextResolver::new(&self.registry);
        let scope = EvalScope {
            resolver: &resolver,
            resource_type: request.resource_type,
            principal: request.principal,
            related,
        };
        let mut granted_by = Vec::new();
        for permission in candidates {
            let holds = match permission.plan() {
                Some(plan) => evaluate(plan, instance, &scope)?,
                None => true,
            };
            if holds {
                granted_by.push(permission);
                break;
            }
        }

        // 4. OR across permissions
        let granted = !granted_by.is_empty();
        tracing::debug!(
            granted,
            granted_by = ?granted_by.first().map(|p| &p.id),
            "Resolved instance check"
        );
        Ok(Decision {
            granted,
            granted_by,
        })
    }

    /// Compile the filter selecting every record `request` may touch.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            principal = %request.principal.id,
            resource_type = %request.resource_type,
            action = request.action,
        )
    )]
    pub fn compile_predicate<B: QueryBuilder>(
        &self,
        permissions: &PermissionSet,
        request: &AuthorizationRequest<'_>,
        builder: &B,
    ) -> Result<CompiledPredicate<B::Fragment>, AuthzError> {
        let candidates = self.candidates(permissions, request)?;
        if candidates.is_empty() {
            tracing::debug!("No candidate permissions, always denied");
            return Ok(CompiledPredicate::denied());
        }

        // Fragments keep candidate order so the composite OR stops where an
        // instance check would. Nothing after an unconditional grant is reached
        let mut fragments = Vec::with_capacity(candidates.len());
        let mut unconditional = false;
        for permission in &candidates {
            match permission.plan() {
                Some(plan) => fragments.push(to_predicate(plan, builder, request.principal)?),
                None => {
                    fragments.push(builder.always());
                    unconditional = true;
                    break;
                }
            }
        }

        let predicate = if fragments.len() == 1 {
            fragments.remove(0)
        } else {
            builder.or(fragments)
        };

        tracing::debug!(
            candidates = candidates.len(),
            unconditional,
            "Compiled collection predicate"
        );
        Ok(CompiledPredicate {
            always_denied: false,
            predicate: Some(predicate),
            candidates,
        })
    }

    fn candidates(
        &self,
        permissions: &PermissionSet,
        request: &AuthorizationRequest<'_>,
    ) -> Result<Vec<Arc<Permission>>, AuthzError> {
        self.registry
            .actions()
            .resolve_action(request.resource_type, request.action)?;
        Ok(permissions.candidates(request.principal, request.resource_type, request.action))
    }
}
