use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::provider::{Related, RelatedContext, Resource};
use crate::authz::registry::Registry;
use crate::authz::types::ResourceType;

/// Reaches related instances by relation name through the registered
/// providers. Holds no state of its own; caching belongs to providers.
pub struct ContextResolver<'a> {
    registry: &'a Registry,
}

impl<'a> ContextResolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve one hop. Returns the target type with the related instances.
    pub fn related(
        &self,
        resource_type: &ResourceType,
        instance: &dyn Resource,
        relation: &str,
    ) -> Result<(ResourceType, Related), AuthzError> {
        let target = self.registry.relation(resource_type, relation)?.target.clone();
        let related = self
            .registry
            .provider(resource_type)?
            .related_resource(instance, relation)?;
        Ok((target, related))
    }

    /// Follow `relations` from `instance`, fanning out over many-valued hops.
    /// The first hop is taken from `preresolved` when the caller supplied it.
    pub fn resolve_path(
        &self,
        resource_type: &ResourceType,
        instance: &dyn Resource,
        relations: &[String],
        preresolved: Option<&RelatedContext>,
    ) -> Result<Vec<Arc<dyn Resource>>, AuthzError> {
        let Some((first, rest)) = relations.split_first() else {
            return Ok(Vec::new());
        };

        let (mut current_type, related) = match preresolved.and_then(|ctx| ctx.get(first)) {
            Some(related) => {
                let target = self.registry.relation(resource_type, first)?.target.clone();
                (target, related.clone())
            }
            None => self.related(resource_type, instance, first)?,
        };
        let mut current = related.into_vec();

        for relation in rest {
            if current.is_empty() {
                break;
            }
            let mut next = Vec::new();
            let mut next_type = None;
            for item in &current {
                let (target, related) = self.related(&current_type, item.as_ref(), relation)?;
                next_type = Some(target);
                next.extend(related.into_vec());
            }
            if let Some(t) = next_type {
                current_type = t;
            }
            current = next;
        }

        tracing::trace!(
            resource_type = %resource_type,
            path = %relations.join("."),
            reached = current.len(),
            "Resolved relation path"
        );
        Ok(current)
    }
}
