#![allow(dead_code)]

pub mod db;

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use warrant::authz::memory::{filter, MemoryQueryBuilder};
use warrant::authz::policy::parse_kdl_document;
use warrant::authz::{
    AuthorizationRequest, AuthorizationService, MemoryPredicate, PermissionSet, Principal,
    Registry, ResourceType,
};
use warrant::catalog::{build_registry, Catalog, CatalogRecord};

/// Case management domain shared by the integration tests.
pub const POLICY: &str = r#"
resource "case" {
    actions {
        - "view"
    }
    relation "parent" target="case" key="parentId"
}

resource "task" {
    actions {
        - "view"
        - "modify"
    }
    relation "relatedCase" target="case" key="caseId"
    relation "notes" target="note" foreign="taskId"
}

resource "note" {
    actions {
        - "view"
    }
    relation "relatedCase" target="case" key="caseId"
}

permission "user" on="note" action="view" {
    condition "caseAssignee == principal.id"
}

permission "user" on="task" action="view" {
    condition "relatedCase.status == \"OPEN\" && priority > 2"
}
permission "user" on="task" action="view" {
    condition "assignee == principal.id"
}
permission "user" on="task" action="view" {
    condition "title contains \"urgent\""
}
permission "auditor" on="task" action="view" {
    condition "!(status in [\"DRAFT\", \"DELETED\"])"
}
permission "reviewer" on="task" action="view" {
    condition "notes.flagged == true || relatedCase.parent.status != \"CLOSED\""
}

permission "admin" on="task" action="modify"
permission "user" on="task" action="modify" {
    condition "assignee == principal.id && status != \"CLOSED\""
}
"#;

/// Cases shared by every generated world: c1 is open under closed c2, c3 is
/// open without a parent, c4 is open under open c3.
pub fn cases() -> Vec<JsonValue> {
    vec![
        json!({"id": "c1", "status": "OPEN", "parentId": "c2"}),
        json!({"id": "c2", "status": "CLOSED"}),
        json!({"id": "c3", "status": "OPEN", "parentId": null}),
        json!({"id": "c4", "status": "OPEN", "parentId": "c3"}),
    ]
}

pub struct World {
    pub catalog: Arc<Catalog>,
    pub registry: Arc<Registry>,
    pub permissions: PermissionSet,
    pub service: AuthorizationService,
}

impl World {
    pub fn new(catalog: JsonValue) -> Self {
        Self::with_policy(POLICY, catalog)
    }

    pub fn with_policy(policy: &str, catalog: JsonValue) -> Self {
        let policy = parse_kdl_document(policy).expect("policy parses");
        let catalog =
            Arc::new(Catalog::from_json_str(&catalog.to_string()).expect("catalog parses"));
        let registry = Arc::new(
            build_registry(&policy.resources, catalog.clone()).expect("registry builds"),
        );
        let permissions =
            PermissionSet::load(&registry, policy.permissions).expect("permissions load");
        let service = AuthorizationService::new(registry.clone());
        Self {
            catalog,
            registry,
            permissions,
            service,
        }
    }

    pub fn check(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
        record: &CatalogRecord,
    ) -> bool {
        let resource_type = ResourceType::new(resource_type);
        let request = AuthorizationRequest::new(principal, &resource_type, action);
        self.service
            .check(&self.permissions, &request, record)
            .expect("check succeeds")
            .granted
    }

    pub fn memory_predicate(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
    ) -> Option<MemoryPredicate> {
        let rt = ResourceType::new(resource_type);
        let request = AuthorizationRequest::new(principal, &rt, action);
        let builder = MemoryQueryBuilder::new(&self.registry, resource_type);
        let compiled = self
            .service
            .compile_predicate(&self.permissions, &request, &builder)
            .expect("predicate compiles");
        assert_eq!(compiled.always_denied, compiled.predicate.is_none());
        compiled.predicate
    }

    /// Ids of `resource_type` records the principal may act on, by checking
    /// each record one at a time.
    pub fn granted_ids(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
    ) -> Vec<String> {
        self.catalog
            .records(&ResourceType::new(resource_type))
            .iter()
            .filter(|r| self.check(principal, resource_type, action, r))
            .map(|r| r.id())
            .collect()
    }

    /// Ids selected by the compiled in-memory predicate.
    pub fn filtered_ids(
        &self,
        principal: &Principal,
        resource_type: &str,
        action: &str,
    ) -> Vec<String> {
        let Some(predicate) = self.memory_predicate(principal, resource_type, action) else {
            return Vec::new();
        };
        let records = self.catalog.records(&ResourceType::new(resource_type));
        filter(&predicate, &*self.registry, records)
            .expect("filter succeeds")
            .iter()
            .map(|r| r.id())
            .collect()
    }
}

pub fn principal(id: &str, roles: &[&str]) -> Principal {
    roles
        .iter()
        .fold(Principal::new(id), |p, role| p.with_role(*role))
}
