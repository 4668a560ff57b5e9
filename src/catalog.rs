//! JSON record catalog backing resource types declared in policy files.
//!
//! The catalog file maps each resource type name to an array of objects:
//!
//! ```json
//! { "case": [{ "id": "c1", "status": "OPEN" }],
//!   "task": [{ "id": "t1", "caseId": "c1" }] }
//! ```
//!
//! Every record is expected to carry an `id` field; relations declared with
//! `key=` or `foreign=` are resolved by matching against it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::authz::errors::AuthzError;
use crate::authz::policy::{Link, ResourceDeclaration};
use crate::authz::provider::{CapabilityProvider, Related, Relation, Resource};
use crate::authz::registry::Registry;
use crate::authz::types::{Action, ResourceType, Value};
use crate::errors::WarrantError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRecord {
    fields: Map<String, JsonValue>,
}

impl CatalogRecord {
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// The record's `id` rendered as text, or an empty string when absent.
    pub fn id(&self) -> String {
        match self.fields.get("id") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

impl Resource for CatalogRecord {
    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).map(Value::from_json)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: HashMap<ResourceType, Vec<Arc<CatalogRecord>>>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, WarrantError> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            resource_types = catalog.records.len(),
            records = catalog.records.values().map(Vec::len).sum::<usize>(),
            "Loaded record catalog"
        );
        Ok(catalog)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, WarrantError> {
        let raw: Map<String, JsonValue> = serde_json::from_str(contents)?;
        let mut records = HashMap::new();

        for (resource_type, rows) in raw {
            let JsonValue::Array(rows) = rows else {
                return Err(WarrantError::Catalog(format!(
                    "`{resource_type}` must map to an array of records"
                )));
            };
            let mut parsed = Vec::with_capacity(rows.len());
            for row in rows {
                let JsonValue::Object(fields) = row else {
                    return Err(WarrantError::Catalog(format!(
                        "`{resource_type}` contains a record that is not an object"
                    )));
                };
                parsed.push(Arc::new(CatalogRecord::new(fields)));
            }
            records.insert(ResourceType::new(resource_type), parsed);
        }

        Ok(Self { records })
    }

    pub fn records(&self, resource_type: &ResourceType) -> &[Arc<CatalogRecord>] {
        self.records
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find(&self, resource_type: &ResourceType, id: &str) -> Option<Arc<CatalogRecord>> {
        self.records(resource_type)
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }
}

/// Capability provider for a resource type declared in a policy file and
/// backed by the catalog.
pub struct DeclaredProvider {
    declaration: ResourceDeclaration,
    catalog: Arc<Catalog>,
}

impl DeclaredProvider {
    pub fn new(declaration: ResourceDeclaration, catalog: Arc<Catalog>) -> Self {
        Self {
            declaration,
            catalog,
        }
    }

    fn matching(
        &self,
        target: &ResourceType,
        field: &str,
        wanted: &Value,
    ) -> Vec<Arc<dyn Resource>> {
        self.catalog
            .records(target)
            .iter()
            .filter(|r| r.field(field).as_ref() == Some(wanted))
            .map(|r| r.clone() as Arc<dyn Resource>)
            .collect()
    }
}

impl CapabilityProvider for DeclaredProvider {
    fn resource_type(&self) -> ResourceType {
        self.declaration.resource_type.clone()
    }

    fn available_actions(&self) -> Vec<Action> {
        self.declaration
            .actions
            .iter()
            .map(|a| Action::new(self.declaration.resource_type.clone(), a.clone()))
            .collect()
    }

    fn relations(&self) -> Vec<Relation> {
        self.declaration
            .relations
            .iter()
            .map(|r| Relation::new(r.name.clone(), r.target.clone()))
            .collect()
    }

    fn related_resource(
        &self,
        instance: &dyn Resource,
        relation: &str,
    ) -> Result<Related, AuthzError> {
        let declared = self
            .declaration
            .relations
            .iter()
            .find(|r| r.name == relation)
            .ok_or_else(|| {
                AuthzError::unknown_relation(self.declaration.resource_type.as_str(), relation)
            })?;

        match &declared.link {
            Link::Key(field) => {
                let Some(key) = instance.field(field).filter(|v| !v.is_null()) else {
                    return Ok(Related::Missing);
                };
                Ok(self
                    .matching(&declared.target, "id", &key)
                    .into_iter()
                    .next()
                    .map(Related::One)
                    .unwrap_or(Related::Missing))
            }
            Link::Foreign(field) => {
                let Some(id) = instance.field("id").filter(|v| !v.is_null()) else {
                    return Ok(Related::Missing);
                };
                Ok(Related::Many(self.matching(&declared.target, field, &id)))
            }
        }
    }
}

/// Register one [`DeclaredProvider`] per declaration.
pub fn build_registry(
    declarations: &[ResourceDeclaration],
    catalog: Arc<Catalog>,
) -> Result<Registry, AuthzError> {
    let mut builder = Registry::builder();
    for declaration in declarations {
        builder = builder.register(Arc::new(DeclaredProvider::new(
            declaration.clone(),
            catalog.clone(),
        )))?;
    }
    builder.build()
}
