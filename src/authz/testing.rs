//! Shared fixtures for unit tests: a small case/task/note world whose
//! relations are resolved by id lookups in an in-process record table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::authz::errors::AuthzError;
use crate::authz::memory::RecordSource;
use crate::authz::provider::{CapabilityProvider, Related, Relation, Resource};
use crate::authz::registry::Registry;
use crate::authz::types::{Action, Record, ResourceType, Value};

type Table = Arc<RwLock<HashMap<ResourceType, Vec<Arc<Record>>>>>;

enum Link {
    /// `instance.<field>` holds the target's id
    Key(String),
    /// targets whose `<field>` holds the instance's id
    Foreign(String),
}

pub(crate) struct StaticProvider {
    resource_type: ResourceType,
    actions: Vec<String>,
    relations: Vec<Relation>,
    links: HashMap<String, Link>,
    table: Table,
    lookups: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub(crate) fn new(resource_type: &str, actions: &[&str]) -> Self {
        Self {
            resource_type: ResourceType::new(resource_type),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            relations: Vec::new(),
            links: HashMap::new(),
            table: Table::default(),
            lookups: Arc::default(),
        }
    }

    pub(crate) fn with_relation(mut self, name: &str, target: &str) -> Self {
        self.relations.push(Relation::new(name, target));
        self
    }

    fn with_link(mut self, name: &str, target: &str, link: Link) -> Self {
        self.relations.push(Relation::new(name, target));
        self.links.insert(name.to_string(), link);
        self
    }

    fn sharing(mut self, table: &Table, lookups: &Arc<AtomicUsize>) -> Self {
        self.table = table.clone();
        self.lookups = lookups.clone();
        self
    }
}

impl CapabilityProvider for StaticProvider {
    fn resource_type(&self) -> ResourceType {
        self.resource_type.clone()
    }

    fn available_actions(&self) -> Vec<Action> {
        self.actions
            .iter()
            .map(|a| Action::new(self.resource_type.clone(), a.clone()))
            .collect()
    }

    fn relations(&self) -> Vec<Relation> {
        self.relations.clone()
    }

    fn related_resource(
        &self,
        instance: &dyn Resource,
        relation: &str,
    ) -> Result<Related, AuthzError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let target = self
            .relations
            .iter()
            .find(|r| r.name == relation)
            .map(|r| r.target.clone())
            .ok_or_else(|| AuthzError::unknown_relation(self.resource_type.as_str(), relation))?;
        let Some(link) = self.links.get(relation) else {
            return Ok(Related::Missing);
        };

        let table = self.table.read().expect("fixture table poisoned");
        let rows = table.get(&target).cloned().unwrap_or_default();
        let as_resource = |r: Arc<Record>| -> Arc<dyn Resource> { r };

        Ok(match link {
            Link::Key(field) => {
                let Some(key) = instance.field(field).filter(|v| !v.is_null()) else {
                    return Ok(Related::Missing);
                };
                rows.into_iter()
                    .find(|r| r.field("id") == Some(key.clone()))
                    .map(|r| Related::One(as_resource(r)))
                    .unwrap_or(Related::Missing)
            }
            Link::Foreign(field) => {
                let Some(id) = instance.field("id") else {
                    return Ok(Related::Missing);
                };
                Related::Many(
                    rows.into_iter()
                        .filter(|r| r.field(field) == Some(id.clone()))
                        .map(as_resource)
                        .collect(),
                )
            }
        })
    }
}

/// case(parent -> case), task(relatedCase -> case, notes -> note*),
/// note(relatedCase -> case).
pub(crate) struct Fixture {
    pub(crate) registry: Arc<Registry>,
    table: Table,
    lookups: Arc<AtomicUsize>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let table = Table::default();
        let lookups = Arc::new(AtomicUsize::new(0));

        let case = StaticProvider::new("case", &["view", "modify"])
            .with_link("parent", "case", Link::Key("parentId".into()))
            .sharing(&table, &lookups);
        let task = StaticProvider::new("task", &["view", "modify"])
            .with_link("relatedCase", "case", Link::Key("caseId".into()))
            .with_link("notes", "note", Link::Foreign("taskId".into()))
            .sharing(&table, &lookups);
        let note = StaticProvider::new("note", &["view", "modify", "delete"])
            .with_link("relatedCase", "case", Link::Key("caseId".into()))
            .sharing(&table, &lookups);

        let registry = Registry::builder()
            .register(Arc::new(case))
            .and_then(|b| b.register(Arc::new(task)))
            .and_then(|b| b.register(Arc::new(note)))
            .and_then(|b| b.build())
            .expect("fixture registry is valid");

        Self {
            registry: Arc::new(registry),
            table,
            lookups,
        }
    }

    pub(crate) fn insert(&self, resource_type: &str, record: Record) -> Arc<Record> {
        let record = Arc::new(record);
        self.table
            .write()
            .expect("fixture table poisoned")
            .entry(ResourceType::new(resource_type))
            .or_default()
            .push(record.clone());
        record
    }

    pub(crate) fn records(&self, resource_type: &str) -> Vec<Arc<Record>> {
        self.table
            .read()
            .expect("fixture table poisoned")
            .get(&ResourceType::new(resource_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `related_resource` calls made so far.
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RecordSource for Fixture {
    fn join(
        &self,
        resource_type: &ResourceType,
        record: &dyn Resource,
        relation: &str,
    ) -> Result<Vec<Arc<dyn Resource>>, AuthzError> {
        self.registry.join(resource_type, record, relation)
    }
}

pub(crate) fn fixture_registry() -> Arc<Registry> {
    Fixture::new().registry
}

pub(crate) fn id_of(record: &dyn Resource) -> String {
    match record.field("id") {
        Some(Value::String(id)) => id,
        other => panic!("record without string id: {other:?}"),
    }
}
