mod helpers;

use helpers::{cases, principal, World};
use proptest::prelude::*;
use serde_json::{json, Map, Value as JsonValue};
use warrant::authz::{Principal, ResourceType};

#[derive(Debug, Clone)]
struct GeneratedTask {
    status: Option<&'static str>,
    priority: Option<i32>,
    case_id: Option<&'static str>,
    assignee: Option<&'static str>,
    title: Option<&'static str>,
    notes: Vec<bool>,
}

fn task_strategy() -> impl Strategy<Value = GeneratedTask> {
    (
        prop::option::of(prop::sample::select(vec!["OPEN", "DRAFT", "CLOSED", "DELETED"])),
        prop::option::of(0i32..6),
        // c9 does not exist
        prop::option::of(prop::sample::select(vec!["c1", "c2", "c3", "c4", "c9"])),
        prop::option::of(prop::sample::select(vec!["alice", "bob"])),
        prop::option::of(prop::sample::select(vec!["urgent fix", "routine", "URGENT"])),
        prop::collection::vec(any::<bool>(), 0..3),
    )
        .prop_map(|(status, priority, case_id, assignee, title, notes)| GeneratedTask {
            status,
            priority,
            case_id,
            assignee,
            title,
            notes,
        })
}

fn principal_strategy() -> impl Strategy<Value = Principal> {
    (
        prop::sample::select(vec!["alice", "bob"]),
        prop::sample::subsequence(vec!["user", "auditor", "reviewer", "admin", "guest"], 0..=5),
    )
        .prop_map(|(id, roles)| principal(id, &roles))
}

fn world_for(task: &GeneratedTask) -> World {
    let mut record = Map::new();
    record.insert("id".into(), json!("t1"));
    let mut put = |name: &str, value: Option<JsonValue>| {
        if let Some(value) = value {
            record.insert(name.to_string(), value);
        }
    };
    put("status", task.status.map(|s| json!(s)));
    put("priority", task.priority.map(|p| json!(p)));
    put("caseId", task.case_id.map(|c| json!(c)));
    put("assignee", task.assignee.map(|a| json!(a)));
    put("title", task.title.map(|t| json!(t)));

    let notes: Vec<JsonValue> = task
        .notes
        .iter()
        .enumerate()
        .map(|(i, flagged)| json!({"id": format!("n{i}"), "taskId": "t1", "flagged": flagged}))
        .collect();

    World::new(json!({
        "case": cases(),
        "task": [JsonValue::Object(record)],
        "note": notes,
    }))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// An instance check grants exactly when the compiled predicate selects
    /// the same record.
    #[test]
    fn check_agrees_with_predicate(
        task in task_strategy(),
        principal in principal_strategy(),
        action in prop::sample::select(vec!["view", "modify"]),
    ) {
        let world = world_for(&task);
        let task_type = ResourceType::new("task");
        let record = world.catalog.find(&task_type, "t1").expect("task is in the catalog");

        let granted = world.check(&principal, "task", action, &record);
        let selected = match world.memory_predicate(&principal, "task", action) {
            Some(predicate) => predicate
                .matches(&*world.registry, &*record)
                .expect("predicate evaluates"),
            None => false,
        };
        prop_assert_eq!(granted, selected, "task {:?} principal {:?}", task, principal);
    }
}

#[test]
fn test_note_assignee_scenario() {
    let world = World::new(json!({
        "case": cases(),
        "task": [],
        "note": [
            {"id": "n1", "caseAssignee": "alice"},
            {"id": "n2", "caseAssignee": "bob"},
        ],
    }));
    let alice = principal("alice", &["user"]);
    let bob = principal("bob", &["user"]);
    let note_type = ResourceType::new("note");
    let n1 = world.catalog.find(&note_type, "n1").unwrap();

    assert!(world.check(&alice, "note", "view", &n1));
    assert!(!world.check(&bob, "note", "view", &n1));
    assert_eq!(world.filtered_ids(&alice, "note", "view"), vec!["n1"]);
    assert_eq!(world.granted_ids(&alice, "note", "view"), vec!["n1"]);
}

#[test]
fn test_relation_scenarios_agree() {
    let world = World::new(json!({
        "case": cases(),
        "task": [
            {"id": "t1", "caseId": "c1", "priority": 3},
            {"id": "t2", "caseId": "c2", "priority": 5},
            {"id": "t3", "caseId": "c9", "priority": 5},
            {"id": "t4", "priority": 5},
            {"id": "t5", "caseId": "c4", "status": "DRAFT"},
        ],
        "note": [
            {"id": "n1", "taskId": "t2", "flagged": true},
        ],
    }));

    let user = principal("carol", &["user"]);
    assert_eq!(world.granted_ids(&user, "task", "view"), vec!["t1"]);
    assert_eq!(world.filtered_ids(&user, "task", "view"), vec!["t1"]);

    // t2 through its flagged note, t5 through the open parent of its case.
    // t1 sits under closed c2, t3 and t4 reach no case at all
    let reviewer = principal("carol", &["reviewer"]);
    assert_eq!(world.granted_ids(&reviewer, "task", "view"), vec!["t2", "t5"]);
    assert_eq!(world.filtered_ids(&reviewer, "task", "view"), vec!["t2", "t5"]);

    let auditor = principal("carol", &["auditor"]);
    assert_eq!(
        world.filtered_ids(&auditor, "task", "view"),
        vec!["t1", "t2", "t3", "t4"]
    );
}

#[test]
fn test_roles_without_permissions_are_always_denied() {
    let world = World::new(json!({"case": cases(), "task": [{"id": "t1"}], "note": []}));
    let guest = principal("eve", &["guest"]);
    assert!(world.memory_predicate(&guest, "task", "view").is_none());
    assert!(world.granted_ids(&guest, "task", "view").is_empty());
}
