use std::collections::HashSet;
use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::permission::PermissionSet;
use crate::authz::policy::{parse_kdl_document, ParsedPolicy};
use crate::authz::registry::Registry;

/// Load all `.kdl` policy files from the given directory, in file name order,
/// and merge them into one [`ParsedPolicy`].
pub fn load_policies(dir: &Path) -> Result<ParsedPolicy, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoad {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        tracing::debug!(
            file = %path.display(),
            resources = parsed.resources.len(),
            permissions = parsed.permissions.len(),
            "Parsed policy file"
        );
        all_parsed.push(parsed);
    }

    let file_count = all_parsed.len();
    let policy = merge_policies(all_parsed)?;

    tracing::info!(
        files = file_count,
        resources = policy.resources.len(),
        permissions = policy.permissions.len(),
        "Loaded authorization policies"
    );

    Ok(policy)
}

/// Concatenate parsed files. A resource type may be declared only once
/// across all files.
pub fn merge_policies(parsed: Vec<ParsedPolicy>) -> Result<ParsedPolicy, AuthzError> {
    let mut merged = ParsedPolicy::default();
    let mut declared = HashSet::new();

    for p in parsed {
        for res in p.resources {
            if !declared.insert(res.resource_type.clone()) {
                return Err(AuthzError::InvalidPolicy(format!(
                    "resource `{}` declared more than once",
                    res.resource_type
                )));
            }
            merged.resources.push(res);
        }
        merged.permissions.extend(p.permissions);
    }

    Ok(merged)
}

/// Validate the policy's permissions against `registry` as one snapshot.
pub fn compile_permissions(
    registry: &Registry,
    policy: &ParsedPolicy,
) -> Result<PermissionSet, AuthzError> {
    let set = PermissionSet::load(registry, policy.permissions.iter().cloned())?;
    tracing::info!(permissions = set.len(), "Compiled permission snapshot");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::permission::PermissionDef;
    use crate::authz::policy::ResourceDeclaration;
    use crate::authz::testing::fixture_registry;
    use crate::authz::types::{Principal, ResourceType};

    fn declaration(name: &str) -> ResourceDeclaration {
        ResourceDeclaration {
            resource_type: ResourceType::new(name),
            actions: vec!["view".into()],
            relations: vec![],
        }
    }

    #[test]
    fn test_merge_multiple_files() {
        let p1 = ParsedPolicy {
            resources: vec![declaration("task")],
            permissions: vec![PermissionDef::new("user", "task", "view")],
        };
        let p2 = ParsedPolicy {
            resources: vec![declaration("note")],
            permissions: vec![PermissionDef::new("user", "note", "view")],
        };
        let merged = merge_policies(vec![p1, p2]).unwrap();
        assert_eq!(merged.resources.len(), 2);
        assert_eq!(merged.permissions.len(), 2);
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let p1 = ParsedPolicy {
            resources: vec![declaration("task")],
            ..Default::default()
        };
        let p2 = p1.clone();
        let err = merge_policies(vec![p1, p2]).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPolicy(_)));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(
            dir.path().join("10_notes.kdl"),
            r#"
permission "user" on="note" action="view" {
    condition "caseAssignee == principal.id"
}
"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("20_tasks.kdl"),
            r#"
permission "user" on="task" action="view" {
    condition "relatedCase.status == \"OPEN\""
}
permission "admin" on="task" action="modify"
"#,
        )
        .unwrap();

        // Also write a non-KDL file that should be ignored
        std::fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let policy = load_policies(dir.path()).unwrap();
        assert_eq!(policy.permissions.len(), 3);
        assert_eq!(policy.permissions[0].resource_type.as_str(), "note");

        let registry = fixture_registry();
        let set = compile_permissions(&registry, &policy).unwrap();
        let user = Principal::new("alice").with_role("user");
        assert_eq!(set.candidates(&user, &ResourceType::new("task"), "view").len(), 1);
    }

    #[test]
    fn test_invalid_permission_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("policy.kdl"),
            r#"
permission "user" on="note" action="view"
permission "user" on="note" action="publish"
"#,
        )
        .unwrap();

        let policy = load_policies(dir.path()).unwrap();
        let err = compile_permissions(&fixture_registry(), &policy).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPermission(_)));
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let err = load_policies(Path::new("/nonexistent/path")).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPolicy(_)));
    }
}
