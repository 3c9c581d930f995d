//! One-time import of the legacy single-project JSON file.
//!
//! The legacy format is a single JSON document `{"project": {...}, "workItems": [...]}`.
//! On success the project is created and made active in one store transaction, then the
//! file is removed. Any failure leaves the file in place and is only logged, so the next
//! start tries again. A retry recognises a project it already stored by its id and only
//! removes the file.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use uuid::Uuid;

use crate::store::{ProjectData, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NoLegacyData,
    Migrated { project_id: String },
    Failed(String),
}

pub fn migrate_legacy(store: &mut Store, legacy_path: &Path) -> MigrationOutcome {
    let outcome = match try_migrate(store, legacy_path) {
        Ok(outcome) => outcome,
        Err(reason) => MigrationOutcome::Failed(reason),
    };
    match &outcome {
        MigrationOutcome::NoLegacyData => {}
        MigrationOutcome::Migrated { project_id } => tracing::info!(
            "migrated legacy data from {} into project {project_id}",
            legacy_path.display()
        ),
        MigrationOutcome::Failed(reason) => tracing::warn!(
            "legacy migration from {} skipped, will retry next start: {reason}",
            legacy_path.display()
        ),
    }
    outcome
}

fn try_migrate(store: &mut Store, legacy_path: &Path) -> Result<MigrationOutcome, String> {
    let content = match fs::read_to_string(legacy_path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MigrationOutcome::NoLegacyData),
        Err(e) => return Err(format!("failed to read legacy data: {e}")),
    };

    let value: Value =
        serde_json::from_str(&content).map_err(|e| format!("legacy data is not JSON: {e}"))?;
    if !value.get("project").is_some_and(Value::is_object) {
        return Err("legacy data has no `project` object".to_string());
    }
    if !value.get("workItems").is_some_and(Value::is_array) {
        return Err("legacy data has no `workItems` array".to_string());
    }
    let mut data: ProjectData = serde_json::from_value(value)
        .map_err(|e| format!("legacy data does not describe a project: {e}"))?;
    if data.project.id.trim().is_empty() {
        // Derived from the file so a second run over the same file picks the same id.
        data.project.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string();
    }

    let project_id = match store.get_project(&data.project.id) {
        Ok(existing) if existing.project.name == data.project.name => {
            tracing::info!(
                "legacy project {} was already migrated",
                existing.project.id
            );
            existing.project.id
        }
        Ok(_) => store
            .create_active_project(data)
            .map_err(|e| format!("failed to store legacy project: {e}"))?,
        Err(e) if e.is_not_found() => store
            .create_active_project(data)
            .map_err(|e| format!("failed to store legacy project: {e}"))?,
        Err(e) => return Err(format!("failed to look up legacy project: {e}")),
    };

    if let Err(e) = fs::remove_file(legacy_path) {
        tracing::error!(
            "migrated legacy data but could not remove {}: {e}",
            legacy_path.display()
        );
    }
    Ok(MigrationOutcome::Migrated { project_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_legacy(dir: &Path, value: &Value) -> std::path::PathBuf {
        let path = dir.join("legacy-project.json");
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_no_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_in_memory().unwrap();
        let outcome = migrate_legacy(&mut store, &dir.path().join("absent.json"));
        assert_eq!(outcome, MigrationOutcome::NoLegacyData);
    }

    #[test]
    fn test_migrates_activates_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_legacy(
            dir.path(),
            &json!({
                "project": {"id": "legacy-1", "name": "Old tracker", "status": "active"},
                "workItems": [
                    {"id": "e", "title": "Epic", "type": "epic"},
                    {"id": "s", "title": "Story", "type": "story", "parentId": "e", "status": "done"}
                ]
            }),
        );
        let mut store = Store::open_in_memory().unwrap();

        let outcome = migrate_legacy(&mut store, &path);
        let MigrationOutcome::Migrated { project_id } = outcome else {
            panic!("expected migration, got {outcome:?}");
        };
        assert_eq!(project_id, "legacy-1");
        assert!(!path.exists());

        let active = store.get_active_project().unwrap().unwrap();
        assert_eq!(active.project.id, project_id);
        let snapshot = store.get_project(&project_id).unwrap();
        assert_eq!(snapshot.work_items.len(), 2);
        assert_eq!(snapshot.metadata.completed_work_items, 1);
    }

    #[test]
    fn test_missing_work_items_leaves_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_legacy(dir.path(), &json!({"project": {"name": "Half"}}));
        let mut store = Store::open_in_memory().unwrap();

        let outcome = migrate_legacy(&mut store, &path);
        assert!(matches!(outcome, MigrationOutcome::Failed(_)));
        assert!(path.exists());
        assert!(store.get_all_projects().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_file_is_retried_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy-project.json");
        fs::write(&path, "{ not json").unwrap();
        let mut store = Store::open_in_memory().unwrap();

        assert!(matches!(
            migrate_legacy(&mut store, &path),
            MigrationOutcome::Failed(_)
        ));
        assert!(path.exists());

        fs::write(
            &path,
            r#"{"project": {"name": "Fixed"}, "workItems": []}"#,
        )
        .unwrap();
        assert!(matches!(
            migrate_legacy(&mut store, &path),
            MigrationOutcome::Migrated { .. }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_cyclic_legacy_data_is_not_imported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_legacy(
            dir.path(),
            &json!({
                "project": {"name": "Tangled"},
                "workItems": [
                    {"id": "a", "title": "A", "parentId": "b"},
                    {"id": "b", "title": "B", "parentId": "a"}
                ]
            }),
        );
        let mut store = Store::open_in_memory().unwrap();

        assert!(matches!(
            migrate_legacy(&mut store, &path),
            MigrationOutcome::Failed(_)
        ));
        assert!(path.exists());
        assert!(store.get_all_projects().unwrap().is_empty());
    }

    #[test]
    fn test_already_stored_legacy_project_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = json!({
            "project": {"id": "legacy-1", "name": "Old tracker"},
            "workItems": [{"id": "t", "title": "Task"}]
        });
        let mut store = Store::open_in_memory().unwrap();
        store
            .create_project(serde_json::from_value(legacy.clone()).unwrap())
            .unwrap();
        let path = write_legacy(dir.path(), &legacy);

        assert_eq!(
            migrate_legacy(&mut store, &path),
            MigrationOutcome::Migrated {
                project_id: "legacy-1".to_string()
            }
        );
        assert!(!path.exists());
        assert_eq!(store.get_all_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_leftover_file_without_id_is_imported_once() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = json!({
            "project": {"name": "Anonymous"},
            "workItems": [{"id": "t", "title": "Task"}]
        });
        let mut store = Store::open_in_memory().unwrap();

        let path = write_legacy(dir.path(), &legacy);
        let first = migrate_legacy(&mut store, &path);
        // The same file showing up again, as when removing it failed.
        let path = write_legacy(dir.path(), &legacy);
        let second = migrate_legacy(&mut store, &path);

        assert!(matches!(first, MigrationOutcome::Migrated { .. }));
        assert_eq!(first, second);
        assert!(!path.exists());
        assert_eq!(store.get_all_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_id_taken_by_another_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open_in_memory().unwrap();
        store
            .create_project(
                serde_json::from_value(json!({
                    "project": {"id": "p1", "name": "Unrelated"},
                    "workItems": []
                }))
                .unwrap(),
            )
            .unwrap();
        let path = write_legacy(
            dir.path(),
            &json!({"project": {"id": "p1", "name": "Old tracker"}, "workItems": []}),
        );

        let MigrationOutcome::Migrated { project_id } = migrate_legacy(&mut store, &path) else {
            panic!("expected migration");
        };
        assert_ne!(project_id, "p1");
        let active = store.get_active_project().unwrap().unwrap();
        assert_eq!(active.project.name, "Old tracker");
        assert_eq!(store.get_all_projects().unwrap().len(), 2);
    }
}
