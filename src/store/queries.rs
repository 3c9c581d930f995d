use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::SecondsFormat;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::models::{
    CustomFields, Metadata, Project, ProjectData, ProjectSnapshot, StoredProject, WorkItem,
};
use super::{SCHEMA_VERSION, Store};
use crate::hierarchy::ancestry;

const PROJECT_COLUMNS: &str = "id, name, description, kind, status, priority, estimated_effort,
     tags, created_date, target_date, owner, stakeholders, custom_fields,
     last_accessed, is_active, version";

const WORK_ITEM_COLUMNS: &str = "id, title, description, kind, status, priority, parent_id,
     estimated_effort, assignee, created_date, updated_date, start_date, due_date,
     completed_date, tags, acceptance_criteria, dependencies, custom_fields";

/// What a diff-based update actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub version: u32,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub unchanged: usize,
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a status, type or priority column, refusing values the enum does not know.
fn enum_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<StoredProject> {
    Ok(StoredProject {
        project: Project {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            kind: row.get(3)?,
            status: enum_column(row, 4)?,
            priority: enum_column(row, 5)?,
            estimated_effort: row.get(6)?,
            tags: json_column(row, 7)?,
            created_date: row.get(8)?,
            target_date: row.get(9)?,
            owner: row.get(10)?,
            stakeholders: json_column(row, 11)?,
            custom_fields: json_column(row, 12)?,
        },
        last_accessed: row.get(13)?,
        is_active: row.get(14)?,
        version: row.get(15)?,
    })
}

fn work_item_from_row(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    Ok(WorkItem {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        kind: enum_column(row, 3)?,
        status: enum_column(row, 4)?,
        priority: enum_column(row, 5)?,
        parent_id: row.get(6)?,
        estimated_effort: row.get(7)?,
        assignee: row.get(8)?,
        created_date: row.get(9)?,
        updated_date: row.get(10)?,
        start_date: row.get(11)?,
        due_date: row.get(12)?,
        completed_date: row.get(13)?,
        tags: json_column(row, 14)?,
        acceptance_criteria: json_column(row, 15)?,
        dependencies: json_column(row, 16)?,
        custom_fields: json_column(row, 17)?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<Metadata> {
    Ok(Metadata {
        project_id: row.get(0)?,
        version: row.get(1)?,
        last_updated: row.get(2)?,
        total_work_items: row.get(3)?,
        completed_work_items: row.get(4)?,
        total_estimated_effort: row.get(5)?,
        schema_version: row.get(6)?,
    })
}

/// Fill in generated fields and reject item sets the store must never hold.
fn prepare_work_items(items: &mut [WorkItem], now: &str) -> StoreResult<()> {
    let mut seen = HashSet::new();
    for item in items.iter_mut() {
        if item.title.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "work item '{}' has an empty title",
                item.id
            )));
        }
        if item.id.trim().is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        if item.created_date.is_empty() {
            item.created_date = now.to_string();
        }
        if item.updated_date.is_empty() {
            item.updated_date.clone_from(&item.created_date);
        }
        if !seen.insert(item.id.clone()) {
            return Err(StoreError::Validation(format!(
                "duplicate work item id '{}'",
                item.id
            )));
        }
    }

    if let Some(id) = ancestry::find_cycle(&*items) {
        return Err(StoreError::Validation(format!(
            "work item '{id}' is part of a parent cycle"
        )));
    }
    Ok(())
}

fn validate_project(project: &Project) -> StoreResult<()> {
    if project.name.trim().is_empty() {
        return Err(StoreError::Validation("project name is empty".to_string()));
    }
    Ok(())
}

fn project_version(conn: &rusqlite::Connection, id: &str) -> StoreResult<Option<u32>> {
    Ok(conn
        .query_row(
            "SELECT version FROM projects WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_work_item(
    conn: &rusqlite::Connection,
    project_id: &str,
    position: usize,
    item: &WorkItem,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO work_items (project_id, id, position, title, description, kind, status,
                priority, parent_id, estimated_effort, assignee, created_date, updated_date,
                start_date, due_date, completed_date, tags, acceptance_criteria,
                dependencies, custom_fields)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20)
         ON CONFLICT (project_id, id) DO UPDATE SET
                position = excluded.position,
                title = excluded.title,
                description = excluded.description,
                kind = excluded.kind,
                status = excluded.status,
                priority = excluded.priority,
                parent_id = excluded.parent_id,
                estimated_effort = excluded.estimated_effort,
                assignee = excluded.assignee,
                created_date = excluded.created_date,
                updated_date = excluded.updated_date,
                start_date = excluded.start_date,
                due_date = excluded.due_date,
                completed_date = excluded.completed_date,
                tags = excluded.tags,
                acceptance_criteria = excluded.acceptance_criteria,
                dependencies = excluded.dependencies,
                custom_fields = excluded.custom_fields",
        params![
            project_id,
            item.id,
            position,
            item.title,
            item.description,
            item.kind.as_str(),
            item.status.as_str(),
            item.priority.as_str(),
            item.parent_id,
            item.estimated_effort,
            item.assignee,
            item.created_date,
            item.updated_date,
            item.start_date,
            item.due_date,
            item.completed_date,
            serde_json::to_string(&item.tags)?,
            serde_json::to_string(&item.acceptance_criteria)?,
            serde_json::to_string(&item.dependencies)?,
            serde_json::to_string(&item.custom_fields)?,
        ],
    )?;
    Ok(())
}

fn load_work_items(conn: &rusqlite::Connection, project_id: &str) -> StoreResult<Vec<WorkItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE project_id = ?1 ORDER BY position"
    ))?;
    let items = stmt
        .query_map(params![project_id], work_item_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Recompute the project's aggregate from the rows actually stored.
fn refresh_metadata(
    conn: &rusqlite::Connection,
    project_id: &str,
    version: u32,
    now: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (project_id, version, last_updated, total_work_items,
                completed_work_items, total_estimated_effort, schema_version)
         SELECT ?1, ?2, ?3, COUNT(*),
                COALESCE(SUM(status = 'done'), 0),
                COALESCE(SUM(estimated_effort), 0.0),
                ?4
         FROM work_items WHERE project_id = ?1",
        params![project_id, version, now, SCHEMA_VERSION],
    )?;
    Ok(())
}

impl Store {
    // ── Projects ──

    /// Write a project, its work items and fresh metadata in one transaction.
    ///
    /// The supplied project id is kept when it is non-empty and not already taken;
    /// otherwise a new one is generated. Returns the id the project was stored under.
    pub fn create_project(&mut self, data: ProjectData) -> StoreResult<String> {
        self.insert_project(data, false)
    }

    /// Like [`Store::create_project`], but the new project also becomes the only active
    /// one within the same transaction.
    pub fn create_active_project(&mut self, data: ProjectData) -> StoreResult<String> {
        self.insert_project(data, true)
    }

    fn insert_project(&mut self, data: ProjectData, activate: bool) -> StoreResult<String> {
        let ProjectData {
            mut project,
            mut work_items,
        } = data;
        let now = timestamp();
        validate_project(&project)?;
        prepare_work_items(&mut work_items, &now)?;

        let tx = self.begin()?;
        if project.id.trim().is_empty() || project_version(&tx, &project.id)?.is_some() {
            project.id = Uuid::new_v4().to_string();
        }
        if project.created_date.is_empty() {
            project.created_date.clone_from(&now);
        }
        if activate {
            tx.execute("UPDATE projects SET is_active = 0 WHERE is_active = 1", [])?;
        }

        tx.execute(
            &format!(
                "INSERT INTO projects ({PROJECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1)"
            ),
            params![
                project.id,
                project.name,
                project.description,
                project.kind,
                project.status.as_str(),
                project.priority.as_str(),
                project.estimated_effort,
                serde_json::to_string(&project.tags)?,
                project.created_date,
                project.target_date,
                project.owner,
                serde_json::to_string(&project.stakeholders)?,
                serde_json::to_string(&project.custom_fields)?,
                now,
                activate,
            ],
        )?;
        for (position, item) in work_items.iter().enumerate() {
            write_work_item(&tx, &project.id, position, item)?;
        }
        refresh_metadata(&tx, &project.id, 1, &now)?;
        tx.commit()?;

        tracing::info!(
            "created project '{}' ({}) with {} work items",
            project.name,
            project.id,
            work_items.len()
        );
        Ok(project.id)
    }

    pub fn get_project(&self, id: &str) -> StoreResult<ProjectSnapshot> {
        // Read inside one transaction so the three collections come from the same snapshot.
        let tx = self.conn.unchecked_transaction()?;
        let stored = tx
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let work_items = load_work_items(&tx, id)?;
        let metadata = tx
            .query_row(
                "SELECT project_id, version, last_updated, total_work_items,
                        completed_work_items, total_estimated_effort, schema_version
                 FROM metadata WHERE project_id = ?1",
                params![id],
                metadata_from_row,
            )
            .optional()?
            .unwrap_or_else(|| Metadata {
                project_id: id.to_string(),
                version: Some(stored.version),
                last_updated: None,
                total_work_items: 0,
                completed_work_items: 0,
                total_estimated_effort: 0.0,
                schema_version: Some(SCHEMA_VERSION),
            });
        tx.finish()?;

        Ok(ProjectSnapshot {
            project: stored.project,
            work_items,
            metadata,
        })
    }

    /// Replace a project's fields and work item set in one transaction.
    ///
    /// Work items are applied as a diff against what is stored: new ids are inserted,
    /// modified or moved items are rewritten, missing ids are deleted and identical
    /// rows are left alone. Custom fields follow [`CustomFields::merge`] for the project
    /// and for items that already exist.
    ///
    /// With `expected_version` set, the write is rejected with
    /// [`StoreError::VersionConflict`] unless it matches the stored version.
    ///
    pub fn update_project(
        &mut self,
        id: &str,
        data: ProjectData,
        expected_version: Option<u32>,
    ) -> StoreResult<UpdateSummary> {
        let ProjectData {
            mut project,
            mut work_items,
        } = data;
        let now = timestamp();
        validate_project(&project)?;
        prepare_work_items(&mut work_items, &now)?;

        let tx = self.begin()?;
        let current = project_version(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(expected) = expected_version
            && expected != current
        {
            return Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected,
                actual: current,
            });
        }
        let version = current + 1;

        let mut custom_fields: CustomFields = tx.query_row(
            "SELECT custom_fields FROM projects WHERE id = ?1",
            params![id],
            |row| json_column(row, 0),
        )?;
        custom_fields.merge(&project.custom_fields);
        project.custom_fields = custom_fields;

        tx.execute(
            "UPDATE projects SET name = ?1, description = ?2, kind = ?3, status = ?4,
                    priority = ?5, estimated_effort = ?6, tags = ?7, target_date = ?8,
                    owner = ?9, stakeholders = ?10, custom_fields = ?11,
                    last_accessed = ?12, version = ?13
             WHERE id = ?14",
            params![
                project.name,
                project.description,
                project.kind,
                project.status.as_str(),
                project.priority.as_str(),
                project.estimated_effort,
                serde_json::to_string(&project.tags)?,
                project.target_date,
                project.owner,
                serde_json::to_string(&project.stakeholders)?,
                serde_json::to_string(&project.custom_fields)?,
                now,
                version,
                id,
            ],
        )?;

        let mut existing: HashMap<String, (usize, WorkItem)> = load_work_items(&tx, id)?
            .into_iter()
            .enumerate()
            .map(|(position, item)| (item.id.clone(), (position, item)))
            .collect();

        let mut summary = UpdateSummary {
            version,
            ..UpdateSummary::default()
        };
        for (position, mut item) in work_items.into_iter().enumerate() {
            match existing.remove(&item.id) {
                None => {
                    write_work_item(&tx, id, position, &item)?;
                    summary.added += 1;
                }
                Some((old_position, old)) => {
                    let mut merged = old.custom_fields.clone();
                    merged.merge(&item.custom_fields);
                    item.custom_fields = merged;

                    let content_changed = item != old;
                    if content_changed && item.updated_date == old.updated_date {
                        item.updated_date.clone_from(&now);
                    }
                    if content_changed || position != old_position {
                        write_work_item(&tx, id, position, &item)?;
                        summary.changed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
            }
        }
        for removed_id in existing.keys() {
            tx.execute(
                "DELETE FROM work_items WHERE project_id = ?1 AND id = ?2",
                params![id, removed_id],
            )?;
        }
        summary.removed = existing.len();

        refresh_metadata(&tx, id, version, &now)?;
        tx.commit()?;

        tracing::debug!(
            "updated project {id} to version {version}: +{} ~{} -{}",
            summary.added,
            summary.changed,
            summary.removed
        );
        Ok(summary)
    }

    pub fn delete_project(&mut self, id: &str) -> StoreResult<()> {
        let tx = self.begin()?;
        if project_version(&tx, id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.execute("DELETE FROM work_items WHERE project_id = ?1", params![id])?;
        tx.execute("DELETE FROM metadata WHERE project_id = ?1", params![id])?;
        tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!("deleted project {id}");
        Ok(())
    }

    /// All projects, most recently accessed first.
    pub fn get_all_projects(&self) -> StoreResult<Vec<StoredProject>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY last_accessed DESC, rowid DESC"
        ))?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    pub fn get_metadata(&self, id: &str) -> StoreResult<Option<Metadata>> {
        Ok(self
            .conn
            .query_row(
                "SELECT project_id, version, last_updated, total_work_items,
                        completed_work_items, total_estimated_effort, schema_version
                 FROM metadata WHERE project_id = ?1",
                params![id],
                metadata_from_row,
            )
            .optional()?)
    }

    // ── Active project ──

    /// Mark `id` as the only active project and refresh its access time.
    pub fn set_active_project(&mut self, id: &str) -> StoreResult<()> {
        let now = timestamp();
        let tx = self.begin()?;
        if project_version(&tx, id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        // Clear first: the partial unique index allows only one active row at a time.
        tx.execute("UPDATE projects SET is_active = 0 WHERE is_active = 1", [])?;
        tx.execute(
            "UPDATE projects SET is_active = 1, last_accessed = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        tx.commit()?;
        tracing::debug!("active project is now {id}");
        Ok(())
    }

    pub fn get_active_project(&self) -> StoreResult<Option<StoredProject>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE is_active = 1"),
                [],
                project_from_row,
            )
            .optional()?)
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn set_setting(&self, key: &str, value: &Value) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    /// Returns whether the key existed.
    pub fn delete_setting(&self, key: &str) -> StoreResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn list_settings(&self) -> StoreResult<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, json_column(row, 1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(settings)
    }
}
