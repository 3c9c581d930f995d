//! Switching between projects while keeping exactly one of them in focus.

use crate::store::{ProjectSnapshot, Store, StoreResult};

pub struct ActiveProjects<'a> {
    store: &'a mut Store,
}

impl<'a> ActiveProjects<'a> {
    pub fn new(store: &'a mut Store) -> Self {
        ActiveProjects { store }
    }

    /// Make `id` the active project and return its full data.
    pub fn switch_to(&mut self, id: &str) -> StoreResult<ProjectSnapshot> {
        self.store.set_active_project(id)?;
        let snapshot = self.store.get_project(id)?;
        tracing::info!("switched to project '{}'", snapshot.project.name);
        Ok(snapshot)
    }

    pub fn current(&self) -> StoreResult<Option<ProjectSnapshot>> {
        match self.store.get_active_project()? {
            Some(active) => self.store.get_project(&active.project.id).map(Some),
            None => Ok(None),
        }
    }

    /// Return the active project, activating the most recently accessed one if none is.
    ///
    /// Yields `None` only while the store holds no projects at all.
    pub fn restore(&mut self) -> StoreResult<Option<ProjectSnapshot>> {
        if let Some(snapshot) = self.current()? {
            return Ok(Some(snapshot));
        }
        let Some(latest) = self.store.get_all_projects()?.into_iter().next() else {
            return Ok(None);
        };
        self.switch_to(&latest.project.id).map(Some)
    }
}
