use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Store, StoreError};
use crate::models::{Course, CourseActivity, Instance, Session, SessionItem};

#[derive(Debug, Clone)]
struct CourseModule {
    id: i64,
    course: i64,
    instance: i64,
    section: i32,
    visible: bool,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    instances: BTreeMap<i64, Instance>,
    sessions: BTreeMap<i64, Session>,
    items: BTreeMap<i64, SessionItem>,
    courses: BTreeMap<i64, Course>,
    modules: Vec<CourseModule>,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store for tests and database-less runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Connection("store lock poisoned".into()))
    }
}

fn missing(table: &str, id: Option<i64>) -> StoreError {
    StoreError::Constraint(format!("{table} row {id:?} does not exist"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_instance(&self, id: i64) -> Result<Option<Instance>, StoreError> {
        Ok(self.lock()?.instances.get(&id).cloned())
    }

    async fn insert_instance(&self, instance: &Instance) -> Result<i64, StoreError> {
        let mut t = self.lock()?;
        let id = t.allocate();
        let mut row = instance.clone();
        row.id = Some(id);
        row.sessions.clear();
        t.instances.insert(id, row);
        Ok(id)
    }

    async fn update_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        let id = instance.id.ok_or_else(|| missing("visualclass", None))?;
        let row = t.instances.get_mut(&id).ok_or_else(|| missing("visualclass", Some(id)))?;
        *row = instance.clone();
        row.sessions.clear();
        Ok(())
    }

    async fn delete_instance(&self, id: i64) -> Result<(), StoreError> {
        self.lock()?.instances.remove(&id);
        Ok(())
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<i64, StoreError> {
        let mut t = self.lock()?;
        if !t.instances.contains_key(&session.modid) {
            return Err(missing("visualclass", Some(session.modid)));
        }
        let id = t.allocate();
        let mut row = session.clone();
        row.id = Some(id);
        row.items.clear();
        t.sessions.insert(id, row);
        Ok(id)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        let id = session.id.ok_or_else(|| missing("visualclass_session", None))?;
        let row = t
            .sessions
            .get_mut(&id)
            .ok_or_else(|| missing("visualclass_session", Some(id)))?;
        *row = session.clone();
        row.items.clear();
        Ok(())
    }

    async fn delete_session(&self, id: i64) -> Result<(), StoreError> {
        self.lock()?.sessions.remove(&id);
        Ok(())
    }

    async fn sessions_for_instance(&self, modid: i64) -> Result<Vec<Session>, StoreError> {
        let t = self.lock()?;
        Ok(t.sessions.values().rev().filter(|s| s.modid == modid).cloned().collect())
    }

    async fn sessions_for_user(&self, userid: i64, modid: i64) -> Result<Vec<Session>, StoreError> {
        let t = self.lock()?;
        Ok(t
            .sessions
            .values()
            .filter(|s| s.modid == modid && s.userid == userid)
            .cloned()
            .collect())
    }

    async fn get_item(&self, id: i64) -> Result<Option<SessionItem>, StoreError> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn insert_item(&self, item: &SessionItem) -> Result<i64, StoreError> {
        let mut t = self.lock()?;
        if !t.sessions.contains_key(&item.sessionid) {
            return Err(missing("visualclass_session", Some(item.sessionid)));
        }
        let id = t.allocate();
        let mut row = item.clone();
        row.id = Some(id);
        t.items.insert(id, row);
        Ok(id)
    }

    async fn update_item(&self, item: &SessionItem) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        let id = item.id.ok_or_else(|| missing("visualclass_item", None))?;
        let row = t.items.get_mut(&id).ok_or_else(|| missing("visualclass_item", Some(id)))?;
        *row = item.clone();
        Ok(())
    }

    async fn delete_item(&self, id: i64) -> Result<(), StoreError> {
        self.lock()?.items.remove(&id);
        Ok(())
    }

    async fn items_for_session(&self, sessionid: i64) -> Result<Vec<SessionItem>, StoreError> {
        let t = self.lock()?;
        Ok(t.items.values().rev().filter(|i| i.sessionid == sessionid).cloned().collect())
    }

    async fn get_course(&self, id: i64) -> Result<Option<Course>, StoreError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn upsert_course(&self, course: &Course) -> Result<(), StoreError> {
        self.lock()?.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn add_course_module(
        &self,
        course: i64,
        instance: i64,
        section: i32,
        visible: bool,
    ) -> Result<i64, StoreError> {
        let mut t = self.lock()?;
        let id = t.allocate();
        t.modules.push(CourseModule { id, course, instance, section, visible });
        Ok(id)
    }

    async fn remove_course_module(&self, instance: i64) -> Result<(), StoreError> {
        self.lock()?.modules.retain(|m| m.instance != instance);
        Ok(())
    }

    async fn course_activities(&self, course: i64) -> Result<Vec<CourseActivity>, StoreError> {
        let t = self.lock()?;
        let mut out: Vec<CourseActivity> = t
            .modules
            .iter()
            .filter(|m| m.course == course)
            .filter_map(|m| {
                t.instances.get(&m.instance).map(|inst| CourseActivity {
                    coursemodule: m.id,
                    instance: m.instance,
                    name: inst.name.clone(),
                    section: m.section,
                    visible: m.visible,
                })
            })
            .collect();
        out.sort_by_key(|a| (a.section, a.coursemodule));
        Ok(out)
    }
}
