//! Relational record access used by the persistence layer.
//!
//! `Store` is deliberately row-shaped: it knows nothing about cascades or
//! loading children, which `records` builds on top of it.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Course, CourseActivity, Instance, Session, SessionItem};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_instance(&self, id: i64) -> Result<Option<Instance>, StoreError>;
    async fn insert_instance(&self, instance: &Instance) -> Result<i64, StoreError>;
    async fn update_instance(&self, instance: &Instance) -> Result<(), StoreError>;
    async fn delete_instance(&self, id: i64) -> Result<(), StoreError>;

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StoreError>;
    async fn insert_session(&self, session: &Session) -> Result<i64, StoreError>;
    async fn update_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn delete_session(&self, id: i64) -> Result<(), StoreError>;
    /// Sessions of an instance, newest first.
    async fn sessions_for_instance(&self, modid: i64) -> Result<Vec<Session>, StoreError>;
    async fn sessions_for_user(&self, userid: i64, modid: i64) -> Result<Vec<Session>, StoreError>;

    async fn get_item(&self, id: i64) -> Result<Option<SessionItem>, StoreError>;
    async fn insert_item(&self, item: &SessionItem) -> Result<i64, StoreError>;
    async fn update_item(&self, item: &SessionItem) -> Result<(), StoreError>;
    async fn delete_item(&self, id: i64) -> Result<(), StoreError>;
    /// Items of a session, newest first.
    async fn items_for_session(&self, sessionid: i64) -> Result<Vec<SessionItem>, StoreError>;

    async fn get_course(&self, id: i64) -> Result<Option<Course>, StoreError>;
    async fn upsert_course(&self, course: &Course) -> Result<(), StoreError>;
    async fn add_course_module(
        &self,
        course: i64,
        instance: i64,
        section: i32,
        visible: bool,
    ) -> Result<i64, StoreError>;
    async fn remove_course_module(&self, instance: i64) -> Result<(), StoreError>;
    /// Activities placed in a course, ordered by section then module id.
    async fn course_activities(&self, course: i64) -> Result<Vec<CourseActivity>, StoreError>;
}
