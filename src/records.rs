//! Read/write/delete for the three record types.
//!
//! `write` inserts when the record has no id yet and stores the new id back,
//! otherwise it updates in place. `delete` on sessions and instances removes
//! owned children first; nothing is rolled back if a later step fails.

use crate::models::{Instance, Session, SessionItem};
use crate::store::{Store, StoreError};

impl SessionItem {
    pub async fn read(store: &dyn Store, id: i64) -> Result<Option<Self>, StoreError> {
        store.get_item(id).await
    }

    pub async fn write(&mut self, store: &dyn Store) -> Result<(), StoreError> {
        match self.id {
            None => self.id = Some(store.insert_item(self).await?),
            Some(_) => store.update_item(self).await?,
        }
        Ok(())
    }

    pub async fn delete(&self, store: &dyn Store) -> Result<(), StoreError> {
        if let Some(id) = self.id {
            store.delete_item(id).await?;
        }
        Ok(())
    }
}

impl Session {
    /// Loads the session together with its items, newest first.
    pub async fn read(store: &dyn Store, id: i64) -> Result<Option<Self>, StoreError> {
        let Some(mut session) = store.get_session(id).await? else {
            return Ok(None);
        };
        session.items = store.items_for_session(id).await?;
        Ok(Some(session))
    }

    pub async fn write(&mut self, store: &dyn Store) -> Result<(), StoreError> {
        match self.id {
            None => self.id = Some(store.insert_session(self).await?),
            Some(_) => store.update_session(self).await?,
        }
        Ok(())
    }

    pub async fn delete(&self, store: &dyn Store) -> Result<(), StoreError> {
        let Some(id) = self.id else {
            return Ok(());
        };
        for item in store.items_for_session(id).await? {
            item.delete(store).await?;
        }
        store.delete_session(id).await
    }
}

impl Instance {
    /// Loads the instance with every session (newest first) and their items.
    pub async fn read(store: &dyn Store, id: i64) -> Result<Option<Self>, StoreError> {
        let Some(mut instance) = store.get_instance(id).await? else {
            return Ok(None);
        };
        let mut sessions = store.sessions_for_instance(id).await?;
        for session in &mut sessions {
            if let Some(sid) = session.id {
                session.items = store.items_for_session(sid).await?;
            }
        }
        instance.sessions = sessions;
        Ok(Some(instance))
    }

    pub async fn write(&mut self, store: &dyn Store) -> Result<(), StoreError> {
        match self.id {
            None => self.id = Some(store.insert_instance(self).await?),
            Some(_) => store.update_instance(self).await?,
        }
        Ok(())
    }

    pub async fn delete(&self, store: &dyn Store) -> Result<(), StoreError> {
        let Some(id) = self.id else {
            return Ok(());
        };
        for session in store.sessions_for_instance(id).await? {
            session.delete(store).await?;
        }
        store.remove_course_module(id).await?;
        store.delete_instance(id).await
    }
}
