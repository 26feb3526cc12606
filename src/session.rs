//! Session data and the session store boundary.
//!
//! A session is guid-keyed key/value state shared between the gateway and
//! the backend services. Its lifecycle belongs to a [`SessionStore`]; the
//! gateway only reads known keys and writes the subset the cookie
//! synchronizer allows. [`MemoryStore`] is the in-process implementation;
//! an external store would plug in behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::Result;
use crate::metadata::keys;

/// Name under which the session-binding credential travels as a cookie,
/// header, and in the login reply body.
pub const CREDENTIAL_NAME: &str = "gw-session";

/// One identity's session state.
#[derive(Debug)]
pub struct Session {
    guid: String,
    values: RwLock<HashMap<String, String>>,
    /// Push acknowledgement counter, see the default response hook.
    counter: AtomicI64,
}

impl Session {
    /// Create a session bound to `guid` with initial values.
    #[must_use]
    pub fn new(guid: &str, values: HashMap<String, String>) -> Self {
        Self {
            guid: guid.to_string(),
            values: RwLock::new(values),
            counter: AtomicI64::new(0),
        }
    }

    /// The account identity this session belongs to.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Look a session value up.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// The selected role id, if one is bound.
    #[must_use]
    pub fn uid(&self) -> Option<String> {
        self.get(keys::UID).filter(|uid| !uid.is_empty())
    }

    /// Whether the developer/master flag is set on this session.
    #[must_use]
    pub fn is_developer(&self) -> bool {
        matches!(self.get(keys::DEVELOPER).as_deref(), Some("1" | "true"))
    }

    /// Next value of the per-session push counter.
    pub fn next_push_id(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge values into the session state. Store implementations call this
    /// from [`SessionStore::update`]; everything else goes through the
    /// synchronizer's whitelist.
    pub(crate) fn apply(&self, values: HashMap<String, String>) {
        self.values.write().extend(values);
    }

    /// Snapshot of all session values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().clone()
    }
}

/// Persistent session storage boundary.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for `guid` and return it with its binding credential.
    async fn create(
        &self,
        guid: &str,
        values: HashMap<String, String>,
    ) -> Result<(Arc<Session>, String)>;

    /// Resolve a binding credential to its session, if still live.
    async fn verify(&self, credential: &str) -> Result<Option<Arc<Session>>>;

    /// Persist values onto a session in one batched update.
    async fn update(&self, session: &Session, values: HashMap<String, String>) -> Result<()>;

    /// Tear a session down.
    async fn delete(&self, session: &Session) -> Result<()>;
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    by_credential: DashMap<String, Arc<Session>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_credential.len()
    }

    /// True when no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_credential.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(
        &self,
        guid: &str,
        values: HashMap<String, String>,
    ) -> Result<(Arc<Session>, String)> {
        let credential = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(guid, values));
        self.by_credential
            .insert(credential.clone(), Arc::clone(&session));
        Ok((session, credential))
    }

    async fn verify(&self, credential: &str) -> Result<Option<Arc<Session>>> {
        Ok(self
            .by_credential
            .get(credential)
            .map(|entry| Arc::clone(entry.value())))
    }

    async fn update(&self, session: &Session, values: HashMap<String, String>) -> Result<()> {
        session.apply(values);
        Ok(())
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        self.by_credential
            .retain(|_, live| live.guid() != session.guid());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_verify_delete_lifecycle() {
        let store = MemoryStore::new();
        let (session, credential) = store.create("acct-1", HashMap::new()).await.unwrap();
        assert_eq!(session.guid(), "acct-1");

        let resolved = store.verify(&credential).await.unwrap().unwrap();
        assert_eq!(resolved.guid(), "acct-1");

        store.delete(&session).await.unwrap();
        assert!(store.verify(&credential).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_is_a_batched_merge() {
        let store = MemoryStore::new();
        let (session, _) = store.create("acct-1", HashMap::new()).await.unwrap();
        store
            .update(
                &session,
                HashMap::from([
                    (keys::UID.to_string(), "u9".to_string()),
                    (keys::SERVER_ID.to_string(), "s3".to_string()),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(session.uid().as_deref(), Some("u9"));
        assert_eq!(session.get(keys::SERVER_ID).as_deref(), Some("s3"));
    }

    #[test]
    fn developer_flag_and_push_counter() {
        let session = Session::new(
            "acct-1",
            HashMap::from([(keys::DEVELOPER.to_string(), "1".to_string())]),
        );
        assert!(session.is_developer());
        assert_eq!(session.next_push_id(), 1);
        assert_eq!(session.next_push_id(), 2);
    }

    #[test]
    fn empty_uid_counts_as_unselected() {
        let session = Session::new(
            "acct-1",
            HashMap::from([(keys::UID.to_string(), String::new())]),
        );
        assert!(session.uid().is_none());
    }
}
