//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use usercache::application::auth::{AuthorizationGate, CallerIdentity, SelfAccessGate};
use usercache::application::repos::{RepoError, UsersRepo, UsersWriteRepo};
use usercache::application::users::UserService;
use usercache::cache::{
    CacheAside, CacheConfig, CacheError, CacheKey, CacheStore, MemoryCacheStore, Namespace,
};
use usercache::domain::users::{UserRecord, Username};

pub const REPO_TIMEOUT: Duration = Duration::from_secs(2);

pub fn user(id: i64, username: &str) -> UserRecord {
    UserRecord {
        id,
        username: username.to_string(),
        firstname: format!("{username}-first"),
        lastname: format!("{username}-last"),
        role: "USER".to_string(),
    }
}

pub fn caller(username: &str) -> CallerIdentity {
    CallerIdentity::new(username)
}

pub fn key(username: &str) -> CacheKey {
    CacheKey::user(&Username::parse(username).expect("valid username"))
}

/// Backing store that counts reads and can be made to fail or stall.
#[derive(Default)]
pub struct FakeUsers {
    rows: Mutex<Vec<UserRecord>>,
    find_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    failing: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl FakeUsers {
    pub fn with_users(rows: Vec<UserRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Change a row behind the cache's back.
    pub fn rename(&self, username: &str, firstname: &str) {
        let mut rows = self.rows.lock().expect("rows lock");
        if let Some(row) = rows.iter_mut().find(|row| row.username == username) {
            row.firstname = firstname.to_string();
        }
    }

    /// Remove a row behind the cache's back.
    pub fn remove(&self, username: &str) {
        self.rows
            .lock()
            .expect("rows lock")
            .retain(|row| row.username != username);
    }

    async fn before_read(&self) -> Result<(), RepoError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl UsersRepo for FakeUsers {
    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<UserRecord>, RepoError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows
            .iter()
            .find(|row| row.username == username.as_str())
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<UserRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let mut rows = self.rows.lock().expect("rows lock").clone();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl UsersWriteRepo for FakeUsers {
    async fn delete_by_username(&self, username: &Username) -> Result<bool, RepoError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection refused"));
        }
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|row| row.username != username.as_str());
        Ok(rows.len() != before)
    }
}

/// Wraps the in-process store with switchable faults and a write counter.
pub struct FaultyStore {
    pub inner: MemoryCacheStore,
    puts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    hang: AtomicBool,
    fail_namespace: Mutex<Option<Namespace>>,
}

impl FaultyStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: MemoryCacheStore::new(config),
            puts: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            fail_namespace: Mutex::new(None),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every call blocks until the coordinator's timeout gives up on it.
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn fail_namespace_eviction(&self, namespace: Option<Namespace>) {
        *self.fail_namespace.lock().expect("fault lock") = namespace;
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl CacheStore for FaultyStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        self.maybe_hang().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("connection reset"));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.maybe_hang().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("connection reset"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, ttl).await
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.maybe_hang().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("connection reset"));
        }
        self.inner.evict(key).await
    }

    async fn evict_namespace(&self, namespace: Namespace) -> Result<(), CacheError> {
        self.maybe_hang().await;
        let failing = *self.fail_namespace.lock().expect("fault lock");
        if failing == Some(namespace) || self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("connection reset"));
        }
        self.inner.evict_namespace(namespace).await
    }

    fn backend(&self) -> &'static str {
        "faulty-memory"
    }
}

pub struct Harness {
    pub repo: Arc<FakeUsers>,
    pub store: Arc<FaultyStore>,
    pub cache: Arc<CacheAside>,
    pub service: UserService,
}

pub fn harness(config: CacheConfig, rows: Vec<UserRecord>) -> Harness {
    let repo = Arc::new(FakeUsers::with_users(rows));
    let store = Arc::new(FaultyStore::new(&config));
    let cache = Arc::new(CacheAside::new(
        config,
        store.clone(),
        repo.clone(),
        REPO_TIMEOUT,
    ));
    let gate: Arc<dyn AuthorizationGate> = Arc::new(SelfAccessGate);
    let service = UserService::new(cache.clone(), repo.clone(), gate, REPO_TIMEOUT);

    Harness {
        repo,
        store,
        cache,
        service,
    }
}

pub fn alice_and_bob() -> Vec<UserRecord> {
    vec![user(1, "alice"), user(2, "bob")]
}
