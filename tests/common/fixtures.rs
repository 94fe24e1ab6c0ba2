//! Fixtures shared by the integration suites
//!
//! Every test gets its own temporary SQLite file and, where HTTP is involved,
//! its own wiremock server.

use std::future::Future;
use std::time::Duration;

use campo_sync::local_db::LocalDatabase;
use campo_sync::offline::{ApiClient, EnqueueRequest, Reconciler};
use campo_sync::shared::{Method, SyncConfig};
use tempfile::TempDir;

/// Request timeout used by test clients
pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

/// Temporary queue file plus the config pointing at it
pub struct TestQueue {
    /// Kept alive so the directory outlives the test
    pub dir: TempDir,
    pub config: SyncConfig,
}

impl TestQueue {
    /// Queue against `api_base`, fast backoff, no attempt cap
    pub fn new(api_base: &str) -> Self {
        Self::with(api_base, |builder| builder)
    }

    /// Queue with extra builder tweaks
    pub fn with(
        api_base: &str,
        tweak: impl FnOnce(campo_sync::shared::SyncConfigBuilder) -> campo_sync::shared::SyncConfigBuilder,
    ) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let builder = SyncConfig::builder()
            .api_base_url(api_base)
            .database_path(dir.path().join("queue.db"))
            .request_timeout(TEST_TIMEOUT)
            .backoff(Duration::from_millis(100), Duration::from_millis(400));
        let config = tweak(builder).build().expect("invalid test config");
        Self { dir, config }
    }

    /// Fresh store handle on the queue file
    pub async fn open(&self) -> LocalDatabase {
        LocalDatabase::open(&self.config.database_path)
            .await
            .expect("failed to open test database")
    }

    /// Fresh reconciler with its own store handle and client
    pub async fn reconciler(&self, context: &'static str) -> Reconciler {
        Reconciler::new(
            self.open().await,
            ApiClient::new(&self.config).expect("failed to build client"),
        )
        .with_max_attempts(self.config.max_attempts)
        .with_context(context)
    }
}

/// POST to `/denuncias` with the given idempotency key
pub fn denuncia(key: &str) -> EnqueueRequest {
    EnqueueRequest::new("CREATE_DENUNCIA", "/denuncias", Method::Post, key)
        .with_json(&serde_json::json!({ "titulo": "Queimada na estrada", "chave": key }))
        .expect("payload serializes")
}

/// PUT to `/atividades/{id}`
pub fn atividade(id: u32, key: &str) -> EnqueueRequest {
    EnqueueRequest::new(
        "UPSERT_ATIVIDADE",
        format!("/atividades/{}", id),
        Method::Put,
        key,
    )
}

/// Poll `check` until it returns true or `timeout` runs out
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
