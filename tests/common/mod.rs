//! Shared fixtures for the integration tests: a migrated SQLite database
//! in a temp dir, the real store/channel/producer on top of it, a local
//! asset store, and deterministic embedding and generation fakes.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use personal_os::app::App;
use personal_os::assets::LocalStore;
use personal_os::config::{parse_config, Config};
use personal_os::migrate;
use personal_os::producer::Producer;
use personal_os::sqlite_channel::SqliteEventChannel;
use personal_os::sqlite_store::SqliteStore;
use personal_os::worker::{ConsumerSettings, Worker, WorkerStats};
use personal_os_core::channel::{EventChannel, Message, Subscription};
use personal_os_core::embedding::Embedder;
use personal_os_core::enrich::{MediaEnricher, PostEnricher};
use personal_os_core::events::{LifecycleEvent, MediaEvent, PostEvent};
use personal_os_core::generate::Generator;

pub const DIMS: usize = 32;

pub struct TestEnv {
    pub tmp: TempDir,
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub channel: Arc<SqliteEventChannel>,
    pub producer: Producer,
    pub assets: Arc<LocalStore>,
    pub embedder: Arc<KeywordEmbedder>,
}

pub fn write_config(tmp: &TempDir) -> String {
    let root = tmp.path().display();
    format!(
        r#"[db]
path = "{root}/data/pos.sqlite"

[channel]
partitions = 4
poll_interval_ms = 10
lease_ttl_secs = 30
failure_pause_ms = 20

[assets]
provider = "local"
root = "{root}/assets"
base_url = "http://assets.test"
"#
    )
}

pub async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&write_config(&tmp)).unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let app = App::connect(&config).await.unwrap();
    let assets = Arc::new(LocalStore::new(&config.assets).unwrap());
    TestEnv {
        tmp,
        config,
        store: app.store,
        channel: app.channel,
        producer: app.producer,
        assets,
        embedder: Arc::new(KeywordEmbedder::new()),
    }
}

impl TestEnv {
    pub fn settings(&self) -> ConsumerSettings {
        ConsumerSettings::from_config(&self.config)
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.channel.clone(),
            PostEnricher::new(self.store.clone(), self.assets.clone(), self.embedder.clone()),
            MediaEnricher::new(self.store.clone(), self.assets.clone()),
            self.settings(),
        )
    }

    pub fn spawn_worker(&self) -> RunningWorker {
        let (tx, rx) = watch::channel(false);
        let worker = self.worker();
        let handle = tokio::spawn(async move { worker.run(rx).await.unwrap() });
        RunningWorker { tx, handle }
    }

    pub async fn backlog(&self) -> i64 {
        let posts = self
            .channel
            .backlog(PostEvent::TOPIC, PostEvent::GROUP)
            .await
            .unwrap();
        let media = self
            .channel
            .backlog(MediaEvent::TOPIC, MediaEvent::GROUP)
            .await
            .unwrap();
        posts + media
    }

    /// Flush pending publishes, then run a worker until every message is
    /// committed.
    pub async fn drain(&self) -> WorkerStats {
        self.producer.flush().await;
        let worker = self.spawn_worker();
        let env = self;
        wait_until(move || async move { env.backlog().await == 0 }).await;
        worker.stop().await
    }

    pub fn asset_path(&self, public_id: &str) -> std::path::PathBuf {
        self.tmp.path().join("assets").join(public_id)
    }
}

pub struct RunningWorker {
    tx: watch::Sender<bool>,
    handle: JoinHandle<WorkerStats>,
}

impl RunningWorker {
    pub async fn stop(self) -> WorkerStats {
        self.tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("worker did not stop")
            .unwrap()
    }
}

/// Poll `condition` every 10ms for up to 10s.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..1000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 10s");
}

// ─── Embedding / generation fakes ───────────────────────────────────

/// Bag-of-words embedder: each lowercase word increments one hashed
/// dimension. Texts sharing words get a high cosine similarity.
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            bail!("embedding service unavailable");
        }

        let mut vector = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % DIMS as u64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedder that takes `delay` per call, for exercising lease renewal.
pub struct SlowEmbedder {
    delay: Duration,
    started: AtomicBool,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicBool::new(false),
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0; DIMS])
    }
}

/// Embedder with a bug: every call panics.
pub struct PanickingEmbedder;

#[async_trait]
impl Embedder for PanickingEmbedder {
    fn model_name(&self) -> &str {
        "panicking-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        panic!("embedder bug");
    }
}

#[derive(Default)]
pub struct EchoGenerator {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo-test"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("answer from posts".to_string())
    }
}

// ─── Channel fakes ──────────────────────────────────────────────────

/// Wraps a channel and fails every publish while `down` is set.
pub struct FlakyChannel {
    pub inner: Arc<dyn EventChannel>,
    pub down: AtomicBool,
    failures_left: AtomicUsize,
}

impl FlakyChannel {
    /// A channel whose every publish fails until `down` is cleared.
    pub fn new(inner: Arc<dyn EventChannel>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(true),
            failures_left: AtomicUsize::new(0),
        }
    }

    /// A working channel whose first `n` publishes fail.
    pub fn failing_first(inner: Arc<dyn EventChannel>, n: usize) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failures_left: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl EventChannel for FlakyChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.down.load(Ordering::SeqCst) {
            bail!("broker unreachable");
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn fetch(&self, sub: &Subscription) -> Result<Option<Message>> {
        self.inner.fetch(sub).await
    }

    async fn commit(&self, sub: &Subscription, message: &Message) -> Result<bool> {
        self.inner.commit(sub, message).await
    }

    async fn renew(&self, sub: &Subscription, partition: u32) -> Result<bool> {
        self.inner.renew(sub, partition).await
    }

    async fn release(&self, sub: &Subscription) -> Result<()> {
        self.inner.release(sub).await
    }
}
