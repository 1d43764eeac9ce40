use futures::future::BoxFuture;
use gencache::{
    atomic_write, now_millis, BoxError, CacheConfig, CacheDir, CacheError, DocCache,
    DocCachePolicy, DocGenerator, EntryState, PackageSpecifier,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts invocations; optionally slow, failing, or refusing to run twice.
struct TestGenerator {
    calls: AtomicUsize,
    delay: Duration,
    document: Value,
    fail: bool,
    fail_on_repeat: bool,
}

impl TestGenerator {
    fn new(document: Value) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            document,
            fail: false,
            fail_on_repeat: false,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn once_only(mut self) -> Self {
        self.fail_on_repeat = true;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocGenerator for TestGenerator {
    fn generate<'a>(
        &'a self,
        _specifier: &'a PackageSpecifier,
    ) -> BoxFuture<'a, Result<Value, BoxError>> {
        Box::pin(async move {
            let previous = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_repeat && previous > 0 {
                return Err("generator invoked more than once".into());
            }
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err("docgen crashed".into());
            }
            Ok(self.document.clone())
        })
    }
}

fn fast_policy() -> DocCachePolicy {
    DocCachePolicy {
        retry_interval: Duration::from_millis(10),
        retry_count: 200,
        placeholder_ttl: Duration::from_secs(60),
    }
}

fn new_cache(policy: DocCachePolicy) -> (tempfile::TempDir, CacheDir, DocCache) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = CacheDir::new(CacheConfig::with_root(tmp.path().join("cache"))).unwrap();
    let cache = DocCache::with_policy(&dir, policy);
    (tmp, dir, cache)
}

fn write_placeholder(cache: &DocCache, specifier: &str, timestamp: u64) {
    let path = cache.entry_path(specifier).unwrap();
    let bytes = serde_json::to_vec(&json!({"loading": true, "timestamp": timestamp})).unwrap();
    atomic_write(&path, &bytes).unwrap();
}

#[test]
fn default_policy_matches_documented_constants() {
    let policy = DocCachePolicy::default();
    assert_eq!(policy.retry_interval, Duration::from_millis(500));
    assert_eq!(policy.retry_count, 20);
    assert_eq!(policy.placeholder_ttl, Duration::from_millis(60_000));
}

#[tokio::test]
async fn end_to_end_generates_once_and_then_hits() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({"functions": []})).delayed(Duration::from_millis(20));

    let path = cache.ensure("pkg@1.0.0", &generator).await.unwrap();
    assert!(path.is_absolute());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"functions":[]}"#);
    assert_eq!(generator.calls(), 1);

    let again = cache.ensure("pkg@1.0.0", &generator).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn sequential_ensure_is_idempotent() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({"functions": ["fn"]})).once_only();

    let first = cache.ensure("@org/language-http@2.1.0", &generator).await.unwrap();
    let second = cache.ensure("@org/language-http@2.1.0", &generator).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(generator.calls(), 1);
    assert!(first.ends_with("docs/@org/language-http@2.1.0.json"));
}

#[tokio::test]
async fn concurrent_ensure_generates_exactly_once() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({"functions": []})).delayed(Duration::from_millis(80));

    let (a, b) = tokio::join!(
        cache.ensure("pkg@1.0.0", &generator),
        cache.ensure("pkg@1.0.0", &generator)
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a, b);
    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.state("pkg@1.0.0").unwrap(), EntryState::Complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_cache_handles_share_one_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    let generator = Arc::new(
        TestGenerator::new(json!({"functions": []})).delayed(Duration::from_millis(100)),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        // A fresh CacheDir/DocCache per task, as separate CLI processes would have.
        let dir = CacheDir::new(CacheConfig::with_root(&root)).unwrap();
        let cache = DocCache::with_policy(&dir, fast_policy());
        let generator = generator.clone();
        tasks.push(tokio::spawn(async move {
            cache.ensure("pkg@3.0.0", generator.as_ref()).await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn abandoned_placeholder_is_replaced() {
    let policy = fast_policy();
    let (_tmp, _dir, cache) = new_cache(policy);
    let ttl = policy.placeholder_ttl.as_millis() as u64;
    write_placeholder(&cache, "pkg@1.0.0", now_millis() - (ttl + 1));

    // Waiting on the placeholder would time out: nothing else will ever complete it.
    let generator = TestGenerator::new(json!({"functions": []}));
    let path = cache.ensure("pkg@1.0.0", &generator).await.unwrap();

    assert_eq!(generator.calls(), 1);
    let on_disk: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"functions": []}));
}

#[tokio::test]
async fn fresh_placeholder_times_out_and_is_left_in_place() {
    let policy = DocCachePolicy {
        retry_interval: Duration::from_millis(10),
        retry_count: 5,
        placeholder_ttl: Duration::from_secs(60),
    };
    let (_tmp, _dir, cache) = new_cache(policy);
    let timestamp = now_millis();
    write_placeholder(&cache, "pkg@1.0.0", timestamp);

    let generator = TestGenerator::new(json!({}));
    let started = Instant::now();
    let err = cache.ensure("pkg@1.0.0", &generator).await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(generator.calls(), 0);
    assert_eq!(
        cache.state("pkg@1.0.0").unwrap(),
        EntryState::Placeholder { timestamp }
    );
}

#[tokio::test]
async fn failed_generation_rolls_back_placeholder() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({})).failing();

    let err = cache.ensure("pkg@1.0.0", &generator).await.unwrap_err();
    match err {
        CacheError::GenerationFailed { specifier, source } => {
            assert_eq!(specifier, "pkg@1.0.0");
            assert_eq!(source.to_string(), "docgen crashed");
        }
        other => panic!("expected GenerationFailed, got {other:?}"),
    }
    assert_eq!(cache.state("pkg@1.0.0").unwrap(), EntryState::Absent);

    // The next caller gets a fresh attempt.
    let generator = TestGenerator::new(json!({"functions": []}));
    cache.ensure("pkg@1.0.0", &generator).await.unwrap();
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn waiter_takes_over_when_owner_rolls_back() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    write_placeholder(&cache, "pkg@1.0.0", now_millis());
    let path = cache.entry_path("pkg@1.0.0").unwrap();

    // Simulate the owning process failing: it removes its placeholder.
    let remover = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        std::fs::remove_file(path).unwrap();
    });

    let generator = TestGenerator::new(json!({"functions": []}));
    cache.ensure("pkg@1.0.0", &generator).await.unwrap();
    remover.await.unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.state("pkg@1.0.0").unwrap(), EntryState::Complete);
}

#[tokio::test]
async fn dropped_generation_releases_placeholder() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({})).delayed(Duration::from_secs(30));

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        cache.ensure("pkg@1.0.0", &generator),
    )
    .await;

    assert!(result.is_err(), "generation should still have been running");
    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.state("pkg@1.0.0").unwrap(), EntryState::Absent);
}

#[tokio::test]
async fn versionless_specifier_fails_before_touching_disk() {
    let (_tmp, dir, cache) = new_cache(fast_policy());
    let generator = TestGenerator::new(json!({}));

    let err = cache.ensure("@org/language-http", &generator).await.unwrap_err();
    assert!(matches!(err, CacheError::InvalidSpecifier { .. }));
    assert_eq!(generator.calls(), 0);
    assert_eq!(std::fs::read_dir(dir.docs_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn corrupt_entry_is_reported_not_overwritten() {
    let (_tmp, _dir, cache) = new_cache(fast_policy());
    let path = cache.entry_path("pkg@1.0.0").unwrap();
    atomic_write(&path, br#"{"loading": true, "timest"#).unwrap();

    let generator = TestGenerator::new(json!({}));
    let err = cache.ensure("pkg@1.0.0", &generator).await.unwrap_err();

    assert!(matches!(err, CacheError::CorruptCache { .. }));
    assert_eq!(generator.calls(), 0);
    assert_eq!(
        std::fs::read(&path).unwrap(),
        br#"{"loading": true, "timest"#.to_vec()
    );
}
