//! Read-through cache for catalog reads and rating aggregates.
//!
//! Invalidate-on-write, not write-through: the write path calls the `evict_*`
//! hooks after a successful create/update/delete. Between a write and its
//! eviction another instance may still read the old value, so no reader may
//! assume strong consistency.
//!
//! Every payload is wrapped with the [`CacheShape`] tag of the type that wrote
//! it. A read expecting a different shape is treated as a miss and the slot is
//! dropped, so one key can never be decoded as an unrelated collection.
//!
//! Store failures never reach the caller: reads become misses and writes or
//! evictions are logged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::TtlStore;

/// Single catalog entities, cached under `{kind}:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Course,
    Teacher,
    Faculty,
}

impl EntityKind {
    fn prefix(self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::Teacher => "teacher",
            EntityKind::Faculty => "faculty",
        }
    }

    /// The subject whose rating aggregate depends on this entity, if any.
    fn rated_subject(self) -> Option<SubjectKind> {
        match self {
            EntityKind::Course => Some(SubjectKind::Course),
            EntityKind::Teacher => Some(SubjectKind::Teacher),
            EntityKind::Faculty => None,
        }
    }
}

/// Things that collect reviews, cached under `rating:{kind}:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Course,
    Teacher,
}

impl SubjectKind {
    fn prefix(self) -> &'static str {
        match self {
            SubjectKind::Course => "course",
            SubjectKind::Teacher => "teacher",
        }
    }
}

/// Whole-collection reads. Each shape owns its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Courses,
    Teachers,
    Faculties,
}

impl Collection {
    fn key(self) -> &'static str {
        match self {
            Collection::Courses => "course:all",
            Collection::Teachers => "teacher:all",
            Collection::Faculties => "faculty:all",
        }
    }
}

/// TTLs for the two classes of cached data.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub entity: Duration,
    /// Shorter, since aggregates move as reviews arrive.
    pub aggregate: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            entity: Duration::from_secs(2 * 60 * 60),
            aggregate: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    shape: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct StoredEnvelope<T> {
    shape: String,
    value: T,
}

/// Tag stored next to every cached payload.
///
/// Tags are part of the stored format: every instance of a rolling deploy
/// must agree on them, so they are spelled out per type and never derived
/// from compiler output. Each cached type needs its own tag.
pub trait CacheShape {
    const SHAPE: &'static str;
}

impl<T: CacheShape + ?Sized> CacheShape for &T {
    const SHAPE: &'static str = T::SHAPE;
}

fn entity_key(kind: EntityKind, id: impl fmt::Display) -> String {
    format!("{}:{}", kind.prefix(), id)
}

fn aggregate_key(subject: SubjectKind, id: impl fmt::Display) -> String {
    format!("rating:{}:{}", subject.prefix(), id)
}

/// Cache layer over the shared store.
#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn TtlStore>,
    ttls: CacheTtls,
}

impl EntityCache {
    pub fn new(store: Arc<dyn TtlStore>, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    pub async fn cache_entity<T: Serialize + CacheShape>(&self, kind: EntityKind, id: i64, value: &T) {
        self.put(&entity_key(kind, id), T::SHAPE, value, self.ttls.entity)
            .await;
    }

    pub async fn get_cached_entity<T: DeserializeOwned + CacheShape>(&self, kind: EntityKind, id: i64) -> Option<T> {
        self.fetch(&entity_key(kind, id), T::SHAPE).await
    }

    /// Collections carry the tag of their element type.
    pub async fn cache_collection<T: Serialize + CacheShape>(&self, collection: Collection, items: &[T]) {
        self.put(collection.key(), T::SHAPE, items, self.ttls.entity)
            .await;
    }

    pub async fn get_cached_collection<T: DeserializeOwned + CacheShape>(
        &self,
        collection: Collection,
    ) -> Option<Vec<T>> {
        self.fetch(collection.key(), T::SHAPE).await
    }

    pub async fn cache_aggregate<T: Serialize + CacheShape>(&self, subject: SubjectKind, id: i64, value: &T) {
        self.put(&aggregate_key(subject, id), T::SHAPE, value, self.ttls.aggregate)
            .await;
    }

    pub async fn get_cached_aggregate<T: DeserializeOwned + CacheShape>(
        &self,
        subject: SubjectKind,
        id: i64,
    ) -> Option<T> {
        self.fetch(&aggregate_key(subject, id), T::SHAPE).await
    }

    /// Drop a cached entity and, for courses and teachers, its rating aggregate.
    pub async fn evict_entity(&self, kind: EntityKind, id: i64) {
        self.drop_key(&entity_key(kind, id)).await;
        if let Some(subject) = kind.rated_subject() {
            self.drop_key(&aggregate_key(subject, id)).await;
        }
    }

    pub async fn evict_collection(&self, collection: Collection) {
        self.drop_key(collection.key()).await;
    }

    /// Drop a rating aggregate, e.g. after a review is posted.
    pub async fn evict_aggregate(&self, subject: SubjectKind, id: i64) {
        self.drop_key(&aggregate_key(subject, id)).await;
    }

    /// Read-through entity lookup. `load` is only called on a miss, and a
    /// value it finds is cached before being returned.
    pub async fn entity_or_load<T, E, F, Fut>(&self, kind: EntityKind, id: i64, load: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned + CacheShape,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(hit) = self.get_cached_entity(kind, id).await {
            return Ok(Some(hit));
        }

        let loaded = load().await?;
        if let Some(value) = &loaded {
            self.cache_entity(kind, id, value).await;
        }
        Ok(loaded)
    }

    /// Read-through aggregate lookup; aggregates always exist once computed.
    pub async fn aggregate_or_load<T, E, F, Fut>(&self, subject: SubjectKind, id: i64, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + CacheShape,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_cached_aggregate(subject, id).await {
            return Ok(hit);
        }

        let computed = load().await?;
        self.cache_aggregate(subject, id, &computed).await;
        Ok(computed)
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, shape: &str, value: &T, ttl: Duration) {
        let envelope = Envelope { shape, value };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(key = %key, "cache payload not serializable: {}", err);
                return;
            }
        };

        if let Err(err) = self.store.set(key, &bytes, ttl).await {
            tracing::warn!(key = %key, "cache write failed: {:#}", err);
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str, shape: &str) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %key, "cache read failed, using source: {:#}", err);
                return None;
            }
        };

        match serde_json::from_slice::<StoredEnvelope<T>>(&bytes) {
            Ok(stored) if stored.shape == shape => Some(stored.value),
            Ok(stored) => {
                tracing::warn!(key = %key, stored = %stored.shape, wanted = %shape, "cache shape mismatch");
                self.drop_key(key).await;
                None
            }
            Err(err) => {
                tracing::warn!(key = %key, "cache payload unreadable: {}", err);
                self.drop_key(key).await;
                None
            }
        }
    }

    async fn drop_key(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            tracing::error!(key = %key, "cache eviction failed, entry lives until ttl: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryTtlStore, MockTtlStore};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Course {
        id: i64,
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Faculty {
        id: i64,
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct RatingSummary {
        average: f64,
        count: u64,
    }

    impl CacheShape for Course {
        const SHAPE: &'static str = "course";
    }

    impl CacheShape for Faculty {
        const SHAPE: &'static str = "faculty";
    }

    impl CacheShape for RatingSummary {
        const SHAPE: &'static str = "rating_summary";
    }

    fn course(id: i64) -> Course {
        Course {
            id,
            name: format!("Course {}", id),
        }
    }

    fn cache_over(store: Arc<MemoryTtlStore>) -> EntityCache {
        EntityCache::new(store, CacheTtls::default())
    }

    #[tokio::test]
    async fn write_then_read_returns_value() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));

        cache.cache_entity(EntityKind::Course, 7, &course(7)).await;

        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 7).await;
        assert_eq!(hit, Some(course(7)));
    }

    #[tokio::test]
    async fn write_through_reference_reads_back() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        let value = course(7);
        let borrowed = &value;

        cache.cache_entity(EntityKind::Course, 7, &borrowed).await;

        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 7).await;
        assert_eq!(hit, Some(value));
    }

    #[tokio::test]
    async fn payload_is_tagged_with_declared_shape() {
        let store = Arc::new(MemoryTtlStore::new());
        let cache = cache_over(store.clone());

        cache.cache_entity(EntityKind::Course, 7, &course(7)).await;

        let bytes = store.get("course:7").await.unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stored["shape"], "course");
        assert_eq!(stored["value"]["name"], "Course 7");
    }

    #[tokio::test]
    async fn entry_written_by_another_instance_is_a_hit() {
        let store = Arc::new(MemoryTtlStore::new());
        store
            .set(
                "course:5",
                br#"{"shape":"course","value":{"id":5,"name":"Course 5"}}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let cache = cache_over(store.clone());

        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 5).await;
        assert_eq!(hit, Some(course(5)));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn kinds_do_not_share_slots() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));

        cache.cache_entity(EntityKind::Course, 1, &course(1)).await;

        let teacher: Option<Course> = cache.get_cached_entity(EntityKind::Teacher, 1).await;
        assert_eq!(teacher, None);
    }

    #[tokio::test]
    async fn read_after_evict_is_absent() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        cache.cache_entity(EntityKind::Course, 7, &course(7)).await;

        cache.evict_entity(EntityKind::Course, 7).await;

        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 7).await;
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn evicting_a_course_drops_its_rating() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        let summary = RatingSummary {
            average: 4.5,
            count: 12,
        };
        cache.cache_aggregate(SubjectKind::Course, 3, &summary).await;
        cache.cache_aggregate(SubjectKind::Teacher, 3, &summary).await;

        cache.evict_entity(EntityKind::Course, 3).await;

        let course_rating: Option<RatingSummary> =
            cache.get_cached_aggregate(SubjectKind::Course, 3).await;
        let teacher_rating: Option<RatingSummary> =
            cache.get_cached_aggregate(SubjectKind::Teacher, 3).await;
        assert_eq!(course_rating, None);
        assert_eq!(teacher_rating, Some(summary));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregates_expire_before_entities() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        let summary = RatingSummary {
            average: 3.0,
            count: 2,
        };
        cache.cache_entity(EntityKind::Teacher, 9, &course(9)).await;
        cache.cache_aggregate(SubjectKind::Teacher, 9, &summary).await;

        tokio::time::advance(Duration::from_secs(30 * 60)).await;

        let rating: Option<RatingSummary> = cache.get_cached_aggregate(SubjectKind::Teacher, 9).await;
        let entity: Option<Course> = cache.get_cached_entity(EntityKind::Teacher, 9).await;
        assert_eq!(rating, None);
        assert_eq!(entity, Some(course(9)));

        tokio::time::advance(Duration::from_secs(90 * 60)).await;

        let entity: Option<Course> = cache.get_cached_entity(EntityKind::Teacher, 9).await;
        assert_eq!(entity, None);
    }

    #[tokio::test]
    async fn collections_round_trip_and_evict() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        let faculties = vec![
            Faculty {
                id: 1,
                name: "Engineering".into(),
            },
            Faculty {
                id: 2,
                name: "Business".into(),
            },
        ];

        cache.cache_collection(Collection::Faculties, &faculties).await;
        let hit: Option<Vec<Faculty>> = cache.get_cached_collection(Collection::Faculties).await;
        assert_eq!(hit, Some(faculties));

        cache.evict_collection(Collection::Faculties).await;
        let hit: Option<Vec<Faculty>> = cache.get_cached_collection(Collection::Faculties).await;
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn collection_read_as_other_shape_is_a_miss() {
        let store = Arc::new(MemoryTtlStore::new());
        let cache = cache_over(store.clone());
        cache
            .cache_collection(Collection::Faculties, &[Faculty {
                id: 1,
                name: "Engineering".into(),
            }])
            .await;

        // Same fields, different type: would decode without the shape tag.
        let confused: Option<Vec<Course>> = cache.get_cached_collection(Collection::Faculties).await;
        assert_eq!(confused, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unreadable_payload_is_a_miss_and_is_dropped() {
        let store = Arc::new(MemoryTtlStore::new());
        store
            .set("course:5", b"not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = cache_over(store.clone());

        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 5).await;
        assert_eq!(hit, None);
        assert_eq!(store.get("course:5").await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_failures_degrade_to_misses() {
        let mut store = MockTtlStore::new();
        store
            .expect_get()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        store
            .expect_set()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));
        store
            .expect_delete()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let cache = EntityCache::new(Arc::new(store), CacheTtls::default());

        cache.cache_entity(EntityKind::Course, 1, &course(1)).await;
        cache.evict_entity(EntityKind::Course, 1).await;
        let hit: Option<Course> = cache.get_cached_entity(EntityKind::Course, 1).await;
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn entity_or_load_only_loads_on_miss() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let found = cache
                .entity_or_load(EntityKind::Course, 4, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(Some(course(4)))
                })
                .await
                .unwrap();
            assert_eq!(found, Some(course(4)));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entity_or_load_does_not_cache_absence() {
        let store = Arc::new(MemoryTtlStore::new());
        let cache = cache_over(store.clone());

        let found = cache
            .entity_or_load(EntityKind::Course, 404, || async { Ok::<Option<Course>, Infallible>(None) })
            .await
            .unwrap();

        assert_eq!(found, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn entity_or_load_propagates_loader_errors() {
        let cache = cache_over(Arc::new(MemoryTtlStore::new()));

        let result = cache
            .entity_or_load(EntityKind::Course, 1, || async {
                Err::<Option<Course>, _>("database down")
            })
            .await;

        assert_eq!(result, Err("database down"));
    }

    #[tokio::test]
    async fn entity_or_load_uses_source_when_store_is_down() {
        let mut store = MockTtlStore::new();
        store
            .expect_get()
            .returning(|_| Err(anyhow::anyhow!("timed out")));
        store
            .expect_set()
            .returning(|_, _, _| Err(anyhow::anyhow!("timed out")));
        let cache = EntityCache::new(Arc::new(store), CacheTtls::default());

        let found = cache
            .entity_or_load(EntityKind::Course, 2, || async { Ok::<_, Infallible>(Some(course(2))) })
            .await
            .unwrap();

        assert_eq!(found, Some(course(2)));
    }

    #[tokio::test]
    async fn aggregate_or_load_caches_computed_value() {
        let store = Arc::new(MemoryTtlStore::new());
        let cache = cache_over(store.clone());
        let summary = RatingSummary {
            average: 4.0,
            count: 1,
        };

        let computed = cache
            .aggregate_or_load(SubjectKind::Teacher, 8, || async {
                Ok::<_, Infallible>(summary.clone())
            })
            .await
            .unwrap();
        assert_eq!(computed, summary);

        assert!(store.get("rating:teacher:8").await.unwrap().is_some());
    }
}
