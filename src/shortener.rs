use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::timeout;

use crate::{
    error::{ResolveError, ShortenError, StoreError, UniqueField},
    id::IdGenerator,
    models::{ShortId, UrlMapping},
    store::MappingStore,
    validator::Validator,
};

/// Get-or-create shortening and lookup over a shared store.
pub struct ShortenerService {
    validator: Validator,
    generator: Arc<dyn IdGenerator>,
    store: Arc<dyn MappingStore>,
    store_timeout: Duration,
    max_attempts: usize,
}

impl ShortenerService {
    pub fn new(
        validator: Validator,
        generator: Arc<dyn IdGenerator>,
        store: Arc<dyn MappingStore>,
        store_timeout: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            validator,
            generator,
            store,
            store_timeout,
            max_attempts,
        }
    }

    /// Returns the mapping for `raw`, creating it on first sight.
    #[tracing::instrument(skip(self))]
    pub async fn shorten(&self, raw: &str) -> Result<UrlMapping, ShortenError> {
        let valid = self.validator.validate(raw).await?;
        tracing::debug!(host = %valid.host, "url accepted");

        if let Some(existing) = self
            .bounded(self.store.find_by_original_url(raw))
            .await
            .map_err(ShortenError::StoreUnavailable)?
        {
            return Ok(existing);
        }

        for attempt in 1..=self.max_attempts {
            let mapping = UrlMapping {
                original_url: raw.to_owned(),
                short_id: self.generator.generate(),
            };

            match self.bounded(self.store.insert(&mapping)).await {
                Ok(()) => {
                    tracing::info!(short_id = %mapping.short_id, "created mapping");
                    return Ok(mapping);
                }
                Err(StoreError::DuplicateKey(UniqueField::ShortId)) => {
                    tracing::warn!(attempt, short_id = %mapping.short_id, "short id collision");
                }
                // Lost a race against a concurrent request for the same url.
                Err(StoreError::DuplicateKey(UniqueField::OriginalUrl)) => {
                    return self.winning_mapping(raw).await;
                }
                Err(err) => return Err(ShortenError::StoreUnavailable(err)),
            }
        }

        Err(ShortenError::IdSpaceExhausted(self.max_attempts))
    }

    /// Returns the original url behind `short_id`.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, short_id: &str) -> Result<String, ResolveError> {
        let id = ShortId::new(short_id);
        self.bounded(self.store.find_by_short_id(&id))
            .await?
            .map(|mapping| mapping.original_url)
            .ok_or_else(|| ResolveError::NotFound(short_id.to_owned()))
    }

    async fn winning_mapping(&self, raw: &str) -> Result<UrlMapping, ShortenError> {
        match self.bounded(self.store.find_by_original_url(raw)).await {
            Ok(Some(mapping)) => Ok(mapping),
            Ok(None) => Err(ShortenError::StoreUnavailable(StoreError::Unavailable(
                "mapping vanished after duplicate key".to_owned(),
            ))),
            Err(err) => Err(ShortenError::StoreUnavailable(err)),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::TimedOut(self.store_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use super::*;
    use crate::{
        error::ValidationError,
        id::{ALPHABET, ID_LENGTH, RandomIdGenerator, testing::SequenceGenerator},
        store::InMemoryStore,
        validator::testing::StaticResolver,
    };

    const HOSTS: &[&str] = &["www.example.com", "example.com", "a.example.com", "b.example.com"];

    fn validator() -> Validator {
        Validator::new(Arc::new(StaticResolver::new(HOSTS)), Duration::from_secs(1))
    }

    fn service_with(store: Arc<dyn MappingStore>, generator: Arc<dyn IdGenerator>) -> ShortenerService {
        ShortenerService::new(validator(), generator, store, Duration::from_secs(1), 5)
    }

    fn service(store: Arc<InMemoryStore>) -> ShortenerService {
        service_with(store, Arc::new(RandomIdGenerator))
    }

    /// Store whose lookups by url wait until two callers have arrived, so
    /// both see "not found" before either inserts.
    struct RacingStore {
        inner: InMemoryStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl MappingStore for RacingStore {
        async fn find_by_original_url(&self, url: &str) -> Result<Option<UrlMapping>, StoreError> {
            let found = self.inner.find_by_original_url(url).await?;
            if found.is_none() {
                self.barrier.wait().await;
            }
            Ok(found)
        }

        async fn find_by_short_id(&self, id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
            self.inner.find_by_short_id(id).await
        }

        async fn insert(&self, mapping: &UrlMapping) -> Result<(), StoreError> {
            self.inner.insert(mapping).await
        }
    }

    /// Store that never answers.
    struct StalledStore;

    #[async_trait]
    impl MappingStore for StalledStore {
        async fn find_by_original_url(&self, _url: &str) -> Result<Option<UrlMapping>, StoreError> {
            std::future::pending().await
        }

        async fn find_by_short_id(&self, _id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
            std::future::pending().await
        }

        async fn insert(&self, _mapping: &UrlMapping) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    /// Store that is down.
    struct BrokenStore;

    #[async_trait]
    impl MappingStore for BrokenStore {
        async fn find_by_original_url(&self, _url: &str) -> Result<Option<UrlMapping>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        async fn find_by_short_id(&self, _id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        async fn insert(&self, _mapping: &UrlMapping) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }
    }

    #[tokio::test]
    async fn validation_failures_propagate_unchanged() {
        let service = service(Arc::new(InMemoryStore::new()));

        for (input, expected) in [
            ("www.example.com", ValidationError::InvalidScheme),
            ("ftp://example.com", ValidationError::InvalidScheme),
            ("http://exa mple.com", ValidationError::MalformedUri),
            ("http://", ValidationError::MalformedUri),
            (
                "http://this-domain-does-not-exist.invalid",
                ValidationError::UnresolvableHost("this-domain-does-not-exist.invalid".to_owned()),
            ),
        ] {
            match service.shorten(input).await {
                Err(ShortenError::Validation(err)) => assert_eq!(err, expected, "{input}"),
                other => panic!("{input}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn shorten_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(Arc::clone(&store));

        let first = service.shorten("http://www.example.com").await.unwrap();
        let second = service.shorten("http://www.example.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn distinct_urls_get_distinct_ids() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(Arc::clone(&store));
        let mut ids = std::collections::HashSet::new();

        for i in 0..200 {
            let mapping = service
                .shorten(&format!("https://example.com/page/{i}"))
                .await
                .unwrap();
            assert_eq!(mapping.short_id.as_str().len(), ID_LENGTH);
            assert!(mapping.short_id.as_str().bytes().all(|b| ALPHABET.contains(&b)));
            ids.insert(mapping.short_id);
        }

        assert_eq!(ids.len(), 200);
        assert_eq!(store.len(), 200);
    }

    #[tokio::test]
    async fn resolve_round_trips() {
        let service = service(Arc::new(InMemoryStore::new()));

        for url in ["http://www.example.com", "HTTPS://Example.com/Some/Path?q=1"] {
            let mapping = service.shorten(url).await.unwrap();
            assert_eq!(mapping.original_url, url);
            assert_eq!(service.resolve(mapping.short_id.as_str()).await.unwrap(), url);
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let service = service(Arc::new(InMemoryStore::new()));
        let err = service.resolve("doesNotExist12").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(id) if id == "doesNotExist12"));
    }

    #[tokio::test]
    async fn collisions_are_retried() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(
            store.clone(),
            Arc::new(SequenceGenerator::new(&["AAAAAAAA", "AAAAAAAA", "AAAAAAAA", "BBBBBBBB"])),
        );

        let first = service.shorten("http://a.example.com").await.unwrap();
        let second = service.shorten("http://b.example.com").await.unwrap();

        assert_eq!(first.short_id.as_str(), "AAAAAAAA");
        assert_eq!(second.short_id.as_str(), "BBBBBBBB");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn endless_collisions_exhaust_the_id_space() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone(), Arc::new(SequenceGenerator::new(&["AAAAAAAA"])));

        service.shorten("http://a.example.com").await.unwrap();
        let err = service.shorten("http://b.example.com").await.unwrap_err();

        assert!(matches!(err, ShortenError::IdSpaceExhausted(5)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_shortens_of_one_url_agree() {
        let store = Arc::new(RacingStore {
            inner: InMemoryStore::new(),
            barrier: Barrier::new(2),
        });
        let service = Arc::new(service_with(store.clone(), Arc::new(RandomIdGenerator)));

        let (a, b) = tokio::join!(
            tokio::spawn({
                let service = Arc::clone(&service);
                async move { service.shorten("http://www.example.com").await }
            }),
            tokio::spawn({
                let service = Arc::clone(&service);
                async move { service.shorten("http://www.example.com").await }
            }),
        );
        let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

        assert_eq!(a.short_id, b.short_id);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let service = ShortenerService::new(
            validator(),
            Arc::new(RandomIdGenerator),
            Arc::new(StalledStore),
            Duration::from_millis(20),
            5,
        );

        let err = service.shorten("http://www.example.com").await.unwrap_err();
        assert!(matches!(err, ShortenError::StoreUnavailable(StoreError::TimedOut(_))));

        let err = service.resolve("abcdEFGH").await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(StoreError::TimedOut(_))));
    }

    #[tokio::test]
    async fn outages_are_not_reported_as_bad_input() {
        let service = service_with(Arc::new(BrokenStore), Arc::new(RandomIdGenerator));

        let err = service.shorten("http://www.example.com").await.unwrap_err();
        assert!(matches!(err, ShortenError::StoreUnavailable(StoreError::Unavailable(_))));

        let err = service.resolve("abcdEFGH").await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));
    }
}
