//! Bounded memoization of feature records keyed by input image content.
//!
//! The key is a SipHash of a tiny grayscale thumbnail of the *input*
//! image. It is an exact-match key: two images collide only when their
//! thumbnails are byte-identical. The cache never changes what
//! [`crate::extract`] would return for an image, only how fast it does.
//!
//! Eviction is strict FIFO: once the cache is full, inserting a new key
//! drops the oldest-inserted one, no matter how recently it was read.
//!
//! [`FeatureCache`] is not synchronized. Give each concurrent caller its
//! own instance or wrap a shared one in a mutex.

use std::collections::{HashMap, VecDeque};
use std::hash::Hasher;

use image::DynamicImage;
use image::imageops::FilterType;
use siphasher::sip::SipHasher13;

use crate::config::{CacheConfig, ExtractConfig};
use crate::types::{FeatureRecord, PipelineError};

/// Cache key derived from an input image.
pub type ImageKey = u64;

/// Compute the cache key of `image`.
///
/// The image is resized to `hash_size x hash_size`, reduced to one
/// intensity channel, and its raw bytes are hashed.
#[must_use]
pub fn image_key(image: &DynamicImage, hash_size: u32) -> ImageKey {
    let thumbnail =
        crate::normalize::to_intensity(&image.resize_exact(hash_size, hash_size, FilterType::Triangle));
    let mut hasher = SipHasher13::new();
    hasher.write(thumbnail.as_raw());
    hasher.finish()
}

/// FIFO-bounded map from image keys to feature records.
#[derive(Debug, Clone)]
pub struct FeatureCache {
    capacity: usize,
    entries: HashMap<ImageKey, FeatureRecord>,
    order: VecDeque<ImageKey>,
    hits: u64,
    misses: u64,
}

impl FeatureCache {
    /// Create an empty cache holding at most `capacity` records.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "cache capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        })
    }

    /// Look up `key`, counting the outcome as a hit or a miss.
    pub fn lookup(&mut self, key: ImageKey) -> Option<&FeatureRecord> {
        let found = self.entries.get(&key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Look up `key` without touching the counters.
    #[must_use]
    pub fn peek(&self, key: ImageKey) -> Option<&FeatureRecord> {
        self.entries.get(&key)
    }

    /// Whether `key` is cached.
    #[must_use]
    pub fn contains(&self, key: ImageKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Store `record` under `key`, evicting the oldest entry if the cache
    /// would otherwise exceed its capacity.
    ///
    /// Re-inserting an existing key replaces its record but keeps its
    /// original position in the eviction order. Returns the evicted key,
    /// if any.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CacheCapacityInvariant`], leaving the
    /// cache untouched, if the stored entries and the eviction queue
    /// already disagree.
    pub fn insert(
        &mut self,
        key: ImageKey,
        record: FeatureRecord,
    ) -> Result<Option<ImageKey>, PipelineError> {
        self.check_invariant()?;
        if self.entries.insert(key, record).is_none() {
            self.order.push_back(key);
        }
        let mut evicted = None;
        if self.entries.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.entries.remove(&oldest);
            evicted = Some(oldest);
        }
        Ok(evicted)
    }

    fn check_invariant(&self) -> Result<(), PipelineError> {
        if self.entries.len() != self.order.len() || self.entries.len() > self.capacity {
            return Err(PipelineError::CacheCapacityInvariant {
                entries: self.entries.len(),
                order: self.order.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of cached records.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lookups that found a record.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that found nothing.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }
}

/// Feature extraction with an owned [`FeatureCache`] in front of it.
#[derive(Debug, Clone)]
pub struct CachedExtractor {
    config: ExtractConfig,
    hash_size: u32,
    cache: FeatureCache,
}

impl CachedExtractor {
    /// Create an extractor with an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if either configuration
    /// fails validation.
    pub fn new(config: ExtractConfig, cache_config: CacheConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        cache_config.validate()?;
        Ok(Self {
            config,
            hash_size: cache_config.hash_size,
            cache: FeatureCache::new(cache_config.capacity)?,
        })
    }

    /// Extract features from `image`, reusing a cached record when the
    /// image's key has been seen.
    ///
    /// # Errors
    ///
    /// Propagates extraction errors, and
    /// [`PipelineError::CacheCapacityInvariant`] from the cache.
    pub fn extract(&mut self, image: &DynamicImage) -> Result<FeatureRecord, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            // Nothing to key on; let the pipeline report it.
            return crate::extract(image, &self.config);
        }
        let key = image_key(image, self.hash_size);
        if let Some(record) = self.cache.lookup(key) {
            let record = record.clone();
            tracing::debug!(
                key,
                hits = self.cache.hits(),
                misses = self.cache.misses(),
                "feature cache hit"
            );
            return Ok(record);
        }
        tracing::debug!(
            key,
            hits = self.cache.hits(),
            misses = self.cache.misses(),
            "feature cache miss"
        );

        let record = crate::extract(image, &self.config)?;
        if let Some(evicted) = self.cache.insert(key, record.clone())? {
            tracing::debug!(evicted, "feature cache evicted oldest entry");
        }
        Ok(record)
    }

    /// Decode `bytes` and extract through the cache.
    ///
    /// # Errors
    ///
    /// Returns decode errors as well as everything [`Self::extract`]
    /// returns.
    pub fn extract_bytes(&mut self, bytes: &[u8]) -> Result<FeatureRecord, PipelineError> {
        let image = crate::grayscale::decode(bytes)?;
        self.extract(&image)
    }

    /// The extraction configuration.
    #[must_use]
    pub const fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &FeatureCache {
        &self.cache
    }
}
