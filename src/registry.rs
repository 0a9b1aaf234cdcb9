//! Reference storage contract and the index cache sessions are opened from.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use image::GrayImage;
use image::imageops::FilterType;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::LocatorConfig;
use crate::error::{LocateError, Result};
use crate::pipeline::FramePipeline;
use crate::reference::ReferenceIndex;
use crate::session::Session;

/// Decoded reference image as kept by a store.
#[derive(Debug, Clone)]
pub struct StoredReference {
    pub image: GrayImage,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub num_features: usize,
}

/// Where reference images live. Persistence is the implementor's business.
pub trait ReferenceStore: Send + Sync {
    fn get_reference(&self, id: &str) -> Option<StoredReference>;
    fn metadata(&self, id: &str) -> Option<ReferenceInfo>;
}

#[derive(Debug, Default)]
pub struct InMemoryReferenceStore {
    entries: RwLock<BTreeMap<String, (StoredReference, ReferenceInfo)>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ReferenceInfo, image: GrayImage) {
        let stored = StoredReference {
            width: image.width(),
            height: image.height(),
            image,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.id.clone(), (stored, info));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Metadata of every reference, ordered by id.
    pub fn list(&self) -> Vec<ReferenceInfo> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(_, info)| info.clone())
            .collect()
    }
}

impl ReferenceStore for InMemoryReferenceStore {
    fn get_reference(&self, id: &str) -> Option<StoredReference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(stored, _)| stored.clone())
    }

    fn metadata(&self, id: &str) -> Option<ReferenceInfo> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(_, info)| info.clone())
    }
}

/// Builds each reference index once and hands out sessions sharing it.
pub struct ReferenceRegistry<S: ReferenceStore = InMemoryReferenceStore> {
    store: S,
    config: LocatorConfig,
    pipeline: Arc<FramePipeline>,
    cache: RwLock<HashMap<String, Arc<ReferenceIndex>>>,
}

impl<S: ReferenceStore> ReferenceRegistry<S> {
    pub fn new(store: S, config: LocatorConfig) -> Self {
        Self {
            store,
            pipeline: Arc::new(FramePipeline::new(config.clone())),
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn metadata(&self, id: &str) -> Option<ReferenceInfo> {
        self.store.metadata(id)
    }

    /// Cached index for `id`, built from the store on first use.
    pub fn index(&self, id: &str) -> Result<Arc<ReferenceIndex>> {
        if let Some(index) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Ok(index.clone());
        }
        let stored = self
            .store
            .get_reference(id)
            .ok_or_else(|| LocateError::ReferenceNotFound(id.to_string()))?;
        let index = Arc::new(ReferenceIndex::build(&stored.image, &self.config.extractor)?);
        debug!("cached index for reference {}", id);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(id.to_string()).or_insert(index).clone())
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn open_session(&self, id: &str) -> Result<Session> {
        let index = self.index(id)?;
        Ok(Session::new(id, index, self.pipeline.clone()))
    }

    /// Drops the cached index. Open sessions keep their own handle.
    pub fn evict(&self, id: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

impl ReferenceRegistry<InMemoryReferenceStore> {
    /// Decodes an uploaded image, downsizes it to the configured maximum
    /// side, indexes it and stores it under a fresh 8 hex digit id.
    pub fn register(&self, name: &str, bytes: &[u8]) -> Result<ReferenceInfo> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| LocateError::InvalidImage(e.to_string()))?
            .to_luma8();
        let image = fit_within(image, self.config.registry.max_reference_size);
        let index = Arc::new(ReferenceIndex::build(&image, &self.config.extractor)?);

        let id = loop {
            let candidate = format!("{:08x}", rand::random::<u32>());
            if !self.store.contains(&candidate) {
                break candidate;
            }
        };
        let info = ReferenceInfo {
            id: id.clone(),
            name: if name.is_empty() {
                format!("Puzzle {}", id)
            } else {
                name.to_string()
            },
            width: image.width(),
            height: image.height(),
            num_features: index.feature_count(),
        };
        info!(
            "registered reference {} ({}x{}, {} features)",
            id, info.width, info.height, info.num_features
        );
        self.store.insert(info.clone(), image);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, index);
        Ok(info)
    }

    /// Forgets a reference in both the store and the cache.
    pub fn remove_reference(&self, id: &str) -> bool {
        let cached = self.evict(id);
        self.store.remove(id) || cached
    }

    pub fn list(&self) -> Vec<ReferenceInfo> {
        self.store.list()
    }
}

/// Shrinks `image` so its longest side is at most `max_side`.
pub fn fit_within(image: GrayImage, max_side: u32) -> GrayImage {
    let (w, h) = (image.width(), image.height());
    let longest = w.max(h);
    if max_side == 0 || longest <= max_side {
        return image;
    }
    let scale = max_side as f64 / longest as f64;
    let nw = ((w as f64 * scale) as u32).max(1);
    let nh = ((h as f64 * scale) as u32).max(1);
    debug!("resizing reference {}x{} -> {}x{}", w, h, nw, nh);
    image::imageops::resize(&image, nw, nh, FilterType::Triangle)
}
