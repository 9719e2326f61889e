//! Fakes for the external capabilities, shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::assets::{AssetStore, Rendition, UploadedAsset};
use crate::embedding::Embedder;
use crate::generate::Generator;

/// Asset store that derives `fake://{transform}/{public_id}` URLs and
/// counts calls.
#[derive(Default)]
pub struct RecordingAssets {
    derives: AtomicUsize,
}

impl RecordingAssets {
    pub fn derive_calls(&self) -> usize {
        self.derives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetStore for RecordingAssets {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn upload(&self, _data: &[u8], folder: &str, id: &str) -> Result<UploadedAsset> {
        Ok(UploadedAsset {
            url: format!("fake://{}/{}", folder, id),
            public_id: format!("{}/{}", folder, id),
        })
    }

    async fn delete(&self, _public_id: &str) -> Result<()> {
        Ok(())
    }

    fn derive_url(&self, public_id: &str, rendition: Rendition) -> Result<String> {
        self.derives.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake://{}/{}", rendition.transformation(), public_id))
    }
}

/// Embedder returning a constant unit vector.
pub struct FixedEmbedder {
    dims: usize,
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl FixedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0; self.dims];
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        Ok(v)
    }
}

/// Generator that records the last prompt and answers with a constant.
#[derive(Default)]
pub struct RecordingGenerator {
    pub last_prompt: Mutex<Option<String>>,
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }
        Ok("generated answer".to_string())
    }
}
