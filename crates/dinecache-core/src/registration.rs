//! The page side of worker registration.
//!
//! Before the worker installs, the page decides which lazy-load script this
//! device needs and leaves that choice in the `files` partition, where the
//! install step picks it up. Images the page rendered before the worker
//! existed were never intercepted, so after registration the page posts
//! their URLs for the worker to cache.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::AddAllReport;
use crate::precache::PrecacheReport;
use crate::store::{StoreError, StoreHandle, DYNAMIC_ASSET_KEY, FILES};
use crate::worker::{ServiceWorker, WorkerMessage};

/// Browser capabilities relevant to asset selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSupport {
    pub intersection_observer: bool,
}

/// The lazy-load script build for a device.
pub fn lazy_load_script(support: FeatureSupport) -> String {
    let variant = if support.intersection_observer { "" } else { "-compat" };
    format!("/node_modules/vanilla-lazyload{}/dist/lazyload.min.js", variant)
}

/// Record the page's asset choice for the worker's install step.
pub async fn record_dynamic_asset(store: &StoreHandle, asset: &str) -> Result<(), StoreError> {
    let db = store.acquire().await?;
    db.set_as(FILES, DYNAMIC_ASSET_KEY, asset).await
}

/// State of the page at registration time.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub features: FeatureSupport,
    /// `src` of every restaurant image already in the page.
    pub rendered_images: Vec<String>,
    /// Whether the page was itself served through an active worker.
    pub controlled: bool,
}

#[derive(Debug)]
pub struct Registration {
    pub install: PrecacheReport,
    /// Number of image URLs handed to the worker.
    pub images_posted: usize,
    /// The worker's image caching task. The page itself never waits on it;
    /// a host that exits afterwards should.
    pub images: Option<JoinHandle<AddAllReport>>,
}

impl PageContext {
    /// Hand off the asset choice, install and activate the worker, then post
    /// already-rendered images to it when the page was not controlled.
    ///
    /// A failed handoff is logged; install proceeds with the static list.
    pub async fn register(&self, worker: &ServiceWorker) -> Result<Registration> {
        let script = lazy_load_script(self.features);
        if let Err(e) = record_dynamic_asset(worker.store(), &script).await {
            warn!(script = %script, error = %e, "Could not hand off lazy-load choice");
        }

        let install = worker.install().await.context("Worker installation failed")?;
        worker.activate().await.context("Worker activation failed")?;

        let mut images_posted = 0;
        let mut images = None;
        if !self.controlled && !self.rendered_images.is_empty() {
            images = worker.message(WorkerMessage::CacheImages(self.rendered_images.clone()));
            images_posted = self.rendered_images.len();
        }

        info!(
            cached = install.cached.len(),
            failed = install.failed.len(),
            images_posted,
            "Worker registered"
        );
        Ok(Registration {
            install,
            images_posted,
            images,
        })
    }
}
