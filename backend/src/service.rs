//! The caller side of dispatch.
//!
//! Wraps the engine with the hooks a request handler owns: a root span per
//! request, listing-cache invalidation after a committed assignment, and
//! conversion to the boundary response.

use std::sync::Arc;

use anyhow::Context;
use common::logger::{TraceId, child_span, root_span};
use dispatch::response::DispatchResponse;
use dispatch::{Assignment, DispatchEngine, DispatchError};
use records::model::{Deliverer, DelivererId, PackageId, ZoneId};
use records::store::RecordStore;
use serde_json::Value;
use tracing::{Instrument, debug, field};

use crate::cache::{DELIVERERS, ListingCache, ZONES};

pub struct DispatchService {
    store: Arc<dyn RecordStore>,
    engine: DispatchEngine,
    cache: Arc<ListingCache>,
}

impl DispatchService {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<ListingCache>) -> Self {
        Self {
            engine: DispatchEngine::new(store.clone()),
            store,
            cache,
        }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub async fn assign(&self, package_id: PackageId, deliverer_id: DelivererId) -> DispatchResponse {
        let span = root_span("assign", &TraceId::default());
        span.record("package_id", field::display(package_id));
        span.record("deliverer_id", field::display(deliverer_id));

        async {
            let res = self.engine.assign_manual(package_id, deliverer_id).await;
            self.after_dispatch(res)
        }
        .instrument(span)
        .await
    }

    pub async fn auto_assign(&self, package_id: PackageId) -> DispatchResponse {
        let span = root_span("auto_assign", &TraceId::default());
        span.record("package_id", field::display(package_id));

        async {
            let res = self.engine.assign_auto(package_id).await;
            self.after_dispatch(res)
        }
        .instrument(span)
        .await
    }

    pub async fn best(&self, zone_id: ZoneId) -> Result<Option<Deliverer>, DispatchError> {
        self.engine
            .find_best(zone_id)
            .instrument(root_span("best", &TraceId::default()))
            .await
    }

    /// Deliverers currently in `zone_id`, served from the listing cache
    /// when fresh.
    pub async fn zone_deliverers(&self, zone_id: ZoneId) -> anyhow::Result<Value> {
        let key = format!("{DELIVERERS}:zone:{zone_id}");
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        // taken before the read so a dispatch committing mid-read wins
        let seen = self.cache.generation();

        let mut deliverers = self
            .store
            .deliverers_in_zone(zone_id)
            .instrument(child_span("zone_deliverers"))
            .await
            .with_context(|| format!("failed to list deliverers in zone {zone_id}"))?;
        deliverers.sort_by_key(|d| d.id);

        let rendered = serde_json::to_value(&deliverers)?;
        self.cache.set_if_current(&key, rendered.clone(), seen);
        Ok(rendered)
    }

    fn after_dispatch(&self, res: Result<Assignment, DispatchError>) -> DispatchResponse {
        if res.is_ok() {
            // capacity figures in these listings are now stale
            let removed =
                self.cache.invalidate_prefix(ZONES) + self.cache.invalidate_prefix(DELIVERERS);
            debug!(removed, "listings invalidated after dispatch");
        }
        DispatchResponse::from(res)
    }
}
