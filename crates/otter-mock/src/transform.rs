//! Async driver for the hoist & rewrite pass
//!
//! Collects the specifiers a rewrite needs, resolves them one at a time,
//! then runs the pure rewrite with the finished specifier -> id map. Any
//! resolution failure aborts the whole rewrite. Results are memoized by
//! module id and source digest.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MockResult;
use crate::hoist::{self, RewriteOptions, RewriteOutput};
use crate::resolver::{ModuleId, SpecifierResolver};

type MemoKey = (ModuleId, [u8; 16]);

pub struct Transformer {
    options: RewriteOptions,
    memo: DashMap<MemoKey, Arc<RewriteOutput>>,
}

impl Transformer {
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            memo: DashMap::new(),
        }
    }

    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    /// Rewrite `source` of module `id`, resolving its requests with `resolver`.
    pub async fn transform(
        &self,
        source: &str,
        id: &ModuleId,
        resolver: &SpecifierResolver,
    ) -> MockResult<Arc<RewriteOutput>> {
        let key = (id.clone(), md5::compute(source.as_bytes()).0);
        if let Some(hit) = self.memo.get(&key) {
            tracing::trace!("Rewrite cache hit for {}", id);
            return Ok(hit.clone());
        }

        let requests = hoist::collect_requests(source, id.as_str(), &self.options)?;
        let mut resolved = HashMap::with_capacity(requests.len());
        for specifier in requests {
            let module = resolver.resolve_lenient(&specifier, id.as_str())?;
            resolved.insert(specifier, module.id);
            tokio::task::yield_now().await;
        }

        let output = Arc::new(hoist::rewrite(source, id.as_str(), &resolved, &self.options)?);
        for diagnostic in &output.diagnostics {
            tracing::warn!("{}: {}", id, diagnostic);
        }
        self.memo.insert(key, output.clone());
        Ok(output)
    }

    /// Number of memoized rewrites
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Drop memoized rewrites of `id`.
    pub fn forget(&self, id: &ModuleId) {
        self.memo.retain(|(memo_id, _), _| memo_id != id);
    }

    pub fn clear(&self) {
        self.memo.clear();
    }
}
