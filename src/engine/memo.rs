//! Per-operation read memo
//!
//! Every read issued for a node goes through [`ReadMemo::read`]. Two merge
//! sites that ask the same node for the same request share one adapter call:
//! the first caller installs a shared future, later callers await the same one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::sync::Mutex;

use crate::adapter::{Adapter, AdapterError, AdapterOperation, ReadRequest, TransactionId};
use crate::query::{NodeId, Record};

type SharedRead = Shared<BoxFuture<'static, Result<Vec<Record>, AdapterError>>>;

#[derive(Default)]
pub struct ReadMemo {
    calls: Mutex<HashMap<String, SharedRead>>,
    hits: AtomicUsize,
}

impl ReadMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(
        &self,
        node: NodeId,
        adapter: Arc<dyn Adapter>,
        request: ReadRequest,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<Record>, AdapterError> {
        let key = memo_key(node, &request);
        let call = {
            let mut calls = self.calls.lock().await;
            match calls.get(&key) {
                Some(call) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Read of {} for node {} served from memo", request.entity.name, node);
                    call.clone()
                }
                None => {
                    let call = issue(adapter, request, transaction).boxed().shared();
                    calls.insert(key, call.clone());
                    call
                }
            }
        };
        call.await
    }

    /// Reads answered without a new adapter call.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

async fn issue(
    adapter: Arc<dyn Adapter>,
    request: ReadRequest,
    transaction: Option<TransactionId>,
) -> Result<Vec<Record>, AdapterError> {
    let connection = request.entity.connection.clone();
    let model = request.entity.name.clone();
    log::debug!(
        "read {} on '{}' filter={}",
        model,
        connection,
        request
            .filter
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string())
    );
    adapter
        .read(request, transaction)
        .await
        .map_err(|e| AdapterError::failed(connection, model, AdapterOperation::Read, e))
}

/// Node identity plus everything that shapes the request.
fn memo_key(node: NodeId, request: &ReadRequest) -> String {
    json!({
        "node": node,
        "filter": request.filter,
        "fields": request.fields,
        "ordering": request.ordering,
        "limit": request.limit,
        "offset": request.offset,
    })
    .to_string()
}
