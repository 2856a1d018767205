//! Scripted transport used by the unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::Transport;
use crate::error::ApiResult;

type Responder = dyn Fn(&RecordedCall) -> ApiResult<Value> + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub at: Instant,
}

impl RecordedCall {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `ids` parameter split back into a sorted list.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .param("ids")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        ids.sort();
        ids
    }
}

pub(crate) struct MockTransport {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<VecDeque<ApiResult<Value>>>,
    fallback: Box<Responder>,
}

impl MockTransport {
    pub fn new(fallback: impl Fn(&RecordedCall) -> ApiResult<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            fallback: Box::new(fallback),
        })
    }

    /// Answers `/simple/price` by quoting every requested id in every
    /// requested currency with `price(id)`. Ids for which `price` returns
    /// `None` are left out of the response.
    pub fn simple_prices(price: impl Fn(&str) -> Option<f64> + Send + Sync + 'static) -> Arc<Self> {
        Self::new(move |call| {
            let currencies: Vec<String> = call
                .param("vs_currencies")
                .unwrap_or_default()
                .split(',')
                .map(str::to_string)
                .collect();
            let mut body = Map::new();
            for id in call.ids() {
                if let Some(px) = price(&id) {
                    let row: Map<String, Value> =
                        currencies.iter().map(|c| (c.clone(), json!(px))).collect();
                    body.insert(id, Value::Object(row));
                }
            }
            Ok(Value::Object(body))
        })
    }

    /// Queue a response that is returned before the fallback is consulted.
    pub fn push(&self, response: ApiResult<Value>) {
        self.scripted.lock().push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, path: &str, params: &[(String, String)]) -> ApiResult<Value> {
        let call = RecordedCall {
            path: path.to_string(),
            params: params.to_vec(),
            at: Instant::now(),
        };
        self.calls.lock().push(call.clone());
        if let Some(scripted) = self.scripted.lock().pop_front() {
            return scripted;
        }
        (self.fallback)(&call)
    }
}
