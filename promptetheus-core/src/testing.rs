//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::models::HttpMethod;
use crate::transport::{HttpTransport, TransportError, TransportResponse};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16, Value),
    Fail,
    Timeout,
}

impl Reply {
    pub(crate) fn ok() -> Self {
        Reply::Status(200, json!({ "ok": true }))
    }
}

/// Transport that answers from a script and records every call.
pub(crate) struct ScriptedTransport {
    scripted: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<Reply>,
    calls: Mutex<Vec<(HttpMethod, String)>>,
    hold: Mutex<Option<Arc<Notify>>>,
    started: Notify,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Reply::ok()),
            calls: Mutex::new(Vec::new()),
            hold: Mutex::new(None),
            started: Notify::new(),
        })
    }

    /// Queues a one-shot reply for an endpoint.
    pub(crate) fn reply(&self, endpoint: &str, reply: Reply) {
        self.scripted
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply used when nothing is scripted for an endpoint.
    pub(crate) fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub(crate) fn calls(&self) -> Vec<(HttpMethod, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Makes subsequent sends block until [`release`](Self::release) is called.
    pub(crate) fn hold(&self) {
        *self.hold.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = self.hold.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    /// Resolves once a send has started.
    pub(crate) async fn wait_for_call(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        _payload: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method, endpoint.to_string()));
        self.started.notify_one();

        let gate = self.hold.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        let reply = scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        match reply {
            Reply::Status(status, body) => Ok(TransportResponse::json(status, &body)),
            Reply::Fail => Err(TransportError::Connect("connection refused".to_string())),
            Reply::Timeout => Err(TransportError::Timeout),
        }
    }
}
