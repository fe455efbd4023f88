//! In-memory transport for driving the client without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::client::{Client, ClientBuilder};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub(crate) type Reply = Result<HttpResponse, String>;

/// Answers requests from a fixed script and records what was sent, and when.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    repeat: Option<Reply>,
    sent: Mutex<Vec<(HttpRequest, Instant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            repeat: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Answers every request with `reply`.
    pub(crate) fn repeating(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn sent(&self) -> Vec<(HttpRequest, Instant)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|(r, _)| r.url).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sent.lock().unwrap().push((request, Instant::now()));
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone());
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Other(message)),
            None => Err(TransportError::Other("script exhausted".into())),
        }
    }
}

pub(crate) fn client_for(transport: &Arc<ScriptedTransport>) -> Client {
    ClientBuilder::new()
        .api_key("k")
        .queue_url("https://q/app")
        .upload_url("https://u/upload")
        .transport(transport.clone())
        .build()
        .unwrap()
}

pub(crate) fn json_ok(body: serde_json::Value) -> Reply {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string().into_bytes(),
    })
}

pub(crate) fn status(code: u16, body: &str) -> Reply {
    Ok(HttpResponse {
        status: code,
        body: body.as_bytes().to_vec(),
    })
}

pub(crate) fn unreachable_host() -> Reply {
    Err("connection refused".into())
}
