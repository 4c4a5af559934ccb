//! Client for a running sessionrpc server.
//!
//! Request/response calls go over HTTP with reqwest; pushes arrive on a
//! WebSocket opened with tokio-tungstenite and are handed to a
//! [`PushRouter`]. The session id the server assigns is remembered and sent
//! with every later request.

use crate::protocol::{HandshakeBody, WireBody, READY_TAG};
use async_trait::async_trait;
use futures::StreamExt;
use sessionrpc_core::{
    PushFrame, PushRouter, RemoteInterface, RemoteProxy, RequestChannel, Result, RpcError,
    TransportConfig, TypeRegistry, WireBlob,
};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

struct ClientInner {
    base: Url,
    http: reqwest::Client,
    session_id: RwLock<Option<String>>,
}

/// Handle to one server, acting as one session.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

fn transport_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::Transport {
        message: e.to_string(),
    }
}

impl BridgeClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| RpcError::Config {
            message: format!("Invalid server url {}: {}", base_url, e),
        })?;
        let http = reqwest::Client::builder()
            .timeout(TransportConfig::REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                base,
                http,
                session_id: RwLock::new(None),
            }),
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .session_id
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn remember_session(&self, response: &reqwest::Response) {
        let assigned = response
            .headers()
            .get(TransportConfig::SESSION_HEADER)
            .and_then(|value| value.to_str().ok());
        if let Some(id) = assigned {
            let mut current = self
                .inner
                .session_id
                .write()
                .unwrap_or_else(|p| p.into_inner());
            if current.as_deref() != Some(id) {
                debug!(session_id = id, "Session assigned");
                *current = Some(id.to_string());
            }
        }
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.inner.base.join(path).map_err(|e| RpcError::Config {
            message: format!("Invalid path {}: {}", path, e),
        })?;
        let mut request = self.inner.http.post(url);
        if let Some(id) = self.session_id() {
            request = request.header(TransportConfig::SESSION_HEADER, id);
        }
        Ok(request)
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(RpcError::Transport {
            message: format!("{} returned {}: {}", what, status, text),
        })
    }

    /// Handshake on a callable interface's prefix, obtaining a session.
    pub async fn handshake(&self, interface_prefix: &str) -> Result<String> {
        let response = self
            .post(interface_prefix)?
            .send()
            .await
            .map_err(transport_error)?;
        self.remember_session(&response);
        let response = Self::check_status(response, interface_prefix).await?;

        let body: HandshakeBody = response.json().await.map_err(transport_error)?;
        *self
            .inner
            .session_id
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Some(body.session_id.clone());
        Ok(body.session_id)
    }

    async fn call(&self, tag: &str, payload: WireBlob) -> Result<WireBlob> {
        let response = self
            .post(tag)?
            .json(&WireBody { json: payload })
            .send()
            .await
            .map_err(transport_error)?;
        self.remember_session(&response);
        let response = Self::check_status(response, tag).await?;

        let body: WireBody = response.json().await.map_err(transport_error)?;
        Ok(body.json)
    }

    /// Typed proxy for the endpoint interface served under `prefix`.
    pub fn proxy<I: RemoteInterface>(&self, prefix: &str, types: Option<TypeRegistry>) -> I {
        let channel = Arc::new(HttpChannel {
            client: self.clone(),
        });
        I::from_proxy(RemoteProxy::request(
            prefix,
            Arc::new(types.unwrap_or_default()),
            channel,
        ))
    }

    /// Open the push socket for the current session and route incoming frames
    /// through `router`. Resolves once the server has bound the connection.
    pub async fn subscribe(&self, router: PushRouter) -> Result<PushSubscription> {
        let session_id = self
            .session_id()
            .ok_or(RpcError::ConnectionMissing { session_id: None })?;

        let mut url = self.inner.base.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| transport_error(format!("cannot use {} for {}", scheme, url)))?;
        url.set_path(TransportConfig::PUSH_PATH);
        url.query_pairs_mut()
            .append_pair(TransportConfig::PUSH_SESSION_PARAM, &session_id);

        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(transport_error)?;

        let connection_id = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: PushFrame = serde_json::from_str(text.as_str())?;
                    if frame.tag == READY_TAG {
                        break frame.payload.into_string();
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(transport_error("push socket closed before it was ready"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(transport_error(e)),
            }
        };

        let task = tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<PushFrame>(text.as_str()) {
                            Ok(frame) => {
                                if let Err(e) = router.route(&frame.tag, &frame.payload).await {
                                    warn!("Push {} not handled: {}", frame.tag, e);
                                }
                            }
                            Err(e) => warn!("Malformed push frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Push socket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(PushSubscription {
            connection_id,
            task,
        })
    }
}

struct HttpChannel {
    client: BridgeClient,
}

#[async_trait]
impl RequestChannel for HttpChannel {
    async fn request(&self, tag: &str, payload: WireBlob) -> Result<WireBlob> {
        self.client.call(tag, payload).await
    }
}

/// A live push socket. Dropping it closes the socket.
pub struct PushSubscription {
    connection_id: String,
    task: JoinHandle<()>,
}

impl PushSubscription {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Close the socket now. Dropping the subscription does the same.
    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            BridgeClient::new("not a url"),
            Err(RpcError::Config { .. })
        ));
    }

    #[test]
    fn test_no_session_before_first_call() {
        let client = BridgeClient::new("http://127.0.0.1:1").unwrap();
        assert!(client.session_id().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_requires_session() {
        let client = BridgeClient::new("http://127.0.0.1:1").unwrap();
        let err = client.subscribe(PushRouter::new()).await.err().unwrap();
        assert!(matches!(err, RpcError::ConnectionMissing { .. }));
    }
}
