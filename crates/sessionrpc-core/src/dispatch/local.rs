//! In-process request channel.

use super::{Dispatcher, InboundCall};
use crate::codec::WireBlob;
use crate::endpoint::RemoteInterface;
use crate::error::{Result, RpcError};
use crate::proxy::{RemoteProxy, RequestChannel};
use async_trait::async_trait;
use std::sync::Arc;

/// Request channel that hands calls straight to a [`Dispatcher`] on behalf
/// of one session, with no transport in between.
pub struct LocalChannel {
    dispatcher: Arc<Dispatcher>,
    session_id: String,
}

impl LocalChannel {
    pub fn new(dispatcher: Arc<Dispatcher>, session_id: impl Into<String>) -> Self {
        Self {
            dispatcher,
            session_id: session_id.into(),
        }
    }

    /// Typed proxy for the endpoint interface served under `prefix`.
    pub fn proxy<I: RemoteInterface>(
        dispatcher: Arc<Dispatcher>,
        prefix: &str,
        session_id: &str,
    ) -> Result<I> {
        let handler = dispatcher
            .registry()
            .handler(prefix)
            .ok_or_else(|| RpcError::UnknownEndpoint {
                name: prefix.to_string(),
            })?;
        let types = handler.types().clone();
        let log = dispatcher.config().log;
        let channel = Arc::new(Self::new(dispatcher, session_id));
        Ok(I::from_proxy(
            RemoteProxy::request(prefix, types, channel)
                .with_session(session_id)
                .with_log(log),
        ))
    }
}

#[async_trait]
impl RequestChannel for LocalChannel {
    async fn request(&self, tag: &str, payload: WireBlob) -> Result<WireBlob> {
        let call = InboundCall::from_tag(self.session_id.clone(), tag, payload)?;
        self.dispatcher.dispatch(&call).await
    }
}
