//! Client-side routing of pushed frames.
//!
//! The mirror of the dispatcher for the receiving end of a push connection:
//! frames tagged `prefix.method` are decoded and handed to whichever
//! [`PushHandler`] implements the callable interface under `prefix`.

use crate::codec::{TypeRegistry, WireBlob};
use crate::envelope::Args;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client-side implementation of a callable interface.
#[async_trait]
pub trait PushHandler: Send + Sync + 'static {
    async fn handle(&self, method: &str, args: &Args) -> Result<()>;
}

struct PushRoute {
    types: Arc<TypeRegistry>,
    handler: Arc<dyn PushHandler>,
}

/// Prefix-keyed set of [`PushHandler`]s.
#[derive(Default)]
pub struct PushRouter {
    routes: HashMap<String, PushRoute>,
}

impl PushRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: PushHandler>(
        &mut self,
        prefix: impl Into<String>,
        types: Option<TypeRegistry>,
        handler: H,
    ) -> Result<()> {
        let prefix = prefix.into();
        if self.routes.contains_key(&prefix) {
            return Err(RpcError::DuplicatePrefix { prefix });
        }
        self.routes.insert(
            prefix,
            PushRoute {
                types: Arc::new(types.unwrap_or_default()),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.routes.contains_key(prefix)
    }

    /// Deliver one pushed frame.
    pub async fn route(&self, tag: &str, payload: &WireBlob) -> Result<()> {
        let (prefix, method) = tag.rsplit_once('.').ok_or_else(|| RpcError::Transport {
            message: format!("Malformed push tag: {}", tag),
        })?;
        let route = self.routes.get(prefix).ok_or_else(|| {
            warn!("No push handler for {}", tag);
            RpcError::UnknownInterface {
                name: prefix.to_string(),
            }
        })?;

        debug!("Push {} received", tag);
        let args = Args::from_blob(payload, route.types.clone())?;
        route.handler.handle(method, &args).await
    }
}
