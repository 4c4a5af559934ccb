//! Client-side stubs for remote interfaces.
//!
//! A [`RemoteProxy`] turns `method(args)` into a tagged message on a channel.
//! Two channel kinds exist:
//! - [`PushChannel`]: fire-and-forget frames to a connected client
//! - [`RequestChannel`]: request/response calls answered with a
//!   [`ResponseEnvelope`]
//!
//! Typed wrappers around a proxy are generated with [`remote_interface!`].

use crate::codec::{self, TypeRegistry, WireBlob};
use crate::config::LogConfig;
use crate::envelope::{CallEnvelope, ResponseEnvelope};
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Outgoing side of a live client connection.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Connection id, unique among live connections.
    fn id(&self) -> &str;

    /// Queue one `{tag, payload}` frame for the client.
    async fn send(&self, tag: &str, payload: WireBlob) -> Result<()>;
}

/// A channel that answers every message.
///
/// The reply is a serialized [`ResponseEnvelope`].
#[async_trait]
pub trait RequestChannel: Send + Sync {
    async fn request(&self, tag: &str, payload: WireBlob) -> Result<WireBlob>;
}

#[derive(Clone)]
enum Binding {
    Push(Arc<dyn PushChannel>),
    Request(Arc<dyn RequestChannel>),
    Unbound,
}

/// Result of a request/response call, with the callee's push payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome<R> {
    pub response: R,
    pub push_payload: Option<Value>,
}

/// Untyped stub for one remote interface bound to one channel.
#[derive(Clone)]
pub struct RemoteProxy {
    prefix: String,
    types: Arc<TypeRegistry>,
    binding: Binding,
    session_id: Option<String>,
    log: LogConfig,
}

impl RemoteProxy {
    fn with_binding(prefix: impl Into<String>, types: Arc<TypeRegistry>, binding: Binding) -> Self {
        Self {
            prefix: prefix.into(),
            types,
            binding,
            session_id: None,
            log: LogConfig::default(),
        }
    }

    /// Proxy whose calls are pushed to a connected client.
    pub fn push(
        prefix: impl Into<String>,
        types: Arc<TypeRegistry>,
        channel: Arc<dyn PushChannel>,
    ) -> Self {
        Self::with_binding(prefix, types, Binding::Push(channel))
    }

    /// Proxy whose calls wait for a response envelope.
    pub fn request(
        prefix: impl Into<String>,
        types: Arc<TypeRegistry>,
        channel: Arc<dyn RequestChannel>,
    ) -> Self {
        Self::with_binding(prefix, types, Binding::Request(channel))
    }

    /// Proxy with no live connection. Every call fails with
    /// [`RpcError::ConnectionMissing`].
    pub fn unbound(prefix: impl Into<String>, types: Arc<TypeRegistry>) -> Self {
        Self::with_binding(prefix, types, Binding::Unbound)
    }

    /// Session this proxy acts for, used in error messages.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Id of the push connection, for push-bound proxies.
    pub fn connection_id(&self) -> Option<&str> {
        match &self.binding {
            Binding::Push(channel) => Some(channel.id()),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.binding, Binding::Unbound)
    }

    pub fn tag(&self, method: &str) -> String {
        format!("{}.{}", self.prefix, method)
    }

    /// Encode one argument with this interface's type registry.
    pub fn encode_arg<T>(&self, arg: &T) -> Result<Value>
    where
        T: Serialize + 'static,
    {
        codec::encode(arg, &self.types)
    }

    /// Invoke `method` and decode its response as `R`.
    ///
    /// Push calls complete once the frame is queued and yield `R` decoded
    /// from `null`, so they are normally declared without a return type.
    pub async fn call<R>(&self, method: &str, args: Vec<Value>) -> Result<R>
    where
        R: DeserializeOwned + 'static,
    {
        Ok(self.call_outcome(method, args).await?.response)
    }

    /// Like [`call`](Self::call), keeping the callee's push payload.
    pub async fn call_outcome<R>(&self, method: &str, args: Vec<Value>) -> Result<CallOutcome<R>>
    where
        R: DeserializeOwned + 'static,
    {
        let (response, push_payload) = self.call_raw(method, args).await?;
        Ok(CallOutcome {
            response: codec::decode(response, &self.types)?,
            push_payload,
        })
    }

    async fn call_raw(&self, method: &str, args: Vec<Value>) -> Result<(Value, Option<Value>)> {
        let tag = self.tag(method);
        let envelope = CallEnvelope::new(args);

        if self.log.requests {
            if self.log.data {
                info!("Request {} emitting with {:?}", tag, envelope.args);
            } else {
                info!("Request {} emitting", tag);
            }
        }

        let payload = envelope.to_blob()?;
        let result = match &self.binding {
            Binding::Push(channel) => channel
                .send(&tag, payload)
                .await
                .map(|()| (Value::Null, None)),
            Binding::Request(channel) => match channel.request(&tag, payload).await {
                Ok(reply) => ResponseEnvelope::from_blob(&reply).and_then(ResponseEnvelope::into_parts),
                Err(e) => Err(e),
            },
            Binding::Unbound => Err(RpcError::ConnectionMissing {
                session_id: self.session_id.clone(),
            }),
        };

        if let Err(e) = &result {
            if self.log.exceptions {
                warn!("Request {} failed: {}", tag, e);
            }
        }
        result
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = match &self.binding {
            Binding::Push(channel) => format!("push({})", channel.id()),
            Binding::Request(_) => "request".to_string(),
            Binding::Unbound => "unbound".to_string(),
        };
        f.debug_struct("RemoteProxy")
            .field("prefix", &self.prefix)
            .field("binding", &binding)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Declare a remote interface and generate its typed proxy.
///
/// ```ignore
/// sessionrpc_core::remote_interface! {
///     /// What the server can do to a browser.
///     pub struct AlertBrowser {
///         fn send_message(message: String);
///     }
/// }
/// ```
///
/// Each `fn` becomes an async method returning `Result<Ret>` (`Result<()>`
/// without a return type). The wire method name is the identifier as written.
#[macro_export]
macro_rules! remote_interface {
    (@ret) => { () };
    (@ret $ret:ty) => { $ret };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                fn $method:ident ( $( $arg:ident : $arg_ty:ty ),* $(,)? ) $( -> $ret:ty )? ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            proxy: $crate::RemoteProxy,
        }

        impl $crate::RemoteInterface for $name {
            const NAME: &'static str = ::std::stringify!($name);
            const METHODS: &'static [&'static str] = &[ $( ::std::stringify!($method) ),* ];

            fn from_proxy(proxy: $crate::RemoteProxy) -> Self {
                Self { proxy }
            }

            fn proxy(&self) -> &$crate::RemoteProxy {
                &self.proxy
            }
        }

        #[allow(dead_code)]
        impl $name {
            $(
                $(#[$fmeta])*
                pub async fn $method(
                    &self,
                    $( $arg: $arg_ty ),*
                ) -> $crate::Result<$crate::remote_interface!(@ret $($ret)?)> {
                    let args: ::std::vec::Vec<$crate::Value> =
                        ::std::vec![ $( self.proxy.encode_arg(&$arg)? ),* ];
                    self.proxy.call(::std::stringify!($method), args).await
                }
            )*
        }
    };
}
