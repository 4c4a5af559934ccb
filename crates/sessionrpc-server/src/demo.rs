//! Example application served by the binary.
//!
//! - `/users.*`: sign-up, login and logout, with the logged-in user kept as
//!   session state, plus a greeting broadcast to every connected browser
//! - `/server.*`: pushes to the caller's own browser and to everyone
//! - `/client`: handshake for the browser's `AlertBrowser` implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionrpc_core::{
    remote_interface, Args, CallContext, Dispatcher, DispatcherConfig, Endpoint,
    EndpointRegistry, Result, RpcError, SessionStore, TypeRegistry, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub const USERS_PREFIX: &str = "users";
pub const SERVER_PREFIX: &str = "server";
pub const CLIENT_PREFIX: &str = "client";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Registered users by email, shared by all sessions.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn insert(&self, user: User) {
        let mut users = self.users.write().unwrap_or_else(|p| p.into_inner());
        users.insert(user.email.clone(), user);
    }

    pub fn get(&self, email: &str) -> Option<User> {
        let users = self.users.read().unwrap_or_else(|p| p.into_inner());
        users.get(email).cloned()
    }
}

remote_interface! {
    /// Account operations, answered by [`UserEndpoint`].
    pub struct UserRequest {
        fn register_user(email: String, name: String, password: String);
        fn login(email: String, password: String) -> User;
        fn logout();
        fn greet_all();
    }
}

remote_interface! {
    /// Push demonstrations, answered by [`ServerEndpoint`].
    pub struct ServerRequest {
        fn server_direct_cb();
        fn server_broadcast_cb();
    }
}

remote_interface! {
    /// Implemented by the browser.
    pub struct AlertBrowser {
        fn send_message(message: String);
    }
}

/// Per-session login state.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserEndpoint {
    pub user: Option<User>,
}

#[async_trait]
impl Endpoint for UserEndpoint {
    const METHODS: &'static [&'static str] = &["register_user", "login", "logout", "greet_all"];

    async fn invoke(&mut self, method: &str, args: &Args, ctx: &mut CallContext) -> Result<Value> {
        match method {
            "register_user" => {
                let directory = ctx.service::<UserDirectory>()?;
                directory.insert(User::new(
                    args.get::<String>(1)?,
                    args.get::<String>(0)?,
                    args.get::<String>(2)?,
                ));
                Ok(Value::Null)
            }
            "login" => {
                let email: String = args.get(0)?;
                let password: String = args.get(1)?;
                let directory = ctx.service::<UserDirectory>()?;
                match directory.get(&email) {
                    Some(user) if user.password == password => {
                        let user = User::new(user.name, user.email, "*****");
                        self.user = Some(user.clone());
                        ctx.encode(&user)
                    }
                    _ => Err(RpcError::handler("invalid email or password")),
                }
            }
            "logout" => match self.user.take() {
                Some(_) => Ok(Value::Null),
                None => Err(RpcError::handler("No one logged in")),
            },
            "greet_all" => {
                for session in ctx.bridge().enumerate_sessions().await? {
                    let name = session
                        .endpoint::<UserEndpoint>()?
                        .user
                        .map(|user| user.name)
                        .unwrap_or_default();
                    let browser: AlertBrowser = session.peer()?;
                    if let Err(e) = browser.send_message(format!("Hi {} how are you?", name)).await {
                        debug!(session_id = session.session_id(), "Greeting not delivered: {}", e);
                    }
                }
                Ok(Value::Null)
            }
            other => Err(RpcError::MethodNotImplemented {
                prefix: ctx.prefix().to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// Stateless endpoint that calls back into browsers.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerEndpoint {}

#[async_trait]
impl Endpoint for ServerEndpoint {
    const METHODS: &'static [&'static str] = &["server_direct_cb", "server_broadcast_cb"];

    async fn invoke(&mut self, method: &str, _args: &Args, ctx: &mut CallContext) -> Result<Value> {
        match method {
            "server_direct_cb" => {
                let browser: AlertBrowser = ctx.peer().await?;
                browser.send_message("Hello".to_string()).await?;
                Ok(Value::Null)
            }
            "server_broadcast_cb" => {
                for session in ctx.bridge().enumerate_sessions().await? {
                    let browser: AlertBrowser = session.peer()?;
                    if let Err(e) = browser
                        .send_message("hello out there from the server".to_string())
                        .await
                    {
                        debug!(session_id = session.session_id(), "Broadcast not delivered: {}", e);
                    }
                }
                Ok(Value::Null)
            }
            other => Err(RpcError::MethodNotImplemented {
                prefix: ctx.prefix().to_string(),
                method: other.to_string(),
            }),
        }
    }
}

/// Types that keep their tag on the wire.
pub fn types() -> Result<TypeRegistry> {
    TypeRegistry::new().with::<User>("User")
}

/// Registry with both endpoints and the browser interface.
pub fn registry() -> Result<EndpointRegistry> {
    let mut registry = EndpointRegistry::new();
    registry.register::<UserEndpoint, UserRequest>(USERS_PREFIX, Some(types()?), None)?;
    registry.register::<ServerEndpoint, ServerRequest>(SERVER_PREFIX, None, None)?;
    registry.register_callable_interface::<AlertBrowser>(CLIENT_PREFIX, None)?;
    Ok(registry)
}

pub fn build_dispatcher(store: Arc<dyn SessionStore>, config: DispatcherConfig) -> Result<Dispatcher> {
    Dispatcher::builder(registry()?, store)
        .config(config)
        .service(Arc::new(UserDirectory::default()))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionrpc_core::{LocalChannel, LogConfig, MemorySessionStore};

    fn dispatcher() -> Arc<Dispatcher> {
        let config = DispatcherConfig {
            log: LogConfig::quiet(),
            ..Default::default()
        };
        Arc::new(build_dispatcher(Arc::new(MemorySessionStore::new()), config).unwrap())
    }

    #[tokio::test]
    async fn test_login_masks_password() {
        let dispatcher = dispatcher();
        let session = dispatcher.bridge().create_session().await.unwrap();
        let users: UserRequest = LocalChannel::proxy(dispatcher.clone(), USERS_PREFIX, &session).unwrap();

        users
            .register_user("foo@bar.com".into(), "Foo Bar".into(), "foo123".into())
            .await
            .unwrap();
        let user = users.login("foo@bar.com".into(), "foo123".into()).await.unwrap();
        assert_eq!(user, User::new("Foo Bar", "foo@bar.com", "*****"));

        let state: UserEndpoint = dispatcher.bridge().endpoint(&session).await.unwrap();
        assert_eq!(state.user, Some(user));
    }

    #[tokio::test]
    async fn test_direct_callback_without_browser_fails() {
        let dispatcher = dispatcher();
        let session = dispatcher.bridge().create_session().await.unwrap();
        let server: ServerRequest =
            LocalChannel::proxy(dispatcher.clone(), SERVER_PREFIX, &session).unwrap();

        let err = server.server_direct_cb().await.unwrap_err();
        assert!(err.to_string().starts_with("cannot find connection for session"));
        // Broadcast tolerates sessions without a browser.
        server.server_broadcast_cb().await.unwrap();
    }
}
