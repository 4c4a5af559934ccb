//! Basic usage example - a per-session counter driven in-process
//!
//! Pass a file path to keep sessions in SQLite; the counter then survives
//! restarts as long as the same session id is reused.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sessionrpc_core::{
    remote_interface, Args, CallContext, Dispatcher, Endpoint, EndpointRegistry, LocalChannel,
    MemorySessionStore, Result, RpcError, SessionStore, SqliteSessionStore, Value,
};
use std::sync::Arc;

remote_interface! {
    pub struct CounterApi {
        fn add(amount: i64) -> i64;
        fn reset();
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Counter {
    total: i64,
}

#[async_trait]
impl Endpoint for Counter {
    const METHODS: &'static [&'static str] = &["add", "reset"];

    async fn invoke(&mut self, method: &str, args: &Args, ctx: &mut CallContext) -> Result<Value> {
        match method {
            "add" => {
                self.total += args.get::<i64>(0)?;
                ctx.encode(&self.total)
            }
            "reset" => {
                self.total = 0;
                Ok(Value::Null)
            }
            other => Err(RpcError::MethodNotImplemented {
                prefix: ctx.prefix().to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let store: Arc<dyn SessionStore> = match std::env::args().nth(1) {
        Some(path) => {
            println!("Using session database: {}", path);
            Arc::new(SqliteSessionStore::new(path)?)
        }
        None => Arc::new(MemorySessionStore::new()),
    };

    let mut registry = EndpointRegistry::new();
    registry.register::<Counter, CounterApi>("counter", None, None)?;
    let dispatcher = Arc::new(Dispatcher::builder(registry, store).build()?);

    let alice = dispatcher.bridge().create_session().await?;
    let bob = dispatcher.bridge().create_session().await?;
    let alice_counter: CounterApi = LocalChannel::proxy(dispatcher.clone(), "counter", &alice)?;
    let bob_counter: CounterApi = LocalChannel::proxy(dispatcher.clone(), "counter", &bob)?;

    for amount in [1, 2, 3] {
        println!("alice adds {} -> {}", amount, alice_counter.add(amount).await?);
    }
    println!("bob adds 10 -> {}", bob_counter.add(10).await?);

    bob_counter.reset().await?;
    let sessions = dispatcher.bridge().enumerate_sessions().await?;
    println!("{} sessions:", sessions.len());
    for session in sessions {
        let counter: Counter = session.endpoint()?;
        println!("  - {} total={}", session.session_id(), counter.total);
    }

    Ok(())
}
