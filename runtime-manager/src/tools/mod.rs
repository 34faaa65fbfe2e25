//! Tool invocation with cooperative cancellation.
//!
//! Every call runs under a cancellation token. Cancelling signals the
//! pending call (which then resolves with a cancellation result) and asks
//! the transport to abandon the work. Tokens are single-use: once a call
//! settles or is cancelled its token is retired, and a retired or in-flight
//! token passed to a new call is replaced by a fresh one.

mod http;

pub use http::HttpToolTransport;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use runtime_common::ToolCallResult;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Settled tokens of our own minting remembered for reuse detection.
/// Cancelled and caller-supplied tokens are kept for the life of the
/// coordinator.
const RETIRED_TOKEN_CAPACITY: usize = 4096;

/// Where tool calls are executed.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: &Value, token: &str) -> Result<ToolCallResult>;

    /// Ask the server to abandon the call running under `token`.
    async fn cancel_tool_call(&self, token: &str) -> Result<()>;
}

struct InFlight {
    signal: CancellationToken,
    minted: bool,
}

#[derive(Default)]
struct CallTable {
    in_flight: HashMap<String, InFlight>,
    /// Never evicted.
    burned: HashSet<String>,
    retired: VecDeque<String>,
    retired_set: HashSet<String>,
}

impl CallTable {
    fn is_taken(&self, token: &str) -> bool {
        self.in_flight.contains_key(token)
            || self.burned.contains(token)
            || self.retired_set.contains(token)
    }

    fn signal(&self, token: &str) -> Option<CancellationToken> {
        self.in_flight.get(token).map(|call| call.signal.clone())
    }

    fn cancel(&mut self, token: &str) {
        self.in_flight.remove(token);
        self.burned.insert(token.to_string());
    }

    fn retire(&mut self, token: &str) {
        let Some(call) = self.in_flight.remove(token) else {
            return;
        };
        if !call.minted {
            self.burned.insert(token.to_string());
        } else if self.retired_set.insert(token.to_string()) {
            self.retired.push_back(token.to_string());
            if self.retired.len() > RETIRED_TOKEN_CAPACITY {
                if let Some(oldest) = self.retired.pop_front() {
                    self.retired_set.remove(&oldest);
                }
            }
        }
    }
}

type SharedCalls = Arc<StdMutex<CallTable>>;

fn lock(calls: &SharedCalls) -> std::sync::MutexGuard<'_, CallTable> {
    calls.lock().unwrap_or_else(|e| e.into_inner())
}

fn mint_token() -> String {
    format!("tool_cancel_{}", uuid::Uuid::new_v4().simple())
}

/// Cancels one in-flight call. Cheap to clone.
#[derive(Clone)]
pub struct ToolCallCanceller {
    token: String,
    signal: CancellationToken,
    calls: SharedCalls,
    transport: Option<Arc<dyn ToolTransport>>,
}

impl ToolCallCanceller {
    /// Cancel the call. A no-op once the call has settled or was already
    /// cancelled.
    pub async fn cancel(&self) {
        {
            let mut calls = lock(&self.calls);
            match calls.signal(&self.token) {
                Some(signal) if !signal.is_cancelled() => {}
                _ => return,
            }
            calls.cancel(&self.token);
        }
        self.signal.cancel();
        tracing::info!("Tool call {} cancelled", self.token);

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.cancel_tool_call(&self.token).await {
                tracing::warn!("Failed to notify tool server of cancellation {}: {}", self.token, e);
            }
        }
    }
}

/// A call started by [`ToolCoordinator::call_with_cancellation`].
pub struct PendingToolCall {
    pub token: String,
    handle: JoinHandle<ToolCallResult>,
    canceller: ToolCallCanceller,
}

impl PendingToolCall {
    pub fn canceller(&self) -> ToolCallCanceller {
        self.canceller.clone()
    }

    pub async fn cancel(&self) {
        self.canceller.cancel().await
    }

    /// Wait for the outcome. Never fails; errors are in the result.
    pub async fn result(self) -> ToolCallResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => ToolCallResult::failure(
                e.to_string(),
                format!("Tool execution failed: {}", e),
            ),
        }
    }
}

pub struct ToolCoordinator {
    transport: RwLock<Option<Arc<dyn ToolTransport>>>,
    calls: SharedCalls,
}

impl ToolCoordinator {
    pub fn new() -> Self {
        Self {
            transport: RwLock::new(None),
            calls: Arc::new(StdMutex::new(CallTable::default())),
        }
    }

    pub fn with_transport(transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            transport: RwLock::new(Some(transport)),
            calls: Arc::new(StdMutex::new(CallTable::default())),
        }
    }

    /// Attach a transport. Calls already running keep the one they started with.
    pub async fn attach(&self, transport: Arc<dyn ToolTransport>) {
        *self.transport.write().await = Some(transport);
    }

    pub async fn detach(&self) {
        *self.transport.write().await = None;
    }

    /// Tokens of calls still running.
    pub fn in_flight(&self) -> Vec<String> {
        let mut tokens: Vec<String> = lock(&self.calls).in_flight.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Run a tool call to completion.
    pub async fn call(&self, name: &str, arguments: Value) -> ToolCallResult {
        self.call_with_cancellation(name, arguments, None)
            .await
            .result()
            .await
    }

    /// Start a tool call that can be cancelled through the returned handle or
    /// through [`ToolCoordinator::cancel`] with its token.
    pub async fn call_with_cancellation(
        &self,
        name: &str,
        arguments: Value,
        token: Option<String>,
    ) -> PendingToolCall {
        let transport = self.transport.read().await.clone();
        let signal = CancellationToken::new();

        if name.trim().is_empty() {
            let token = mint_token();
            return PendingToolCall {
                token: token.clone(),
                handle: tokio::spawn(async { ToolCallResult::invalid_tool_name() }),
                canceller: ToolCallCanceller {
                    token,
                    signal,
                    calls: self.calls.clone(),
                    transport: None,
                },
            };
        }

        let token = {
            let mut calls = lock(&self.calls);
            let (token, minted) = match token {
                Some(requested) if calls.is_taken(&requested) => {
                    let fresh = mint_token();
                    tracing::warn!(
                        "Cancellation token {} already used, replacing with {}",
                        requested,
                        fresh
                    );
                    (fresh, true)
                }
                Some(requested) if !requested.is_empty() => (requested, false),
                _ => (mint_token(), true),
            };
            calls.in_flight.insert(
                token.clone(),
                InFlight {
                    signal: signal.clone(),
                    minted,
                },
            );
            token
        };

        tracing::debug!("Calling tool {} under {}", name, token);
        let handle = tokio::spawn(run_call(
            transport.clone(),
            name.to_string(),
            arguments,
            token.clone(),
            signal.clone(),
            self.calls.clone(),
        ));

        PendingToolCall {
            token: token.clone(),
            handle,
            canceller: ToolCallCanceller {
                token,
                signal,
                calls: self.calls.clone(),
                transport,
            },
        }
    }

    /// Cancel a call by token. Returns false when no such call is running.
    pub async fn cancel(&self, token: &str) -> bool {
        let signal = lock(&self.calls).signal(token);
        let Some(signal) = signal else {
            return false;
        };
        let canceller = ToolCallCanceller {
            token: token.to_string(),
            signal,
            calls: self.calls.clone(),
            transport: self.transport.read().await.clone(),
        };
        canceller.cancel().await;
        true
    }
}

impl Default for ToolCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_call(
    transport: Option<Arc<dyn ToolTransport>>,
    name: String,
    arguments: Value,
    token: String,
    signal: CancellationToken,
    calls: SharedCalls,
) -> ToolCallResult {
    let result = match transport {
        None => ToolCallResult::not_available(),
        Some(transport) => tokio::select! {
            biased;
            _ = signal.cancelled() => ToolCallResult::cancelled(),
            result = transport.call_tool(&name, &arguments, &token) => match result {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Tool {} failed: {}", name, e);
                    ToolCallResult::failure(e.to_string(), format!("Tool execution failed: {}", e))
                }
            },
        },
    };

    lock(&calls).retire(&token);

    // A cancel that landed while the transport was answering still wins.
    if signal.is_cancelled() {
        ToolCallResult::cancelled()
    } else {
        result
    }
}
