//! Round-robin pool of RPC invokers

use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// A remote procedure call client
///
/// The pool does not interpret requests or responses; implementations own
/// transport, authentication and error mapping (typically to [`Error::Rpc`]).
#[async_trait::async_trait]
pub trait Invoker<Req, Resp>: Send + Sync {
    /// Send one request and wait for its response
    ///
    /// Implementations should give up with [`Error::Cancelled`] once `cancel`
    /// fires.
    async fn invoke(&self, request: &Req, cancel: &CancellationToken) -> Result<Resp>;
}

/// Shared handle to an invoker
pub type SharedInvoker<Req, Resp> = Arc<dyn Invoker<Req, Resp>>;

struct PoolState<Req, Resp> {
    clients: Vec<SharedInvoker<Req, Resp>>,
    cursor: usize,
}

/// Distributes calls across registered invokers in strict rotation
///
/// Membership and the rotation cursor share one lock, so concurrent `add` and
/// `invoke` calls never observe a half-updated pool. There is no health
/// checking: a failing client keeps its turn.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tentacle::{Invoker, InvokerPool};
/// use tokio_util::sync::CancellationToken;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Invoker<String, String> for Echo {
///     async fn invoke(
///         &self,
///         request: &String,
///         _cancel: &CancellationToken,
///     ) -> tentacle::Result<String> {
///         Ok(request.clone())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> tentacle::Result<()> {
/// let pool: InvokerPool<String, String> = InvokerPool::new();
/// pool.add(Arc::new(Echo));
/// let cancel = CancellationToken::new();
/// assert_eq!(pool.invoke(&"ping".to_string(), &cancel).await?, "ping");
/// # Ok(())
/// # }
/// ```
pub struct InvokerPool<Req, Resp> {
    state: Mutex<PoolState<Req, Resp>>,
}

impl<Req, Resp> InvokerPool<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                clients: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Create a pool from an initial set of clients
    pub fn with_clients(clients: impl IntoIterator<Item = SharedInvoker<Req, Resp>>) -> Self {
        let pool = Self::new();
        pool.lock().clients.extend(clients);
        pool
    }

    /// Append a client to the rotation
    pub fn add(&self, client: SharedInvoker<Req, Resp>) {
        let mut state = self.lock();
        state.clients.push(client);
        tracing::debug!(clients = state.clients.len(), "Added client to invoker pool");
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    /// Whether no client is registered
    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    /// Forward `request` to the next client in rotation
    ///
    /// Fails with [`Error::NoClients`] without calling anything when the pool
    /// is empty. A call made with an already cancelled token does not take a
    /// turn. Once `cancel` fires the call ends with [`Error::Cancelled`], even
    /// if the client ignores the token. Otherwise the client's own result is
    /// returned unchanged.
    pub async fn invoke(&self, request: &Req, cancel: &CancellationToken) -> Result<Resp> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let (index, client) = self.next_client()?;
        tracing::trace!(client = index, "Dispatching pooled call");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = client.invoke(request, cancel) => result,
        }
    }

    fn next_client(&self) -> Result<(usize, SharedInvoker<Req, Resp>)> {
        let mut state = self.lock();
        let len = state.clients.len();
        if len == 0 {
            return Err(Error::NoClients);
        }
        let index = state.cursor % len;
        state.cursor = (index + 1) % len;
        Ok((index, Arc::clone(&state.clients[index])))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<Req, Resp>> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<Req, Resp> Default for InvokerPool<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<Req, Resp> Invoker<Req, Resp> for InvokerPool<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req, cancel: &CancellationToken) -> Result<Resp> {
        InvokerPool::invoke(self, request, cancel).await
    }
}
