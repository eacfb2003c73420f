//! Application callback trait

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Asynchronous application callback for inbound items.
///
/// An `Err` return is logged at the dispatch boundary and never stops the
/// channel that delivered the item.
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    /// Process a single item
    async fn handle(&self, item: T) -> anyhow::Result<()>;
}

/// Shared, type-erased handler
pub type SharedHandler<T> = Arc<dyn Handler<T>>;

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<T, F, Fut> Handler<T> for HandlerFn<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, item: T) -> anyhow::Result<()> {
        (self.0)(item).await
    }
}

/// Wrap an async closure as a shared handler.
///
/// ```
/// use commandlink_core::handler::handler_fn;
/// use commandlink_core::Command;
///
/// let handler = handler_fn(|cmd: Command| async move {
///     tracing::info!(command_type = %cmd.command_type, "handled");
///     Ok(())
/// });
/// ```
pub fn handler_fn<T, F, Fut>(f: F) -> SharedHandler<T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}
