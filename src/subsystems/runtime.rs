//! Background component runtime.
//!
//! A [`Component`] is a long-running unit with its shared state captured at
//! construction: the memory eviction sweeper and the HTTP channel are the two
//! in this crate. [`spawn_components`] runs them together on one
//! [`CancellationToken`]; the first failure cancels the token so the siblings
//! stop too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its run-loop. The loop must return
    /// once `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// Handle to a running component set.
pub struct ComponentsHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl ComponentsHandle {
    /// Wait for every component and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("component task panicked: {e}"))),
        }
    }
}

/// Spawn each component as its own task.
///
/// If any component returns `Err` or panics, `shutdown` is cancelled and the
/// remaining components are drained before the first error is returned.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> ComponentsHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<(String, Result<(), AppError>)> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(async move {
                let result = component.run(shutdown).await;
                (id, result)
            });
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err
                        .get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
                Ok((id, Err(e))) => {
                    error!(component = %id, error = %e, "component failed");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok((id, Ok(()))) => info!(component = %id, "component stopped"),
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    ComponentsHandle { inner: handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct WaitForShutdown(Arc<AtomicBool>);

    impl Component for WaitForShutdown {
        fn id(&self) -> &str {
            "waiter"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct FailImmediately;

    impl Component for FailImmediately {
        fn id(&self) -> &str {
            "failer"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Err(AppError::Comms("bind failed".into())) })
        }
    }

    #[tokio::test]
    async fn failure_cancels_siblings() {
        let stopped = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let handle = spawn_components(
            vec![Box::new(WaitForShutdown(stopped.clone())), Box::new(FailImmediately)],
            token.clone(),
        );

        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("bind failed"));
        assert!(token.is_cancelled());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn clean_shutdown_returns_ok() {
        let stopped = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let handle =
            spawn_components(vec![Box::new(WaitForShutdown(stopped.clone()))], token.clone());
        token.cancel();
        handle.join().await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }
}
