//! Routing of logical operations to one, many, or all providers.
//!
//! Concurrent entry points spawn one task per provider on a [`JoinSet`] and
//! wait for every task to finish before returning. Tasks never cancel each
//! other: a provider call already in flight (a half-done create, say) cannot
//! be safely abandoned, so a failure in one group only decides which error
//! the caller sees. The first error to complete wins; later ones are logged.
//!
//! Dropping a dispatch future early (under an outer timeout, say) stops the
//! wait but not the work: tasks still in flight are detached and run to
//! completion in the background, and their results are discarded.
//!
//! Nothing here imposes a timeout. A provider call that hangs hangs the whole
//! dispatch, so backends must bound their own network calls.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{Error, List, Provider, ProviderRegistry, Result};

impl ProviderRegistry {
    /// Group `list` by owning provider and run `action` on every group
    /// concurrently.
    ///
    /// A group whose provider is not registered fails with
    /// [`Error::UnknownProvider`] without stopping the other groups. Results
    /// come back in provider name order.
    pub async fn fan_out<F, Fut, T>(&self, list: List, action: F) -> Result<Vec<T>>
    where
        F: Fn(Arc<dyn Provider>, List) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let action = Arc::new(action);
        let mut tasks: JoinSet<Result<(usize, T)>> = JoinSet::new();

        for (idx, (name, vms)) in list.by_provider().into_iter().enumerate() {
            let provider = self.get(&name);
            let action = Arc::clone(&action);
            tasks.spawn(async move {
                let provider = provider?;
                debug!(provider = %name, vms = vms.len(), "fan-out");
                (*action)(provider, vms).await.map(|out| (idx, out))
            });
        }

        join_ordered(tasks).await
    }

    /// Resolve `named` and run `action` on it, attaching the provider name to
    /// any error the action returns.
    ///
    /// An unregistered name fails with [`Error::UnknownVmProvider`].
    pub async fn for_provider<F, Fut, T>(&self, named: &str, action: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = self
            .get(named)
            .map_err(|_| Error::UnknownVmProvider(named.to_owned()))?;
        action(provider).await.map_err(|e| e.in_provider(named))
    }

    /// Run `action` on every named provider concurrently, via
    /// [`for_provider`](Self::for_provider). Results follow the order of `named`.
    pub async fn providers_parallel<S, F, Fut, T>(&self, named: &[S], action: F) -> Result<Vec<T>>
    where
        S: AsRef<str>,
        F: Fn(Arc<dyn Provider>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let action = Arc::new(action);
        let mut tasks: JoinSet<Result<(usize, T)>> = JoinSet::new();

        for (idx, name) in named.iter().enumerate() {
            let registry = self.clone();
            let name = name.as_ref().to_owned();
            let action = Arc::clone(&action);
            tasks.spawn(async move {
                registry
                    .for_provider(&name, |p| (*action)(p))
                    .await
                    .map(|out| (idx, out))
            });
        }

        join_ordered(tasks).await
    }

    /// Run `action` on each named provider in turn, stopping at the first
    /// error.
    pub async fn providers_sequential<S, F, Fut, T>(&self, named: &[S], mut action: F) -> Result<Vec<T>>
    where
        S: AsRef<str>,
        F: FnMut(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut results = Vec::with_capacity(named.len());
        for name in named {
            results.push(self.for_provider(name.as_ref(), &mut action).await?);
        }
        Ok(results)
    }

    /// Every VM from every provider, sorted by name.
    pub async fn list_all(&self) -> Result<List> {
        let names = self.sorted_provider_names();
        let lists = self
            .providers_parallel(&names, |p| async move { p.list().await })
            .await?;

        let mut all: List = lists.into_iter().flatten().collect();
        all.sort_by_name();
        Ok(all)
    }
}

/// A [`JoinSet`] that detaches its remaining tasks on drop instead of
/// aborting them.
struct Detached<T: 'static>(JoinSet<T>);

impl<T: 'static> Drop for Detached<T> {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            debug!(tasks = self.0.len(), "dispatch dropped, detaching in-flight tasks");
            self.0.detach_all();
        }
    }
}

/// Drain `tasks`, returning the first error seen or all outputs sorted by
/// their spawn index.
async fn join_ordered<T: Send + 'static>(tasks: JoinSet<Result<(usize, T)>>) -> Result<Vec<T>> {
    let mut tasks = Detached(tasks);
    let mut outputs = Vec::with_capacity(tasks.0.len());
    let mut first_err = None;

    while let Some(joined) = tasks.0.join_next().await {
        let outcome = joined
            .map_err(|e| Error::TaskFailed(e.to_string()))
            .and_then(|res| res);
        match outcome {
            Ok(out) => outputs.push(out),
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(e) => warn!(error = %e, "additional dispatch failure"),
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }
    outputs.sort_by_key(|(idx, _)| *idx);
    Ok(outputs.into_iter().map(|(_, out)| out).collect())
}
