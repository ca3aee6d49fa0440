//! Agreement on which account every provider is acting as.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{Error, ProviderRegistry, Result};

/// Resolves and memoizes the single account shared by all providers.
///
/// Concurrent first callers share one resolution. A successful answer is
/// kept for the life of the value; failures are not cached, so a later call
/// asks the providers again.
#[derive(Debug)]
pub struct ActiveAccount {
    registry: ProviderRegistry,
    cached: OnceCell<String>,
}

impl ActiveAccount {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            cached: OnceCell::new(),
        }
    }

    /// The agreed account, asking every provider on first use.
    pub async fn resolve(&self) -> Result<String> {
        self.cached
            .get_or_try_init(|| self.query())
            .await
            .cloned()
    }

    /// The memoized account, if one has been resolved.
    pub fn cached(&self) -> Option<&str> {
        self.cached.get().map(String::as_str)
    }

    async fn query(&self) -> Result<String> {
        let names = self.registry.all_provider_names();
        let answers = self
            .registry
            .providers_sequential(&names, |p| async move {
                p.find_active_account()
                    .await
                    .map(|account| (p.name().to_owned(), account))
            })
            .await?;

        let account = reduce_accounts(answers.into_iter().collect())?;
        info!(account = %account, "resolved active account");
        Ok(account)
    }
}

/// Reduce per-provider answers to one account.
///
/// Empty answers carry no vote. Every non-empty answer must be the same,
/// otherwise the full breakdown is returned in
/// [`Error::MultipleActiveAccounts`].
pub fn reduce_accounts(accounts: BTreeMap<String, String>) -> Result<String> {
    let distinct: BTreeSet<&str> = accounts
        .values()
        .map(String::as_str)
        .filter(|account| !account.is_empty())
        .collect();

    let agreed = match distinct.len() {
        0 => return Err(Error::NoActiveAccounts),
        1 => distinct.first().map(|account| (*account).to_owned()),
        _ => None,
    };

    match agreed {
        Some(account) => Ok(account),
        None => {
            debug!(?accounts, "providers disagree on the active account");
            Err(Error::MultipleActiveAccounts(accounts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Provider;
    use crate::testing::FakeProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry(providers: &[&Arc<FakeProvider>]) -> ProviderRegistry {
        providers
            .iter()
            .fold(ProviderRegistry::builder(), |b, p| b.register(Arc::clone(*p) as Arc<dyn Provider>))
            .build()
    }

    fn votes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(p, a)| ((*p).to_owned(), (*a).to_owned()))
            .collect()
    }

    #[test]
    fn test_reduce_ignores_empty_votes() {
        let account = reduce_accounts(votes(&[("aws", "acct1"), ("local", ""), ("gce", "acct1")]));
        assert_eq!(account.expect("unanimous"), "acct1");
    }

    #[test]
    fn test_reduce_no_votes() {
        let err = reduce_accounts(votes(&[("aws", ""), ("local", "")])).expect_err("no opinions");
        assert!(matches!(err, Error::NoActiveAccounts));

        let err = reduce_accounts(BTreeMap::new()).expect_err("no providers");
        assert!(matches!(err, Error::NoActiveAccounts));
    }

    #[test]
    fn test_reduce_disagreement_keeps_breakdown() {
        let err = reduce_accounts(votes(&[("aws", "acct1"), ("gce", "acct2"), ("local", "")]))
            .expect_err("providers disagree");

        match err {
            Error::MultipleActiveAccounts(breakdown) => {
                assert_eq!(breakdown, votes(&[("aws", "acct1"), ("gce", "acct2"), ("local", "")]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let aws = Arc::new(FakeProvider::new("aws").with_account("acct1"));
        let gce = Arc::new(FakeProvider::new("gce").with_account("acct1"));
        let resolver = ActiveAccount::new(registry(&[&aws, &gce]));

        assert_eq!(resolver.cached(), None);
        assert_eq!(resolver.resolve().await.expect("agreement"), "acct1");
        assert_eq!(resolver.resolve().await.expect("cached"), "acct1");

        assert_eq!(resolver.cached(), Some("acct1"));
        assert_eq!(aws.account_calls(), 1);
        assert_eq!(gce.account_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_all_empty() {
        let aws = Arc::new(FakeProvider::new("aws"));
        let resolver = ActiveAccount::new(registry(&[&aws]));

        let err = resolver.resolve().await.expect_err("no accounts");
        assert!(matches!(err, Error::NoActiveAccounts));
        assert_eq!(err.to_string(), "no Providers returned any active accounts");
    }

    #[tokio::test]
    async fn test_resolve_disagreement_names_both() {
        let aws = Arc::new(FakeProvider::new("aws").with_account("acct1"));
        let gce = Arc::new(FakeProvider::new("gce").with_account("acct2"));
        let resolver = ActiveAccount::new(registry(&[&aws, &gce]));

        let err = resolver.resolve().await.expect_err("disagreement");
        let msg = err.to_string();
        assert!(msg.contains("acct1") && msg.contains("acct2"), "{msg}");
        assert_eq!(resolver.cached(), None);
    }

    #[tokio::test]
    async fn test_resolve_provider_failure_is_not_cached() {
        let aws = Arc::new(FakeProvider::new("aws").failing("token expired"));
        let resolver = ActiveAccount::new(registry(&[&aws]));

        let err = resolver.resolve().await.expect_err("provider fails");
        assert_eq!(err.provider(), Some("aws"));
        let _ = resolver.resolve().await;
        assert_eq!(aws.account_calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_share_one_resolution() {
        let aws = Arc::new(
            FakeProvider::new("aws")
                .with_account("acct1")
                .with_delay(Duration::from_millis(20)),
        );
        let resolver = Arc::new(ActiveAccount::new(registry(&[&aws])));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move { resolver.resolve().await }));
        }
        for handle in handles {
            let account = handle.await.expect("task completes").expect("agreement");
            assert_eq!(account, "acct1");
        }

        assert_eq!(aws.account_calls(), 1);
    }
}
