use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{Error, Provider, Result, fly, local};

/// Registry of all configured VM providers, keyed by [`Provider::name`].
///
/// Built once at startup and immutable afterwards; clones share the same
/// table, so lookups from concurrent dispatch tasks need no locking.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<HashMap<String, Arc<dyn Provider>>>,
}

/// Collects providers before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl RegistryBuilder {
    /// Add a provider under its own name, replacing any earlier one.
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        let name = provider.name().to_owned();
        if self.providers.insert(name.clone(), provider).is_some() {
            warn!(provider = %name, "provider registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: Arc::new(self.providers),
        }
    }
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider(name.to_owned()))
    }

    /// Names of all registered providers, in no particular order.
    pub fn all_provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn sorted_provider_names(&self) -> Vec<String> {
        let mut names = self.all_provider_names();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Let every provider add its create flags to `cmd`, in name order.
    pub fn configure_create_flags(&self, cmd: clap::Command) -> clap::Command {
        self.sorted_provider_names()
            .iter()
            .filter_map(|name| self.providers.get(name))
            .fold(cmd, |cmd, provider| provider.flags().configure_create_flags(cmd))
    }

    /// Hand the parsed create flags back to every provider.
    pub fn apply_create_flags(&self, matches: &clap::ArgMatches) -> Result<()> {
        for name in self.sorted_provider_names() {
            let provider = self.get(&name)?;
            provider
                .flags()
                .apply_create_flags(matches)
                .map_err(|e| e.in_provider(name))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.sorted_provider_names())
            .finish()
    }
}

/// Build the registry of built-in backends.
///
/// The local backend is always present. Cloud backends whose required env
/// vars are missing are skipped with a debug log.
pub fn build_providers() -> ProviderRegistry {
    dotenvy::dotenv().ok();
    builtin_providers(fly::FlyProvider::from_env())
}

/// The local backend plus whichever cloud backends were configured.
fn builtin_providers(fly: Result<fly::FlyProvider>) -> ProviderRegistry {
    let mut builder = ProviderRegistry::builder().register(Arc::new(local::LocalProvider::new()));
    info!("registered local VM provider");

    match fly {
        Ok(p) => {
            info!("registered Fly.io VM provider");
            builder = builder.register(Arc::new(p));
        }
        Err(e) => debug!("skipping Fly.io provider: {e}"),
    }

    builder.build()
}
