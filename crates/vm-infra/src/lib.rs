//! Multi-backend VM orchestration.
//!
//! Each hosting platform implements [`Provider`]. Backends are collected into a
//! [`ProviderRegistry`], which routes batch operations to their owners
//! concurrently or in order. [`ActiveAccount`] reduces every backend's idea of
//! the current identity to a single agreed value.

pub mod account;
mod dispatch;
pub mod fly;
pub mod local;
pub mod registry;
pub mod types;

#[cfg(test)]
mod testing;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

pub use account::{ActiveAccount, reduce_accounts};
pub use registry::{ProviderRegistry, RegistryBuilder, build_providers};
pub use types::{CreateOpts, DEFAULT_LIFETIME, LOCAL_ZONE, List, Vm, VmError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown provider name: {0}")]
    UnknownProvider(String),

    /// A provider named explicitly by the caller is not registered.
    #[error("unknown vm provider: {0}")]
    UnknownVmProvider(String),

    #[error("in provider: {provider}: {source}")]
    InProvider {
        provider: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    #[error("fly provider error: {0}")]
    Fly(#[from] fly_api::Error),

    #[error("no Providers returned any active accounts")]
    NoActiveAccounts,

    #[error("multiple active Provider accounts detected: {0:?}")]
    MultipleActiveAccounts(BTreeMap<String, String>),

    #[error("unable to parse region from zone {0:?}")]
    MalformedZone(String),

    #[error("no such vm: {0}")]
    UnknownVm(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an opaque backend failure.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }

    /// Attach the name of the provider the error came from.
    pub fn in_provider(self, provider: impl Into<String>) -> Self {
        Self::InProvider {
            provider: provider.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any provider context.
    pub fn root(&self) -> &Error {
        let mut err = self;
        while let Self::InProvider { source, .. } = err {
            err = &**source;
        }
        err
    }

    /// True for either flavour of unregistered-provider lookup.
    pub fn is_unknown_provider(&self) -> bool {
        matches!(self.root(), Self::UnknownProvider(_) | Self::UnknownVmProvider(_))
    }

    /// The outermost provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::InProvider { provider, .. } => Some(provider.as_str()),
            _ => None,
        }
    }
}

/// Hook for backends to add their own options to the `create` command.
///
/// Flag names should be prefixed with the provider name (`--fly-region`) so
/// that similar options from different backends cannot collide.
pub trait ProviderFlags: Send + Sync {
    /// Add this backend's create options to `cmd`.
    fn configure_create_flags(&self, cmd: clap::Command) -> clap::Command;

    /// Read back the values parsed for the options added by
    /// [`configure_create_flags`](Self::configure_create_flags).
    fn apply_create_flags(&self, _matches: &clap::ArgMatches) -> Result<()> {
        Ok(())
    }
}

/// Flags for backends that have no create options of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlags;

impl ProviderFlags for NoFlags {
    fn configure_create_flags(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }
}

/// A source of virtual machines running on some hosting platform.
///
/// Batch operations receive only the VMs this provider owns; callers are
/// expected to partition by [`Vm::provider`] first (see
/// [`ProviderRegistry::fan_out`]).
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Remove any local SSH configuration written by [`config_ssh`](Self::config_ssh).
    async fn clean_ssh(&self) -> Result<()>;

    /// Write local SSH configuration for reaching this provider's VMs.
    async fn config_ssh(&self) -> Result<()>;

    /// Provision one VM per name. A single error covers the whole batch.
    async fn create(&self, names: &[String], opts: &CreateOpts) -> Result<()>;

    async fn delete(&self, vms: &List) -> Result<()>;

    /// Set the lifetime of each VM to `lifetime`, measured from its creation.
    async fn extend(&self, vms: &List, lifetime: Duration) -> Result<()>;

    /// The account this backend is authenticated as. An empty string means
    /// the backend has no opinion.
    async fn find_active_account(&self) -> Result<String>;

    /// Hook point for extending the create command with backend flags.
    fn flags(&self) -> &dyn ProviderFlags;

    /// Every VM this provider currently owns.
    async fn list(&self) -> Result<List>;

    /// Registry key, also stamped on every [`Vm::provider`] it reports.
    fn name(&self) -> &str;
}
