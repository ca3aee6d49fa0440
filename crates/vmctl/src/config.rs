use std::env;
use std::time::Duration;

use vm_infra::{CreateOpts, DEFAULT_LIFETIME, Error, Result};

#[derive(Debug, Clone)]
pub struct CtlConfig {
    /// Lifetime for new VMs when `--lifetime-hours` is not given.
    pub default_lifetime: Duration,
    /// Providers new VMs may be placed on when `--providers` is not given.
    pub vm_providers: Vec<String>,
}

impl CtlConfig {
    /// Load from `VM_LIFETIME_HOURS` (default 12) and `VM_PROVIDERS`
    /// (comma-separated, default all).
    pub fn from_env() -> Result<Self> {
        let default_lifetime = match env::var("VM_LIFETIME_HOURS") {
            Ok(raw) => parse_hours(&raw)?,
            Err(_) => DEFAULT_LIFETIME,
        };
        let vm_providers = env::var("VM_PROVIDERS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            default_lifetime,
            vm_providers,
        })
    }

    pub fn create_opts(&self) -> CreateOpts {
        CreateOpts {
            lifetime: self.default_lifetime,
            vm_providers: self.vm_providers.clone(),
            ..CreateOpts::default()
        }
    }
}

pub fn parse_hours(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|h| *h > 0)
        .map(hours)
        .ok_or_else(|| Error::InvalidConfig(format!("VM_LIFETIME_HOURS must be a positive integer, got {raw:?}")))
}

pub fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60 * 60))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
