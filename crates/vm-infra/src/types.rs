use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Zone carried by VMs that stand for the local host rather than a cloud instance.
pub const LOCAL_ZONE: &str = "local";

/// Lifetime given to new VMs when the caller does not pick one.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Reasons some or all of a VM's data could not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum VmError {
    #[error("could not determine network information")]
    BadNetwork,

    #[error("invalid VM name")]
    InvalidName,

    #[error("could not determine expiration")]
    NoExpiration,
}

/// A single machine instance, as reported by the provider that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// If non-empty, some of the other fields are missing or invalid.
    pub errors: Vec<VmError>,
    pub lifetime: Duration,
    /// Provider-internal DNS name.
    pub dns: String,
    /// Registry key of the owning provider.
    pub provider: String,
    pub private_ip: String,
    pub public_ip: String,
    pub zone: String,
}

impl Vm {
    /// A VM created now with no network information and no lifetime yet.
    pub fn new(name: impl Into<String>, provider: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            errors: Vec::new(),
            lifetime: Duration::ZERO,
            dns: String::new(),
            provider: provider.into(),
            private_ip: String::new(),
            public_ip: String::new(),
            zone: zone.into(),
        }
    }

    /// Whether this VM represents the local host.
    pub fn is_local(&self) -> bool {
        self.zone == LOCAL_ZONE
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `region=<region>,zone=<zone>`, with the region derived from the zone.
    ///
    /// The local zone is its own region. Any other zone must end in a zone
    /// letter (`us-east1-b`, `eastus2a`), otherwise [`Error::MalformedZone`].
    pub fn locality(&self) -> Result<String> {
        let region = if self.is_local() {
            self.zone.as_str()
        } else {
            region_of(&self.zone).ok_or_else(|| Error::MalformedZone(self.zone.clone()))?
        };
        Ok(format!("region={region},zone={}", self.zone))
    }

    /// When the VM becomes eligible for reclamation.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = TimeDelta::from_std(self.lifetime).ok()?;
        self.created_at.checked_add_signed(lifetime)
    }
}

/// Strip the trailing zone letter, and the `-` before it if there is one.
fn region_of(zone: &str) -> Option<&str> {
    let rest = zone.strip_suffix(|c: char| c.is_ascii_lowercase())?;
    let region = match rest.strip_suffix('-') {
        Some(trimmed) => trimmed,
        None => rest,
    };
    if region.is_empty() || region.ends_with('-') {
        return None;
    }
    Some(region)
}

/// An ordered collection of VMs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct List(pub Vec<Vm>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the VM at `i` orders before the one at `j`.
    pub fn less(&self, i: usize, j: usize) -> bool {
        self.0[i].name < self.0[j].name
    }

    /// Stable sort by name, ascending and case-sensitive.
    pub fn sort_by_name(&mut self) {
        self.0.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|vm| vm.name.clone()).collect()
    }

    pub fn zones(&self) -> Vec<String> {
        self.0.iter().map(|vm| vm.zone.clone()).collect()
    }

    /// Split into one list per owning provider, keeping relative order.
    pub fn by_provider(&self) -> BTreeMap<String, List> {
        let mut groups: BTreeMap<String, List> = BTreeMap::new();
        for vm in &self.0 {
            groups.entry(vm.provider.clone()).or_default().0.push(vm.clone());
        }
        groups
    }
}

impl Deref for List {
    type Target = Vec<Vm>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for List {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Vm>> for List {
    fn from(vms: Vec<Vm>) -> Self {
        Self(vms)
    }
}

impl FromIterator<Vm> for List {
    fn from_iter<I: IntoIterator<Item = Vm>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for List {
    type Item = Vm;
    type IntoIter = std::vec::IntoIter<Vm>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Vm;
    type IntoIter = std::slice::Iter<'a, Vm>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Options for creating VMs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOpts {
    pub use_local_ssd: bool,
    pub lifetime: Duration,
    pub geo_distributed: bool,
    /// Providers allowed to host the new VMs; empty means all of them.
    pub vm_providers: Vec<String>,
}

impl Default for CreateOpts {
    fn default() -> Self {
        Self {
            use_local_ssd: false,
            lifetime: DEFAULT_LIFETIME,
            geo_distributed: false,
            vm_providers: Vec::new(),
        }
    }
}

impl CreateOpts {
    pub fn eligible(&self, provider: &str) -> bool {
        self.vm_providers.is_empty() || self.vm_providers.iter().any(|p| p == provider)
    }
}
