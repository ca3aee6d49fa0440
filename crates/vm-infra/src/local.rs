use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{CreateOpts, LOCAL_ZONE, List, Vm, VmError};
use crate::{Error, NoFlags, Provider, ProviderFlags, Result};

pub const PROVIDER_NAME: &str = "local";

const LOOPBACK: &str = "127.0.0.1";

/// VMs that all live on the local host.
///
/// Instances are tracked in memory for the life of the process. The local
/// backend never claims an account, so it does not take part in account
/// agreement.
#[derive(Default)]
pub struct LocalProvider {
    vms: Mutex<List>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_vm(name: &str, lifetime: Duration) -> Vm {
        let mut vm = Vm::new(name, PROVIDER_NAME, LOCAL_ZONE);
        vm.lifetime = lifetime;
        vm.dns = "localhost".into();
        vm.private_ip = LOOPBACK.into();
        vm.public_ip = LOOPBACK.into();
        if name.trim().is_empty() {
            vm.errors.push(VmError::InvalidName);
        }
        vm
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn clean_ssh(&self) -> Result<()> {
        debug!("local: no ssh config to clean");
        Ok(())
    }

    async fn config_ssh(&self) -> Result<()> {
        debug!("local: no ssh config needed");
        Ok(())
    }

    async fn create(&self, names: &[String], opts: &CreateOpts) -> Result<()> {
        let mut vms = self.vms.lock().await;

        let existing: HashSet<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
        let mut seen = HashSet::new();
        for name in names {
            if existing.contains(name.as_str()) || !seen.insert(name.as_str()) {
                return Err(Error::backend(format!("local vm {name} already exists")));
            }
        }

        for name in names {
            vms.push(Self::new_vm(name, opts.lifetime));
        }
        info!(count = names.len(), "local: vms created");
        Ok(())
    }

    async fn delete(&self, vms: &List) -> Result<()> {
        let doomed: HashSet<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
        let mut current = self.vms.lock().await;
        current.retain(|vm| !doomed.contains(vm.name.as_str()));
        info!(count = doomed.len(), "local: vms deleted");
        Ok(())
    }

    async fn extend(&self, vms: &List, lifetime: Duration) -> Result<()> {
        let mut current = self.vms.lock().await;
        for target in vms {
            let vm = current
                .iter_mut()
                .find(|vm| vm.name == target.name)
                .ok_or_else(|| Error::UnknownVm(target.name.clone()))?;
            vm.lifetime = lifetime;
        }
        info!(count = vms.len(), lifetime_secs = lifetime.as_secs(), "local: vms extended");
        Ok(())
    }

    async fn find_active_account(&self) -> Result<String> {
        Ok(String::new())
    }

    fn flags(&self) -> &dyn ProviderFlags {
        &NoFlags
    }

    async fn list(&self) -> Result<List> {
        Ok(self.vms.lock().await.clone())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
