//! Scriptable provider double for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{CreateOpts, Error, List, Provider, ProviderFlags, Result, Vm};

pub(crate) struct FakeProvider {
    name: String,
    account: String,
    failure: Option<String>,
    delay: Duration,
    flags: FakeFlags,
    calls: AtomicUsize,
    account_calls: AtomicUsize,
    received: Mutex<Vec<Vec<String>>>,
    vms: Mutex<List>,
}

struct FakeFlags {
    arg: String,
}

impl ProviderFlags for FakeFlags {
    fn configure_create_flags(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(clap::Arg::new(self.arg.clone()).long(self.arg.clone()))
    }
}

impl FakeProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            account: String::new(),
            failure: None,
            delay: Duration::ZERO,
            flags: FakeFlags {
                arg: format!("{name}-machine-type"),
            },
            calls: AtomicUsize::new(0),
            account_calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            vms: Mutex::new(List::new()),
        }
    }

    pub(crate) fn with_account(mut self, account: &str) -> Self {
        self.account = account.to_owned();
        self
    }

    /// Every call fails with a backend error carrying `msg`.
    pub(crate) fn failing(mut self, msg: &str) -> Self {
        self.failure = Some(msg.to_owned());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_vms(self, names: &[&str]) -> Self {
        {
            let mut vms = self.vms.lock().expect("vms lock");
            for name in names {
                vms.push(Vm::new(*name, self.name.clone(), "us-east1-b"));
            }
        }
        self
    }

    pub(crate) fn into_arc(self) -> Arc<dyn Provider> {
        Arc::new(self)
    }

    /// Calls to every method except `find_active_account`.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn account_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    /// VM names passed to each batch call, in call order.
    pub(crate) fn received(&self) -> Vec<Vec<String>> {
        self.received.lock().expect("received lock").clone()
    }

    async fn record(&self, names: Vec<String>) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().expect("received lock").push(names);
        match &self.failure {
            Some(msg) => Err(Error::backend(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn clean_ssh(&self) -> Result<()> {
        self.record(Vec::new()).await
    }

    async fn config_ssh(&self) -> Result<()> {
        self.record(Vec::new()).await
    }

    async fn create(&self, names: &[String], opts: &CreateOpts) -> Result<()> {
        self.record(names.to_vec()).await?;
        let mut vms = self.vms.lock().expect("vms lock");
        for name in names {
            let mut vm = Vm::new(name.clone(), self.name.clone(), "us-east1-b");
            vm.lifetime = opts.lifetime;
            vms.push(vm);
        }
        Ok(())
    }

    async fn delete(&self, vms: &List) -> Result<()> {
        self.record(vms.names()).await
    }

    async fn extend(&self, vms: &List, _lifetime: Duration) -> Result<()> {
        self.record(vms.names()).await
    }

    async fn find_active_account(&self) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(msg) => Err(Error::backend(msg.clone())),
            None => Ok(self.account.clone()),
        }
    }

    fn flags(&self) -> &dyn ProviderFlags {
        &self.flags
    }

    async fn list(&self) -> Result<List> {
        self.record(Vec::new()).await?;
        Ok(self.vms.lock().expect("vms lock").clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
