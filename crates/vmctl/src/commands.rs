use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use tracing::{info, warn};
use vm_infra::{ActiveAccount, CreateOpts, Error, List, ProviderRegistry, Result, Vm};

pub async fn list(registry: &ProviderRegistry, json: bool) -> Result<()> {
    let vms = registry.list_all().await?;

    if json {
        let out = serde_json::to_string_pretty(&vms).map_err(Error::backend)?;
        println!("{out}");
        return Ok(());
    }

    for vm in &vms {
        println!("{}", render(vm));
    }
    Ok(())
}

fn render(vm: &Vm) -> String {
    let locality = vm.locality().unwrap_or_else(|e| {
        warn!(vm = %vm.name, error = %e, "cannot derive locality");
        vm.zone.clone()
    });
    let expires = vm
        .expires_at()
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".into());

    let mut line = format!("{:<24} {:<8} {:<40} {}", vm.name, vm.provider, locality, expires);
    if !vm.is_valid() {
        let errors: Vec<String> = vm.errors.iter().map(ToString::to_string).collect();
        line.push_str(&format!("  [{}]", errors.join("; ")));
    }
    line
}

/// Create `names`, spread round-robin over the eligible providers.
pub async fn create(registry: &ProviderRegistry, names: Vec<String>, opts: CreateOpts) -> Result<()> {
    for name in &opts.vm_providers {
        registry.get(name)?;
    }
    let eligible: Vec<String> = registry
        .sorted_provider_names()
        .into_iter()
        .filter(|p| opts.eligible(p))
        .collect();
    if eligible.is_empty() {
        return Err(Error::InvalidConfig("no eligible VM providers".into()));
    }

    let batches = Arc::new(assign_round_robin(&names, &eligible));
    let targets: Vec<String> = batches.keys().cloned().collect();
    let opts = Arc::new(opts);

    registry
        .providers_parallel(&targets, move |p| {
            let batches = Arc::clone(&batches);
            let opts = Arc::clone(&opts);
            async move {
                let names = batches.get(p.name()).cloned().unwrap_or_default();
                p.create(&names, &opts).await
            }
        })
        .await?;

    info!(count = names.len(), providers = ?targets, "vms created");
    Ok(())
}

/// Deal `names` out to `providers` in turn. Providers that receive nothing
/// are left out.
pub fn assign_round_robin(names: &[String], providers: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut batches: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if providers.is_empty() {
        return batches;
    }
    for (i, name) in names.iter().enumerate() {
        let provider = &providers[i % providers.len()];
        batches.entry(provider.clone()).or_default().push(name.clone());
    }
    batches
}

/// The VMs in `all` named by `names`, in the order given.
pub fn select(all: &List, names: &[String]) -> Result<List> {
    let by_name: HashMap<&str, &Vm> = all.iter().map(|vm| (vm.name.as_str(), vm)).collect();
    names
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .map(|vm| (*vm).clone())
                .ok_or_else(|| Error::UnknownVm(name.clone()))
        })
        .collect::<Result<Vec<Vm>>>()
        .map(List::from)
}

/// Add `extra` to the lifetime of every named VM.
pub async fn extend(registry: &ProviderRegistry, names: &[String], extra: Duration) -> Result<()> {
    let targets = select(&registry.list_all().await?, names)?;

    registry
        .fan_out(targets, move |p, vms| async move {
            // VMs with the same current lifetime share one provider call.
            let mut by_lifetime: BTreeMap<Duration, List> = BTreeMap::new();
            for vm in vms {
                by_lifetime.entry(vm.lifetime).or_default().push(vm);
            }
            for (lifetime, batch) in by_lifetime {
                p.extend(&batch, lifetime.saturating_add(extra)).await?;
            }
            Ok::<(), Error>(())
        })
        .await?;

    info!(count = names.len(), extra_secs = extra.as_secs(), "vms extended");
    Ok(())
}

pub async fn destroy(registry: &ProviderRegistry, names: &[String]) -> Result<()> {
    let targets = select(&registry.list_all().await?, names)?;

    registry
        .fan_out(targets, |p, vms| async move { p.delete(&vms).await })
        .await?;

    info!(count = names.len(), "vms destroyed");
    Ok(())
}

pub async fn whoami(registry: &ProviderRegistry) -> Result<String> {
    ActiveAccount::new(registry.clone()).resolve().await
}

pub async fn ssh_config(registry: &ProviderRegistry, clean: bool) -> Result<()> {
    let names = registry.sorted_provider_names();
    if clean {
        registry
            .providers_parallel(&names, |p| async move { p.clean_ssh().await })
            .await?;
    } else {
        registry
            .providers_parallel(&names, |p| async move { p.config_ssh().await })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_infra::local::{self, LocalProvider};

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn local_registry() -> ProviderRegistry {
        ProviderRegistry::builder()
            .register(Arc::new(LocalProvider::new()))
            .build()
    }

    #[test]
    fn test_assign_round_robin() {
        let batches = assign_round_robin(&strings(&["n1", "n2", "n3"]), &strings(&["aws", "gce"]));
        assert_eq!(batches["aws"], strings(&["n1", "n3"]));
        assert_eq!(batches["gce"], strings(&["n2"]));

        let batches = assign_round_robin(&strings(&["n1"]), &strings(&["aws", "gce"]));
        assert!(!batches.contains_key("gce"));
        assert!(assign_round_robin(&strings(&["n1"]), &[]).is_empty());
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let all: List = vec![Vm::new("a", "aws", "z-a"), Vm::new("b", "gce", "z-b")].into();

        let picked = select(&all, &strings(&["b", "a"])).expect("both exist");
        assert_eq!(picked.names(), strings(&["b", "a"]));

        let err = select(&all, &strings(&["c"])).expect_err("c does not exist");
        assert!(matches!(err, Error::UnknownVm(ref name) if name == "c"));
    }

    #[test]
    fn test_render_flags_invalid_vm() {
        let mut vm = Vm::new("n1", "fly", "iad");
        vm.errors.push(vm_infra::VmError::BadNetwork);
        let line = render(&vm);
        assert!(line.starts_with("n1"));
        assert!(line.contains("could not determine network information"));
    }

    #[tokio::test]
    async fn test_create_extend_destroy_locally() {
        let registry = local_registry();
        let opts = CreateOpts {
            lifetime: Duration::from_secs(3600),
            ..CreateOpts::default()
        };

        create(&registry, strings(&["n2", "n1"]), opts).await.expect("create");
        let all = registry.list_all().await.expect("list");
        assert_eq!(all.names(), strings(&["n1", "n2"]));

        extend(&registry, &strings(&["n1"]), Duration::from_secs(1800))
            .await
            .expect("extend");
        let all = registry.list_all().await.expect("list");
        assert_eq!(all[0].lifetime, Duration::from_secs(5400));
        assert_eq!(all[1].lifetime, Duration::from_secs(3600));

        destroy(&registry, &strings(&["n2"])).await.expect("destroy");
        assert_eq!(registry.list_all().await.expect("list").names(), strings(&["n1"]));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_allowlist_entry() {
        let registry = local_registry();
        let opts = CreateOpts {
            vm_providers: strings(&["nimbus"]),
            ..CreateOpts::default()
        };

        let err = create(&registry, strings(&["n1"]), opts)
            .await
            .expect_err("nimbus is not registered");
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_destroy_unknown_vm() {
        let registry = local_registry();
        let err = destroy(&registry, &strings(&["ghost"]))
            .await
            .expect_err("ghost does not exist");
        assert!(matches!(err, Error::UnknownVm(_)));
    }

    #[tokio::test]
    async fn test_whoami_without_opinions() {
        let err = whoami(&local_registry()).await.expect_err("local has no account");
        assert!(matches!(err, Error::NoActiveAccounts));
        ssh_config(&local_registry(), false).await.expect("local ssh is a no-op");
        assert!(local_registry().get(local::PROVIDER_NAME).is_ok());
    }
}
