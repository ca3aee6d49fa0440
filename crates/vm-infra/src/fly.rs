use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::types::{CreateOpts, List, Vm, VmError};
use crate::{Error, Provider, ProviderFlags, Result};

pub const PROVIDER_NAME: &str = "fly";

/// Machine metadata key holding the lifetime in whole seconds.
const LIFETIME_KEY: &str = "lifetime_secs";
const MANAGED_BY_KEY: &str = "managed_by";
const MANAGED_BY: &str = "vm-infra";

/// Fly regions have no zones, so every machine sits in the region's single
/// implicit zone `<region>-a`.
const IMPLICIT_ZONE: &str = "a";

/// Regions used when a create asks for geo-distribution.
const GEO_REGIONS: [&str; 3] = ["iad", "ord", "sjc"];

/// Fly.io Machines provider.
///
/// Delegates to `fly_api::FlyClient` for all HTTP calls. Machines are
/// reached through the Fly proxy, so there is no local SSH config to manage.
pub struct FlyProvider {
    client: fly_api::FlyClient,
    image: String,
    flags: FlyFlags,
}

/// `--fly-region` for the create command.
pub struct FlyFlags {
    region: RwLock<String>,
}

impl FlyFlags {
    fn region(&self) -> Result<String> {
        self.region
            .read()
            .map(|region| region.clone())
            .map_err(|_| Error::InvalidConfig("fly region lock poisoned".into()))
    }
}

impl ProviderFlags for FlyFlags {
    fn configure_create_flags(&self, cmd: clap::Command) -> clap::Command {
        let default = self.region().unwrap_or_default();
        cmd.arg(
            clap::Arg::new("fly-region")
                .long("fly-region")
                .value_name("REGION")
                .help(format!("Fly.io region for new machines [default: {default}]")),
        )
    }

    fn apply_create_flags(&self, matches: &clap::ArgMatches) -> Result<()> {
        let Some(region) = matches.get_one::<String>("fly-region") else {
            return Ok(());
        };
        let mut current = self
            .region
            .write()
            .map_err(|_| Error::InvalidConfig("fly region lock poisoned".into()))?;
        *current = region.clone();
        Ok(())
    }
}

impl FlyProvider {
    /// Create from env vars: `FLY_API_TOKEN` (required), `FLY_APP_NAME`,
    /// `FLY_REGION`, `FLY_IMAGE`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("FLY_API_TOKEN")
            .map_err(|_| Error::MissingEnv("FLY_API_TOKEN".into()))?;
        let app = std::env::var("FLY_APP_NAME").unwrap_or_else(|_| "vm-fleet".into());
        let region = std::env::var("FLY_REGION").unwrap_or_else(|_| "iad".into());
        let image = std::env::var("FLY_IMAGE").unwrap_or_else(|_| "ubuntu:24.04".into());

        Ok(Self::new(fly_api::FlyClient::new(token, app), region, image))
    }

    pub fn new(client: fly_api::FlyClient, region: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            client,
            image: image.into(),
            flags: FlyFlags {
                region: RwLock::new(region.into()),
            },
        }
    }

    /// Pick a region for each name: the configured one, or round-robin over
    /// [`GEO_REGIONS`] when geo-distributing.
    fn placements<'a>(names: &'a [String], region: &str, geo: bool) -> Vec<(&'a str, String)> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let region = if geo {
                    GEO_REGIONS[i % GEO_REGIONS.len()].to_owned()
                } else {
                    region.to_owned()
                };
                (name.as_str(), region)
            })
            .collect()
    }

    fn zone_of(region: &str) -> String {
        format!("{region}-{IMPLICIT_ZONE}")
    }

    fn to_vm(machine: fly_api::Machine, app: &str) -> Vm {
        let mut vm = Vm::new(machine.name, PROVIDER_NAME, Self::zone_of(&machine.region));
        vm.dns = format!("{}.vm.{app}.internal", machine.id);

        let lifetime = machine
            .config
            .metadata
            .get(LIFETIME_KEY)
            .and_then(|secs| secs.parse::<u64>().ok());
        match (machine.created_at, lifetime) {
            (Some(created_at), Some(secs)) => {
                vm.created_at = created_at;
                vm.lifetime = Duration::from_secs(secs);
            }
            _ => vm.errors.push(VmError::NoExpiration),
        }

        match machine.private_ip {
            Some(ip) if !ip.is_empty() => vm.private_ip = ip,
            _ => vm.errors.push(VmError::BadNetwork),
        }
        if vm.name.is_empty() {
            vm.errors.push(VmError::InvalidName);
        }
        vm
    }

    /// Machine IDs for `vms`, failing on any VM Fly does not know about.
    async fn machine_ids(&self, vms: &List) -> Result<Vec<String>> {
        let by_name: HashMap<String, String> = self
            .client
            .list_machines()
            .await?
            .into_iter()
            .filter(|m| !m.is_destroyed())
            .map(|m| (m.name, m.id))
            .collect();

        vms.iter()
            .map(|vm| {
                by_name
                    .get(&vm.name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownVm(vm.name.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl Provider for FlyProvider {
    async fn clean_ssh(&self) -> Result<()> {
        debug!("fly: machines use the fly proxy, no ssh config to clean");
        Ok(())
    }

    async fn config_ssh(&self) -> Result<()> {
        debug!("fly: machines use the fly proxy, no ssh config needed");
        Ok(())
    }

    async fn create(&self, names: &[String], opts: &CreateOpts) -> Result<()> {
        if opts.use_local_ssd {
            warn!("fly: local SSDs are not available, using the root volume");
        }
        let region = self.flags.region()?;
        let metadata = HashMap::from([
            (LIFETIME_KEY.to_owned(), opts.lifetime.as_secs().to_string()),
            (MANAGED_BY_KEY.to_owned(), MANAGED_BY.to_owned()),
        ]);

        for (name, region) in Self::placements(names, &region, opts.geo_distributed) {
            let machine = self
                .client
                .create_machine(&fly_api::CreateMachineRequest {
                    name: name.to_owned(),
                    region,
                    config: fly_api::MachineConfig {
                        image: self.image.clone(),
                        guest: fly_api::GuestConfig {
                            cpus: 1,
                            cpu_kind: "shared".into(),
                            memory_mb: 1024,
                        },
                        metadata: metadata.clone(),
                        auto_destroy: Some(false),
                    },
                })
                .await?;

            info!(machine_id = %machine.id, region = %machine.region, "fly: machine created");
        }
        Ok(())
    }

    async fn delete(&self, vms: &List) -> Result<()> {
        for id in self.machine_ids(vms).await? {
            self.client.delete_machine(&id).await?;
            info!(machine_id = %id, "fly: machine destroyed");
        }
        Ok(())
    }

    async fn extend(&self, vms: &List, lifetime: Duration) -> Result<()> {
        let secs = lifetime.as_secs().to_string();
        for id in self.machine_ids(vms).await? {
            self.client.set_metadata(&id, LIFETIME_KEY, &secs).await?;
            info!(machine_id = %id, lifetime_secs = %secs, "fly: machine extended");
        }
        Ok(())
    }

    async fn find_active_account(&self) -> Result<String> {
        let app = self.client.get_app().await?;
        Ok(app.organization.slug)
    }

    fn flags(&self) -> &dyn ProviderFlags {
        &self.flags
    }

    async fn list(&self) -> Result<List> {
        let app = self.client.app().to_owned();
        let machines = self.client.list_machines().await?;
        Ok(machines
            .into_iter()
            .filter(|m| !m.is_destroyed())
            .map(|m| Self::to_vm(m, &app))
            .collect())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
