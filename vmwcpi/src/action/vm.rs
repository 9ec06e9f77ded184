use std::collections::BTreeMap;

use log::{debug, info};
use serde_json::Value;

use super::Cpi;
use crate::{
    agent::{AgentEnv, Network},
    cloudprops::{NetworkCloudProperties, VmCloudProperties},
    driver::{BootstrapParams, VmState},
    error::{Error, Result, WithContext},
    ids,
};

impl Cpi {
    pub(crate) async fn require_vm(&self, vm: &str) -> Result<()> {
        if self.driver.vm_exists(vm).await? {
            Ok(())
        } else {
            Err(Error::VmNotFound(vm.to_string()))
        }
    }

    /// Clone the stemcell, wire up networks, resources, ephemeral disk and agent
    /// settings, bootstrap if configured and boot
    pub(crate) async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_cid: &str,
        cloud_properties: &Value,
        mut networks: BTreeMap<String, Network>,
        env: Value,
    ) -> Result<Value> {
        let props = VmCloudProperties::from_value(cloud_properties)?;

        let mut adapters = Vec::new();
        for (name, network) in networks.iter_mut() {
            let target =
                NetworkCloudProperties::from_value(&Value::Object(network.cloud_properties.clone()))
                    .with_context(|| format!("network {}", name))?;
            let mac = match &network.mac {
                Some(mac) => mac.to_lowercase(),
                None => ids::format_mac(&ids::generate_mac()),
            };
            network.mac = Some(mac.clone());
            adapters.push((target.name, mac));
        }

        let stemcell = ids::stemcell_name(stemcell_cid);
        if !self.driver.vm_exists(&stemcell).await? {
            return Err(Error::InvalidArgument(format!(
                "stemcell {} not found",
                stemcell_cid
            )));
        }

        let cid = ids::new_cid();
        let vm = ids::vm_name(&cid);
        info!("Creating {} from {}", vm, stemcell);

        self.driver.clone_vm(&stemcell, &vm).await?;
        for (network, mac) in &adapters {
            self.driver
                .add_network_interface(&vm, network, mac)
                .await
                .with_context(|| format!("adding {} to {}", network, vm))?;
        }
        self.driver
            .set_resources(&vm, props.cpu, props.ram)
            .await
            .with_context(|| format!("sizing {}", vm))?;

        let mut agent_env = AgentEnv::new(agent_id, &cid, &vm, networks, env, &self.agent);
        if props.disk > 0 {
            self.driver.attach_ephemeral_disk(&vm, props.disk).await?;
            agent_env.set_ephemeral_disk();
        }
        self.driver
            .write_env_iso(&vm, &agent_env.to_iso()?)
            .await
            .with_context(|| format!("writing env iso of {}", vm))?;

        self.driver
            .bootstrap_vm(&vm, &BootstrapParams::from(&props.bootstrap))
            .await
            .with_context(|| format!("bootstrapping {}", vm))?;
        self.driver
            .start_vm(&vm)
            .await
            .with_context(|| format!("starting {}", vm))?;

        Ok(Value::String(cid))
    }

    pub(crate) async fn delete_vm(&self, vm_cid: &str) -> Result<Value> {
        let vm = ids::vm_name(vm_cid);
        self.driver
            .destroy_vm(&vm)
            .await
            .with_context(|| format!("deleting {}", vm))?;
        Ok(Value::Null)
    }

    pub(crate) async fn has_vm(&self, vm_cid: &str) -> Result<Value> {
        Ok(Value::Bool(self.driver.vm_exists(&ids::vm_name(vm_cid)).await?))
    }

    pub(crate) async fn reboot_vm(&self, vm_cid: &str) -> Result<Value> {
        let vm = ids::vm_name(vm_cid);
        self.require_vm(&vm).await?;
        self.driver.stop_vm(&vm).await?;
        self.driver.start_vm(&vm).await?;
        Ok(Value::Null)
    }

    /// Name the VM after its instance when readable names are enabled
    pub(crate) async fn set_vm_metadata(&self, vm_cid: &str, metadata: &Value) -> Result<Value> {
        let vm = ids::vm_name(vm_cid);
        self.require_vm(&vm).await?;

        if !self.human_readable_names {
            return Ok(Value::Null);
        }

        let name = match (
            metadata["name"].as_str(),
            metadata["job"].as_str(),
            metadata["index"].as_str(),
        ) {
            (Some(name), _, _) => Some(name.to_string()),
            (None, Some(job), Some(index)) => Some(format!("{}/{}", job, index)),
            _ => None,
        };

        match name {
            Some(name) => self.driver.set_display_name(&vm, &name).await?,
            None => debug!("No instance name in metadata of {}", vm),
        }
        Ok(Value::Null)
    }

    pub(crate) async fn is_running(&self, vm: &str) -> Result<bool> {
        Ok(self.driver.vm_state(vm).await? == VmState::PoweredOn)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vmxcfg::VmxBuilder;

    use crate::action::{rpc, tests::Fixture};

    #[tokio::test]
    async fn test_create_vm() {
        let fixture = Fixture::new(false);
        let cid = fixture
            .create_vm(json!({"cpu": 2, "ram": 2048, "disk": 4096}))
            .await;
        assert_eq!(cid.len(), 36);

        let info = VmxBuilder::new().info(&fixture.vmx(&cid)).unwrap();
        assert_eq!(info.cpus, 2);
        assert_eq!(info.memory_mb, 2048);
        assert_eq!(info.nics.len(), 1);
        assert_eq!(info.nics[0].network, "NetA");
        assert!(info.nics[0].mac.starts_with("00:50:56:"));
        assert_eq!(info.disks.len(), 2);

        let env = fixture.agent_env(&cid);
        assert_eq!(env.agent_id, "agent-1");
        assert_eq!(env.vm.id, cid);
        assert_eq!(env.vm.name, format!("vm-{}", cid));
        assert_eq!(env.disks.ephemeral.as_deref(), Some("/dev/sdb"));
        assert_eq!(
            env.networks["default"].mac.as_deref(),
            Some(info.nics[0].mac.as_str())
        );
        assert_eq!(env.env["bosh"]["group"], "test");

        let response = fixture.call("has_vm", json!([cid])).await;
        assert_eq!(response.result, json!(true));
        assert_eq!(fixture.runner.count(&["start"]), 1);
    }

    #[tokio::test]
    async fn test_create_vm_keeps_network_mac() {
        let fixture = Fixture::new(false);
        let stemcell = fixture.stemcell();
        let response = fixture
            .call(
                "create_vm",
                json!([
                    "agent-1",
                    stemcell,
                    {},
                    {"private": {"type": "dynamic", "mac": "00:11:22:33:44:55", "cloud_properties": {"name": "NetA"}}},
                    [],
                    {}
                ]),
            )
            .await;
        let cid = response.result.as_str().unwrap();

        let info = VmxBuilder::new().info(&fixture.vmx(cid)).unwrap();
        assert_eq!(info.nics[0].mac, "00:11:22:33:44:55");
        assert_eq!(info.cpus, 1);
        assert_eq!(info.memory_mb, 1024);
        assert_eq!(info.disks.len(), 1);
        assert_eq!(fixture.agent_env(cid).disks.ephemeral, None);
    }

    #[tokio::test]
    async fn test_create_vm_bad_properties() {
        let fixture = Fixture::new(false);
        let stemcell = fixture.stemcell();

        let response = fixture
            .call(
                "create_vm",
                json!(["agent-1", stemcell, {"cpus": 2}, {}, null, {}]),
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.kind, rpc::CPI_ERROR);
        assert!(error.message.contains("cpus"));

        let response = fixture
            .call(
                "create_vm",
                json!(["agent-1", "missing", {}, {"n": {"cloud_properties": {"name": "NetA"}}}, null, {}]),
            )
            .await;
        assert_eq!(response.error.unwrap().kind, rpc::CPI_ERROR);
        assert!(fixture.runner.calls().iter().all(|c| !c.has_arg("clone")));
    }

    #[tokio::test]
    async fn test_delete_vm_twice() {
        let fixture = Fixture::new(false);
        let cid = fixture.create_vm(json!({})).await;

        for _ in 0..2 {
            let response = fixture.call("delete_vm", json!([cid])).await;
            assert!(!response.is_error(), "{:?}", response.error);
        }
        assert_eq!(fixture.runner.count(&["stop", "hard"]), 1);
        assert_eq!(fixture.runner.count(&["deleteVM"]), 1);

        let response = fixture.call("has_vm", json!([cid])).await;
        assert_eq!(response.result, json!(false));
    }

    #[tokio::test]
    async fn test_reboot_vm() {
        let fixture = Fixture::new(false);
        let cid = fixture.create_vm(json!({})).await;

        let response = fixture.call("reboot_vm", json!([cid])).await;
        assert!(!response.is_error(), "{:?}", response.error);
        assert_eq!(fixture.runner.count(&["stop", "soft"]), 1);
        assert_eq!(fixture.runner.count(&["stop", "hard"]), 0);
        assert_eq!(fixture.runner.count(&["start"]), 2);

        let response = fixture.call("reboot_vm", json!(["missing"])).await;
        assert_eq!(response.error.unwrap().kind, rpc::VM_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_vm_metadata() {
        let fixture = Fixture::new(true);
        let cid = fixture.create_vm(json!({})).await;

        let response = fixture
            .call("set_vm_metadata", json!([cid, {"job": "web", "index": "0"}]))
            .await;
        assert!(!response.is_error());
        let vmx = VmxBuilder::new().load(&fixture.vmx(&cid)).unwrap();
        assert_eq!(vmx.display_name.as_deref(), Some("web/0"));

        fixture
            .call("set_vm_metadata", json!([cid, {"name": "web/5b7c"}]))
            .await;
        let vmx = VmxBuilder::new().load(&fixture.vmx(&cid)).unwrap();
        assert_eq!(vmx.display_name.as_deref(), Some("web/5b7c"));
    }

    #[tokio::test]
    async fn test_set_vm_metadata_disabled() {
        let fixture = Fixture::new(false);
        let cid = fixture.create_vm(json!({})).await;

        fixture
            .call("set_vm_metadata", json!([cid, {"name": "web/5b7c"}]))
            .await;
        let vmx = VmxBuilder::new().load(&fixture.vmx(&cid)).unwrap();
        assert_eq!(vmx.display_name.as_deref(), Some("stemcell"));
    }
}
