//! Cloud properties attached to stemcells, VM types, disks and networks

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    driver::BootstrapParams,
    error::{Error, Result, ValidationErrors},
    schema::{self, optional, required, Field, Kind},
};

const BOOTSTRAP_FIELDS: &[Field] = &[
    optional("script_content", Kind::String),
    optional("script_path", Kind::String),
    optional("interpreter_path", Kind::String),
    optional("ready_process_name", Kind::String),
    optional("username", Kind::String),
    optional("password", Kind::String),
    optional("min_wait_seconds", Kind::Unsigned),
    optional("max_wait_seconds", Kind::Unsigned),
];

const VM_FIELDS: &[Field] = &[
    optional("cpu", Kind::Unsigned),
    optional("ram", Kind::Unsigned),
    optional("disk", Kind::Unsigned),
    optional("bootstrap", Kind::Object(BOOTSTRAP_FIELDS)),
];

const NETWORK_FIELDS: &[Field] = &[required("name", Kind::String)];

/// Validate strictly and decode; `null` decodes to the defaults
fn decode<T: for<'de> Deserialize<'de>>(
    value: &Value,
    fields: &[Field],
    what: &str,
    lenient: bool,
) -> Result<T> {
    let mut errors = ValidationErrors::default();
    schema::check(value, fields, "", lenient, &mut errors);
    if !errors.is_empty() {
        return Err(Error::Validation {
            what: what.to_string(),
            errors,
        });
    }

    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    Ok(serde_json::from_value(value)?)
}

fn default_cpu() -> u32 {
    1
}

fn default_ram() -> u32 {
    1024
}

fn default_max_wait() -> u64 {
    600
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    #[serde(default)]
    pub script_content: String,
    #[serde(default)]
    pub script_path: String,
    #[serde(default)]
    pub interpreter_path: String,
    #[serde(default)]
    pub ready_process_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub min_wait_seconds: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            script_content: String::new(),
            script_path: String::new(),
            interpreter_path: String::new(),
            ready_process_name: String::new(),
            username: String::new(),
            password: String::new(),
            min_wait_seconds: 0,
            max_wait_seconds: default_max_wait(),
        }
    }
}

impl From<&Bootstrap> for BootstrapParams {
    fn from(bootstrap: &Bootstrap) -> Self {
        BootstrapParams {
            script_content: bootstrap.script_content.clone(),
            script_path: bootstrap.script_path.clone(),
            interpreter_path: bootstrap.interpreter_path.clone(),
            ready_process_name: bootstrap.ready_process_name.clone(),
            username: bootstrap.username.clone(),
            password: bootstrap.password.clone(),
            min_wait: Duration::from_secs(bootstrap.min_wait_seconds),
            max_wait: Duration::from_secs(bootstrap.max_wait_seconds),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VmCloudProperties {
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// MB
    #[serde(default = "default_ram")]
    pub ram: u32,
    /// Ephemeral disk size in MB, none when 0
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub bootstrap: Bootstrap,
}

impl VmCloudProperties {
    pub fn from_value(value: &Value) -> Result<Self> {
        decode(value, VM_FIELDS, "vm cloud properties", false)
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskCloudProperties {}

impl DiskCloudProperties {
    pub fn from_value(value: &Value) -> Result<Self> {
        decode(value, &[], "disk cloud properties", false)
    }
}

/// Comes from the stemcell manifest, so unknown fields are ignored
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StemcellCloudProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl StemcellCloudProperties {
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut value = value.clone();
        // versions are sometimes numbers in stemcell manifests
        if let Some(version) = value.get_mut("version") {
            if !version.is_string() && !version.is_null() {
                *version = Value::String(version.to_string());
            }
        }
        decode(
            &value,
            &[
                optional("name", Kind::String),
                optional("version", Kind::String),
            ],
            "stemcell cloud properties",
            true,
        )
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NetworkCloudProperties {
    /// Hypervisor network the adapter is connected to
    pub name: String,
}

impl NetworkCloudProperties {
    pub fn from_value(value: &Value) -> Result<Self> {
        decode(value, NETWORK_FIELDS, "network cloud properties", false)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_vm_defaults() {
        let props = VmCloudProperties::from_value(&json!({})).unwrap();
        assert_eq!(props.cpu, 1);
        assert_eq!(props.ram, 1024);
        assert_eq!(props.disk, 0);
        assert_eq!(props.bootstrap.max_wait_seconds, 600);
        assert!(!BootstrapParams::from(&props.bootstrap).enabled());

        assert_eq!(VmCloudProperties::from_value(&Value::Null).unwrap(), props);
    }

    #[test]
    fn test_vm_bootstrap() {
        let props = VmCloudProperties::from_value(&json!({
            "cpu": 2,
            "ram": 2048,
            "disk": 4096,
            "bootstrap": {
                "script_content": "ip link",
                "script_path": "/tmp/bootstrap.sh",
                "interpreter_path": "/bin/bash",
                "ready_process_name": "bosh-agent",
                "username": "vcap",
                "password": "c1oudc0w",
                "min_wait_seconds": 5
            }
        }))
        .unwrap();

        let params = BootstrapParams::from(&props.bootstrap);
        assert!(params.enabled());
        assert_eq!(params.min_wait, Duration::from_secs(5));
        assert_eq!(params.max_wait, Duration::from_secs(600));
    }

    #[test]
    fn test_vm_rejects_unknown() {
        match VmCloudProperties::from_value(&json!({"cpus": 2, "bootstrap": {"user": "x"}})) {
            Err(Error::Validation { errors, .. }) => {
                assert_eq!(errors.unknown, ["cpus", "bootstrap.user"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disk_and_stemcell() {
        assert!(DiskCloudProperties::from_value(&json!({})).is_ok());
        assert!(DiskCloudProperties::from_value(&json!({"type": "thin"})).is_err());

        let stemcell = StemcellCloudProperties::from_value(&json!({
            "name": "bosh-vsphere-esxi-ubuntu-jammy-go_agent",
            "version": 1.5,
            "infrastructure": "vsphere"
        }))
        .unwrap();
        assert_eq!(stemcell.version, "1.5");
    }

    #[test]
    fn test_network_requires_name() {
        assert_eq!(
            NetworkCloudProperties::from_value(&json!({"name": "NetA"}))
                .unwrap()
                .name,
            "NetA"
        );
        assert!(NetworkCloudProperties::from_value(&json!({})).is_err());
    }
}
