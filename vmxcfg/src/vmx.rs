//! This module implements the VMware .vmx file format and allows reading, editing, and
//! writing vmx files with code.
//!
//! A vmx file is a flat list of `key = "value"` lines. Keys are case-insensitive and
//! device collections are spread over numbered keys such as `ethernet0.address`,
//! `scsi0:1.fileName` or `ide1:0.deviceType`. [`Vmx`] lifts the parts of the file this
//! crate edits into typed fields and keeps everything else verbatim so a
//! load/modify/store cycle never drops settings it does not understand.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    str::FromStr,
    sync::OnceLock,
};

use derive_builder::Builder;
use regex::Regex;

use crate::error::{Result, VmxError};

fn ethernet_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^ethernet(\d+)\.(.+)$").expect("ethernet key regex"))
}

fn scsi_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^scsi0:(\d+)\.(.+)$").expect("scsi key regex"))
}

fn ide_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^ide(\d+):(\d+)\.(.+)$").expect("ide key regex"))
}

/// How the MAC address of a network adapter is assigned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressType {
    /// Picked by the hypervisor
    Generated,
    /// Taken from the `address` key
    Static,
    /// Assigned by vCenter
    Vpx,
    Other(String),
}

impl Display for AddressType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AddressType::Generated => "generated",
                AddressType::Static => "static",
                AddressType::Vpx => "vpx",
                AddressType::Other(other) => other,
            }
        )
    }
}

impl From<&str> for AddressType {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "generated" => AddressType::Generated,
            "static" => AddressType::Static,
            "vpx" => AddressType::Vpx,
            _ => AddressType::Other(s.to_string()),
        }
    }
}

/// What backs an IDE device
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdeDeviceType {
    /// An ISO image file
    CdromImage,
    /// A physical drive of the host
    CdromRaw,
    AtapiCdrom,
    Other(String),
}

impl Display for IdeDeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                IdeDeviceType::CdromImage => "cdrom-image",
                IdeDeviceType::CdromRaw => "cdrom-raw",
                IdeDeviceType::AtapiCdrom => "atapi-cdrom",
                IdeDeviceType::Other(other) => other,
            }
        )
    }
}

impl From<&str> for IdeDeviceType {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cdrom-image" => IdeDeviceType::CdromImage,
            "cdrom-raw" => IdeDeviceType::CdromRaw,
            "atapi-cdrom" => IdeDeviceType::AtapiCdrom,
            _ => IdeDeviceType::Other(s.to_string()),
        }
    }
}

/// A virtual network adapter, `ethernetN.*`
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
#[builder(setter(into, strip_option), default)]
pub struct Ethernet {
    /// Whether the adapter exists in the guest
    pub present: Option<bool>,
    /// Host network the adapter is connected to
    pub network_name: Option<String>,
    /// MAC address, only honoured by the hypervisor for static addresses
    pub address: Option<String>,
    pub address_type: Option<AddressType>,
    /// Emulated device model, e.g. `vmxnet3` or `e1000`
    pub virtual_dev: Option<String>,
    pub connection_type: Option<String>,
    /// Sub-keys that are not modeled, without the `ethernetN.` prefix
    pub extra: Vec<(String, String)>,
}

impl Ethernet {
    fn set(&mut self, line: usize, field: &str, value: &str) -> Result<()> {
        match field.to_ascii_lowercase().as_str() {
            "present" => self.present = Some(parse_bool(line, value)?),
            "networkname" => self.network_name = Some(value.to_string()),
            "address" => self.address = Some(value.to_string()),
            "addresstype" => self.address_type = Some(AddressType::from(value)),
            "virtualdev" => self.virtual_dev = Some(value.to_string()),
            "connectiontype" => self.connection_type = Some(value.to_string()),
            _ => upsert(&mut self.extra, field, value),
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(present) = self.present {
            entries.push(("present".to_string(), fmt_bool(present)));
        }
        if let Some(network_name) = &self.network_name {
            entries.push(("networkName".to_string(), network_name.clone()));
        }
        if let Some(address) = &self.address {
            entries.push(("address".to_string(), address.clone()));
        }
        if let Some(address_type) = &self.address_type {
            entries.push(("addressType".to_string(), address_type.to_string()));
        }
        if let Some(virtual_dev) = &self.virtual_dev {
            entries.push(("virtualDev".to_string(), virtual_dev.clone()));
        }
        if let Some(connection_type) = &self.connection_type {
            entries.push(("connectionType".to_string(), connection_type.clone()));
        }
        entries.extend(self.extra.iter().cloned());
        entries
    }
}

/// A disk on the first SCSI controller, `scsi0:N.*`. The unit is the device's position
/// in [`Vmx::scsi_devices`].
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
#[builder(setter(into, strip_option), default)]
pub struct ScsiDevice {
    pub present: Option<bool>,
    /// Path to the backing vmdk
    pub file_name: Option<String>,
    /// Sub-keys that are not modeled, without the `scsi0:N.` prefix
    pub extra: Vec<(String, String)>,
}

impl ScsiDevice {
    fn set(&mut self, line: usize, field: &str, value: &str) -> Result<()> {
        match field.to_ascii_lowercase().as_str() {
            "present" => self.present = Some(parse_bool(line, value)?),
            "filename" => self.file_name = Some(value.to_string()),
            _ => upsert(&mut self.extra, field, value),
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(present) = self.present {
            entries.push(("present".to_string(), fmt_bool(present)));
        }
        if let Some(file_name) = &self.file_name {
            entries.push(("fileName".to_string(), file_name.clone()));
        }
        entries.extend(self.extra.iter().cloned());
        entries
    }
}

/// A device on one of the IDE buses, `ideB:U.*`
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
#[builder(setter(into, strip_option), default)]
pub struct IdeDevice {
    pub present: Option<bool>,
    pub file_name: Option<String>,
    pub device_type: Option<IdeDeviceType>,
    /// Whether the device is connected at power on
    pub start_connected: Option<bool>,
    pub extra: Vec<(String, String)>,
}

impl IdeDevice {
    fn set(&mut self, line: usize, field: &str, value: &str) -> Result<()> {
        match field.to_ascii_lowercase().as_str() {
            "present" => self.present = Some(parse_bool(line, value)?),
            "filename" => self.file_name = Some(value.to_string()),
            "devicetype" => self.device_type = Some(IdeDeviceType::from(value)),
            "startconnected" => self.start_connected = Some(parse_bool(line, value)?),
            _ => upsert(&mut self.extra, field, value),
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(present) = self.present {
            entries.push(("present".to_string(), fmt_bool(present)));
        }
        if let Some(file_name) = &self.file_name {
            entries.push(("fileName".to_string(), file_name.clone()));
        }
        if let Some(device_type) = &self.device_type {
            entries.push(("deviceType".to_string(), device_type.to_string()));
        }
        if let Some(start_connected) = self.start_connected {
            entries.push(("startConnected".to_string(), fmt_bool(start_connected)));
        }
        entries.extend(self.extra.iter().cloned());
        entries
    }
}

/// A parsed vmx file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vmx {
    /// Name shown by the hypervisor UI
    pub display_name: Option<String>,
    pub num_vcpus: Option<u32>,
    /// Guest memory in megabytes
    pub memsize: Option<u32>,
    /// Virtualized hardware assist (nested virtualization)
    pub vhv_enable: Option<bool>,
    /// Whether VMware tools keeps the guest clock in sync with the host
    pub tools_sync_time: Option<bool>,
    /// Set by the hypervisor once the guest completed an orderly shutdown
    pub clean_shutdown: Option<bool>,
    pub ethernet: Vec<Ethernet>,
    pub scsi_devices: Vec<ScsiDevice>,
    pub ide_devices: Vec<IdeDevice>,
    /// Every other key of the file, in file order with its original spelling
    pub passthrough: Vec<(String, String)>,
}

impl Vmx {
    /// Slot of the SCSI device at `index` once the file is stored
    pub fn scsi_slot(index: usize) -> String {
        format!("scsi0:{}", index)
    }

    /// Slot of the IDE device at `index` once the file is stored
    pub fn ide_slot(index: usize) -> String {
        format!("ide{}:{}", index / 2, index % 2)
    }

    /// Look up a passthrough key, ignoring case
    pub fn get(&self, key: &str) -> Option<&str> {
        self.passthrough
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a passthrough key, ignoring case
    pub fn set(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        upsert(&mut self.passthrough, key.as_ref(), value.as_ref());
    }

    /// Every key/value pair of the file in output order
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = self.passthrough.clone();
        if let Some(display_name) = &self.display_name {
            entries.push(("displayName".to_string(), display_name.clone()));
        }
        if let Some(num_vcpus) = self.num_vcpus {
            entries.push(("numvcpus".to_string(), num_vcpus.to_string()));
        }
        if let Some(memsize) = self.memsize {
            entries.push(("memsize".to_string(), memsize.to_string()));
        }
        if let Some(vhv_enable) = self.vhv_enable {
            entries.push(("vhv.enable".to_string(), fmt_bool(vhv_enable)));
        }
        if let Some(sync_time) = self.tools_sync_time {
            entries.push(("tools.syncTime".to_string(), fmt_bool(sync_time)));
        }
        if let Some(clean_shutdown) = self.clean_shutdown {
            entries.push(("cleanShutdown".to_string(), fmt_bool(clean_shutdown)));
        }
        for (i, ethernet) in self.ethernet.iter().enumerate() {
            for (field, value) in ethernet.entries() {
                entries.push((format!("ethernet{}.{}", i, field), value));
            }
        }
        for (i, device) in self.scsi_devices.iter().enumerate() {
            let slot = Vmx::scsi_slot(i);
            for (field, value) in device.entries() {
                entries.push((format!("{}.{}", slot, field), value));
            }
        }
        for (i, device) in self.ide_devices.iter().enumerate() {
            let slot = Vmx::ide_slot(i);
            for (field, value) in device.entries() {
                entries.push((format!("{}.{}", slot, field), value));
            }
        }
        entries
    }

    /// Serialize to vmx text, refusing keys and values the format cannot carry
    pub fn encode(&self) -> Result<String> {
        for (key, value) in self.entries() {
            if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
                return Err(VmxError::Serialize(format!("invalid key '{}'", key)));
            }
            if value.contains(['"', '\r', '\n']) {
                return Err(VmxError::Serialize(format!(
                    "value of '{}' contains a quote or line break",
                    key
                )));
            }
        }
        Ok(self.to_string())
    }
}

impl Display for Vmx {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (key, value) in self.entries() {
            writeln!(f, "{} = \"{}\"", key, value)?;
        }
        Ok(())
    }
}

/// Devices collected while reading, keyed so that iteration yields load order
#[derive(Default)]
struct Loader {
    vmx: Vmx,
    ethernet: BTreeMap<u32, Ethernet>,
    scsi: BTreeMap<u32, ScsiDevice>,
    ide: BTreeMap<(u32, u32), IdeDevice>,
}

impl Loader {
    fn entry(&mut self, line: usize, key: &str, value: &str) -> Result<()> {
        if let Some(caps) = ethernet_key().captures(key) {
            let index = parse_u32(line, &caps[1])?;
            return self.ethernet.entry(index).or_default().set(line, &caps[2], value);
        }
        if let Some(caps) = scsi_key().captures(key) {
            let unit = parse_u32(line, &caps[1])?;
            return self.scsi.entry(unit).or_default().set(line, &caps[2], value);
        }
        if let Some(caps) = ide_key().captures(key) {
            let bus = parse_u32(line, &caps[1])?;
            let unit = parse_u32(line, &caps[2])?;
            return self.ide.entry((bus, unit)).or_default().set(line, &caps[3], value);
        }

        let vmx = &mut self.vmx;
        match key.to_ascii_lowercase().as_str() {
            "displayname" => vmx.display_name = Some(value.to_string()),
            "numvcpus" => vmx.num_vcpus = Some(parse_u32(line, value)?),
            "memsize" => vmx.memsize = Some(parse_u32(line, value)?),
            "vhv.enable" => vmx.vhv_enable = Some(parse_bool(line, value)?),
            "tools.synctime" => vmx.tools_sync_time = Some(parse_bool(line, value)?),
            "cleanshutdown" => vmx.clean_shutdown = Some(parse_bool(line, value)?),
            _ => vmx.set(key, value),
        }
        Ok(())
    }

    fn finish(self) -> Vmx {
        Vmx {
            ethernet: self.ethernet.into_values().collect(),
            scsi_devices: self.scsi.into_values().collect(),
            ide_devices: self.ide.into_values().collect(),
            ..self.vmx
        }
    }
}

impl FromStr for Vmx {
    type Err = VmxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut loader = Loader::default();
        for (i, raw) in s.lines().enumerate() {
            let line = i + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let (key, value) = split_line(line, text)?;
            loader.entry(line, key, value)?;
        }
        Ok(loader.finish())
    }
}

fn split_line(line: usize, text: &str) -> Result<(&str, &str)> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| VmxError::parse(line, format!("expected 'key = value', got '{}'", text)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(VmxError::parse(line, "missing key"));
    }
    let value = value.trim();
    let value = match value.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .ok_or_else(|| VmxError::parse(line, format!("unterminated value for '{}'", key)))?,
        None => value,
    };
    if value.contains('"') {
        return Err(VmxError::parse(line, format!("stray quote in value of '{}'", key)));
    }
    Ok((key, value))
}

fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: &str) {
    match entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        Some(entry) => entry.1 = value.to_string(),
        None => entries.push((key.to_string(), value.to_string())),
    }
}

fn parse_u32(line: usize, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| VmxError::parse(line, format!("'{}' is not a number", value)))
}

fn parse_bool(line: usize, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(VmxError::parse(line, format!("'{}' is not a boolean", value))),
    }
}

fn fmt_bool(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_string()
}

#[cfg(test)]
const STEMCELL_VMX: &str = r#".encoding = "UTF-8"
config.version = "8"
virtualHW.version = "14"
displayName = "cs-abc"
numvcpus = "1"
memsize = "512"
scsi0.present = "TRUE"
scsi0.virtualDev = "lsilogic"
scsi0:0.present = "TRUE"
scsi0:0.fileName = "disk-0.vmdk"
ethernet0.present = "TRUE"
ethernet0.addressType = "generated"
ethernet0.virtualDev = "e1000"
ethernet0.pciSlotNumber = "33"
tools.syncTime = "FALSE"
"#;

#[test]
fn test_parse_typed_fields() {
    let vmx: Vmx = STEMCELL_VMX.parse().unwrap();

    assert_eq!(vmx.display_name.as_deref(), Some("cs-abc"));
    assert_eq!(vmx.num_vcpus, Some(1));
    assert_eq!(vmx.memsize, Some(512));
    assert_eq!(vmx.tools_sync_time, Some(false));
    assert_eq!(vmx.vhv_enable, None);
    assert_eq!(vmx.ethernet.len(), 1);
    assert_eq!(vmx.ethernet[0].address_type, Some(AddressType::Generated));
    assert_eq!(
        vmx.ethernet[0].extra,
        vec![("pciSlotNumber".to_string(), "33".to_string())]
    );
    assert_eq!(vmx.scsi_devices.len(), 1);
    assert_eq!(vmx.scsi_devices[0].present, Some(true));
    assert_eq!(vmx.scsi_devices[0].file_name.as_deref(), Some("disk-0.vmdk"));
    assert_eq!(vmx.get("scsi0.virtualdev"), Some("lsilogic"));
    assert_eq!(vmx.passthrough[0].0, ".encoding");
}

#[test]
fn test_keys_are_case_insensitive() {
    let vmx: Vmx = "NUMVCPUS = \"4\"\nEthernet0.NetworkName = \"NetA\"\nScsi0:0.FILENAME = \"a.vmdk\"\n"
        .parse()
        .unwrap();

    assert_eq!(vmx.num_vcpus, Some(4));
    assert_eq!(vmx.ethernet[0].network_name.as_deref(), Some("NetA"));
    assert_eq!(vmx.scsi_devices[0].file_name.as_deref(), Some("a.vmdk"));
}

#[test]
fn test_round_trip() {
    let mut vmx: Vmx = STEMCELL_VMX.parse().unwrap();
    vmx.ide_devices.push(
        IdeDeviceBuilder::default()
            .present(true)
            .file_name("env.iso")
            .device_type(IdeDeviceType::CdromImage)
            .start_connected(true)
            .build()
            .unwrap(),
    );
    vmx.clean_shutdown = Some(true);

    let text = vmx.encode().unwrap();
    let reparsed: Vmx = text.parse().unwrap();

    assert_eq!(reparsed, vmx);
    assert_eq!(reparsed.to_string(), text);
}

#[cfg(test)]
fn scsi_files(vmx: &Vmx) -> Vec<&str> {
    vmx.scsi_devices
        .iter()
        .filter_map(|d| d.file_name.as_deref())
        .collect()
}

#[test]
fn test_scsi_devices_sorted_by_unit() {
    let vmx: Vmx = concat!(
        "scsi0:2.fileName = \"c.vmdk\"\n",
        "scsi0:10.fileName = \"k.vmdk\"\n",
        "scsi0:0.fileName = \"a.vmdk\"\n",
    )
    .parse()
    .unwrap();

    assert_eq!(scsi_files(&vmx), vec!["a.vmdk", "c.vmdk", "k.vmdk"]);
}

#[test]
fn test_many_disks_keep_their_units() {
    let text: String = (0..12)
        .map(|i| format!("scsi0:{}.fileName = \"d{}.vmdk\"\n", i, i))
        .collect();
    let expected: Vec<String> = (0..12).map(|i| format!("d{}.vmdk", i)).collect();

    let mut vmx: Vmx = text.parse().unwrap();
    for _ in 0..3 {
        assert_eq!(scsi_files(&vmx), expected);
        vmx = vmx.encode().unwrap().parse().unwrap();
    }
    assert_eq!(vmx.encode().unwrap(), text);
}

#[test]
fn test_collections_renumbered_on_store() {
    let mut vmx: Vmx = concat!(
        "ethernet0.networkName = \"a\"\n",
        "ethernet1.networkName = \"b\"\n",
        "ethernet2.networkName = \"c\"\n",
        "scsi0:0.fileName = \"root.vmdk\"\n",
        "scsi0:3.fileName = \"data.vmdk\"\n",
    )
    .parse()
    .unwrap();
    vmx.ethernet.remove(1);

    let text = vmx.encode().unwrap();

    assert!(text.contains("ethernet1.networkName = \"c\""));
    assert!(!text.contains("ethernet2"));
    assert!(text.contains("scsi0:1.fileName = \"data.vmdk\""));
    assert!(!text.contains("scsi0:3"));
}

#[test]
fn test_other_scsi_controllers_pass_through() {
    let vmx: Vmx = "scsi1:0.fileName = \"other.vmdk\"\n".parse().unwrap();

    assert!(vmx.scsi_devices.is_empty());
    assert_eq!(vmx.get("scsi1:0.fileName"), Some("other.vmdk"));
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        "numvcpus \"2\"".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        "a = \"1\"\n = \"2\"".parse::<Vmx>(),
        Err(VmxError::Parse { line: 2, .. })
    ));
    assert!(matches!(
        "displayName = \"oops".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        "memsize = \"lots\"".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        "ethernet0.present = \"maybe\"".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
}

#[test]
fn test_comments_and_unquoted_values() {
    let vmx: Vmx = "# comment\n\nmemsize = 1024\n".parse().unwrap();

    assert_eq!(vmx.memsize, Some(1024));
    assert_eq!(vmx.to_string(), "memsize = \"1024\"\n");
}

#[test]
fn test_encode_rejects_quotes() {
    let vmx = Vmx {
        display_name: Some("say \"hi\"".to_string()),
        ..Default::default()
    };

    assert!(matches!(vmx.encode(), Err(VmxError::Serialize(_))));
}

#[test]
fn test_constructed_devices_round_trip() {
    let vmx = Vmx {
        scsi_devices: vec![
            ScsiDevice {
                file_name: Some("root.vmdk".to_string()),
                ..Default::default()
            },
            ScsiDeviceBuilder::default()
                .present(true)
                .file_name("disk-1.vmdk")
                .build()
                .unwrap(),
        ],
        ethernet: vec![EthernetBuilder::default()
            .network_name("NetA")
            .build()
            .unwrap()],
        ..Default::default()
    };

    let text = vmx.encode().unwrap();

    assert!(!text.contains("scsi0:0.present"));
    assert!(!text.contains("ethernet0.present"));
    assert_eq!(text.parse::<Vmx>().unwrap(), vmx);
}

#[test]
fn test_absent_present_key_stays_absent() {
    let text = "ethernet0.networkName = \"NetA\"\nide1:0.fileName = \"env.iso\"\n";
    let vmx: Vmx = text.parse().unwrap();

    assert_eq!(vmx.ethernet[0].present, None);
    assert_eq!(vmx.ide_devices[0].present, None);
    assert_eq!(vmx.encode().unwrap(), "ethernet0.networkName = \"NetA\"\nide0:0.fileName = \"env.iso\"\n");
}

#[test]
fn test_quote_inside_value_rejected() {
    assert!(matches!(
        "a = \"x\"y\"".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
    assert!(matches!(
        "a = x\"y".parse::<Vmx>(),
        Err(VmxError::Parse { line: 1, .. })
    ));
}

#[test]
fn test_duplicate_keys_keep_last_value() {
    let vmx: Vmx = "guestOS = \"ubuntu\"\nGUESTOS = \"ubuntu-64\"\n".parse().unwrap();

    assert_eq!(vmx.passthrough, vec![("guestOS".to_string(), "ubuntu-64".to_string())]);
}
