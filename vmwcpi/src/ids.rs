//! CPI identifiers and the hypervisor names derived from them
//!
//! The director sees bare UUIDs; on the hypervisor every object carries a prefix
//! telling what it is.

use macaddr::MacAddr6;
use rand::Rng;
use uuid::Uuid;

pub const STEMCELL_PREFIX: &str = "cs-";
pub const VM_PREFIX: &str = "vm-";
pub const DISK_PREFIX: &str = "disk-";

pub fn new_cid() -> String {
    Uuid::new_v4().to_string()
}

pub fn stemcell_name(cid: &str) -> String {
    format!("{}{}", STEMCELL_PREFIX, cid)
}

pub fn vm_name(cid: &str) -> String {
    format!("{}{}", VM_PREFIX, cid)
}

pub fn disk_name(cid: &str) -> String {
    format!("{}{}", DISK_PREFIX, cid)
}

/// The cid of a disk name, `None` for anything that is not a persistent disk
pub fn disk_cid(name: &str) -> Option<&str> {
    name.strip_prefix(DISK_PREFIX)
}

/// A MAC in VMware's manually assigned range `00:50:56:00:00:00`-`00:50:56:3f:ff:ff`
pub fn generate_mac() -> MacAddr6 {
    let mut rng = rand::thread_rng();
    MacAddr6::new(
        0x00,
        0x50,
        0x56,
        rng.gen_range(0x00..0x40),
        rng.gen(),
        rng.gen(),
    )
}

/// Lower case, colon separated
pub fn format_mac(mac: &MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[test]
fn test_names() {
    let cid = new_cid();
    assert_eq!(cid.len(), 36);
    assert_eq!(vm_name(&cid), format!("vm-{}", cid));
    assert_eq!(disk_cid(&disk_name(&cid)), Some(cid.as_str()));
    assert_eq!(disk_cid("vm-1"), None);
    assert_eq!(stemcell_name("1"), "cs-1");
}

#[test]
fn test_generated_macs_stay_in_range() {
    for _ in 0..200 {
        let mac = generate_mac();
        let bytes = mac.as_bytes();
        assert_eq!(&bytes[..3], &[0x00, 0x50, 0x56]);
        assert!(bytes[3] < 0x40);

        let text = format_mac(&mac);
        assert!(text.starts_with("00:50:56:"));
        assert_eq!(text, text.to_lowercase());
        assert_eq!(text.len(), 17);
    }
}
