//! Wrappers for the hypervisor command line tools

pub mod govc;
pub mod ovftool;
pub mod vdiskmanager;
pub mod vmrun;

/// Login used for guest operations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuestCredentials {
    pub username: String,
    pub password: String,
}
