//! Reading and editing VMware virtual machine descriptors (.vmx files)

pub mod builder;
pub mod error;
pub mod lock;
pub mod vmx;

pub use builder::{DiskInfo, NicInfo, VmInfo, VmxBuilder};
pub use error::VmxError;
pub use vmx::Vmx;
