//! Wire-format memory descriptors
//!
//! The descriptor is the tagged union other subsystems store in their plans and pass to this
//! crate. JSON is the text form:
//!
//! ```text
//! {"host_mem":{"pin":{"cuda_pinned":{"device_id":0}},"used_by_network":true}}
//! {"device_cuda_mem":{"device_id":1}}
//! {"fake_dev_mem":{}}
//! null                                   (unset: placement not decided)
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};

/// Tagged-union location descriptor; `case == None` is the unset descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryDescriptor {
    pub case: Option<MemoryCase>,
}

/// Populated variant of a [`MemoryDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCase {
    HostMem(HostMem),
    DeviceCudaMem { device_id: i32 },
    FakeDevMem {},
    DeviceAbcMem {},
    DeviceEnflameMem { device_id: i32 },
}

/// Host memory qualifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HostMem {
    /// Accelerator the memory is page-locked for; `None` for pageable memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<HostPin>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub used_by_network: bool,
}

/// Page-locking variants of host memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPin {
    CudaPinned { device_id: i32 },
    FakeDevPinned {},
    AbcPinned {},
    EnflamePinned { device_id: i32 },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl MemoryDescriptor {
    pub fn new(case: MemoryCase) -> Self {
        Self { case: Some(case) }
    }

    /// Descriptor of a buffer whose placement has not been decided
    pub fn unset() -> Self {
        Self::default()
    }

    /// Pageable host memory
    pub fn host() -> Self {
        Self::new(MemoryCase::HostMem(HostMem::default()))
    }

    /// Host memory with explicit qualifiers
    pub fn host_with(pin: Option<HostPin>, used_by_network: bool) -> Self {
        Self::new(MemoryCase::HostMem(HostMem { pin, used_by_network }))
    }

    pub fn case(&self) -> Option<&MemoryCase> {
        self.case.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.case.is_some()
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<MemoryCase> for MemoryDescriptor {
    fn from(case: MemoryCase) -> Self {
        Self::new(case)
    }
}
