use crate::internal::common::ids::{CuId, DeviceId};
use crate::internal::inventory::cu::{ComputeUnit, CuDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identity of the image (bitstream) loaded on a device. Opaque for the engine.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageUuid(String);

impl ImageUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        ImageUuid(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImageUuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    device_id: DeviceId,
    image_uuid: ImageUuid,
    enabled: bool,
    cus: Vec<ComputeUnit>,
}

impl Device {
    pub fn new(device_id: DeviceId, image_uuid: ImageUuid, cus: Vec<CuDescriptor>) -> Self {
        Device {
            device_id,
            image_uuid,
            enabled: true,
            cus: cus
                .into_iter()
                .enumerate()
                .map(|(i, desc)| ComputeUnit::new(CuId::new(i as u32), desc))
                .collect(),
        }
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    #[inline]
    pub fn image_uuid(&self) -> &ImageUuid {
        &self.image_uuid
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn cus(&self) -> &[ComputeUnit] {
        &self.cus
    }

    #[inline]
    pub fn cu(&self, cu_id: CuId) -> Option<&ComputeUnit> {
        self.cus.get(cu_id.as_num() as usize)
    }

    #[inline]
    pub(crate) fn cu_mut(&mut self, cu_id: CuId) -> Option<&mut ComputeUnit> {
        self.cus.get_mut(cu_id.as_num() as usize)
    }

    /// No channel and no pool slice lives on any CU of the device.
    pub fn is_idle(&self) -> bool {
        self.cus.iter().all(|cu| cu.is_idle())
    }
}
