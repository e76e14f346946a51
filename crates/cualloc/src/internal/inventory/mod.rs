//! Authoritative record of loaded devices and their compute units.

pub mod cu;
pub mod device;
pub mod load;

use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{AllocServiceId, ChannelId, ClientId, CuRef, DeviceId};
use crate::internal::common::limits::MAX_NAME_LEN;
use crate::internal::inventory::cu::{Channel, ComputeUnit, CuDescriptor, LoadDemand, Scope};
use crate::internal::inventory::device::{Device, ImageUuid};
use crate::internal::request::CuRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Sorted by device id
    devices: Vec<Device>,
}

impl Inventory {
    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, device_id: DeviceId) -> Option<&Device> {
        self.devices
            .binary_search_by_key(&device_id, |d| d.device_id())
            .ok()
            .map(|idx| &self.devices[idx])
    }

    fn device_mut(&mut self, device_id: DeviceId) -> Option<&mut Device> {
        self.devices
            .binary_search_by_key(&device_id, |d| d.device_id())
            .ok()
            .map(|idx| &mut self.devices[idx])
    }

    pub fn cu(&self, cu_ref: CuRef) -> Option<&ComputeUnit> {
        self.device(cu_ref.device_id)?.cu(cu_ref.cu_id)
    }

    pub(crate) fn cu_mut(&mut self, cu_ref: CuRef) -> Option<&mut ComputeUnit> {
        self.device_mut(cu_ref.device_id)?.cu_mut(cu_ref.cu_id)
    }

    /// All compute units of enabled devices in the global (device, CU) order.
    pub fn active_cus(&self) -> impl Iterator<Item = (CuRef, &ComputeUnit)> {
        self.devices
            .iter()
            .filter(|d| d.is_enabled())
            .flat_map(|d| {
                d.cus()
                    .iter()
                    .map(move |cu| (CuRef::new(d.device_id(), cu.cu_id()), cu))
            })
    }

    /// CUs of enabled devices matching the request's identity and device, regardless of their load.
    pub fn find_candidates(&self, request: &CuRequest) -> Vec<CuRef> {
        self.active_cus()
            .filter(|(cu_ref, cu)| {
                request.device_id.is_none_or(|d| d == cu_ref.device_id) && cu.matches(request)
            })
            .map(|(cu_ref, _)| cu_ref)
            .collect()
    }

    pub fn add_device(
        &mut self,
        device_id: DeviceId,
        image_uuid: ImageUuid,
        cus: Vec<CuDescriptor>,
    ) -> crate::Result<()> {
        let position = match self
            .devices
            .binary_search_by_key(&device_id, |d| d.device_id())
        {
            Ok(_) => {
                return Err(AllocError::invalid(format!(
                    "Device {device_id} is already loaded"
                )));
            }
            Err(position) => position,
        };
        for desc in &cus {
            if desc.kernel_name.is_empty() {
                return Err(AllocError::invalid("Compute unit without a kernel name"));
            }
            if desc.kernel_name.len() > MAX_NAME_LEN || desc.kernel_alias.len() > MAX_NAME_LEN {
                return Err(AllocError::invalid(format!(
                    "Kernel name or alias of '{}' is too long",
                    desc.kernel_name
                )));
            }
            if desc.capacity.is_zero() {
                return Err(AllocError::invalid(format!(
                    "Compute unit '{}' has zero capacity",
                    desc.kernel_name
                )));
            }
        }
        log::info!(
            "Device {device_id} loaded with image {image_uuid} ({} compute units)",
            cus.len()
        );
        self.devices
            .insert(position, Device::new(device_id, image_uuid, cus));
        Ok(())
    }

    pub fn remove_device(&mut self, device_id: DeviceId) -> crate::Result<Device> {
        let idx = self
            .devices
            .binary_search_by_key(&device_id, |d| d.device_id())
            .map_err(|_| AllocError::DeviceNotLoaded(device_id))?;
        if !self.devices[idx].is_idle() {
            return Err(AllocError::DeviceBusy(device_id));
        }
        log::info!("Device {device_id} unloaded");
        Ok(self.devices.remove(idx))
    }

    pub fn set_device_enabled(&mut self, device_id: DeviceId, enabled: bool) -> crate::Result<()> {
        let device = self
            .device_mut(device_id)
            .ok_or(AllocError::DeviceNotLoaded(device_id))?;
        if !enabled && !device.is_idle() {
            return Err(AllocError::DeviceBusy(device_id));
        }
        log::info!(
            "Device {device_id} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        device.set_enabled(enabled);
        Ok(())
    }

    /// Claims load on one CU. Fails if the CU cannot hold the demand.
    pub(crate) fn reserve_load(
        &mut self,
        cu_ref: CuRef,
        scope: Scope,
        demand: LoadDemand,
        alloc_service_id: AllocServiceId,
        client_id: ClientId,
    ) -> crate::Result<Channel> {
        let cu = self
            .cu_mut(cu_ref)
            .ok_or(AllocError::DeviceNotLoaded(cu_ref.device_id))?;
        cu.claim(scope, demand, alloc_service_id, client_id)
            .cloned()
    }

    /// Frees the channel; returns it so the caller knows how much load was freed.
    pub(crate) fn release_load(
        &mut self,
        cu_ref: CuRef,
        channel_id: ChannelId,
    ) -> crate::Result<Channel> {
        self.cu_mut(cu_ref)
            .and_then(|cu| cu.release_channel(channel_id))
            .ok_or_else(|| {
                AllocError::invalid(format!("Channel {channel_id} on CU {cu_ref} is not in use"))
            })
    }

    #[cfg(debug_assertions)]
    pub fn validate(&self) {
        for pair in self.devices.windows(2) {
            assert!(pair[0].device_id() < pair[1].device_id());
        }
        for device in &self.devices {
            for cu in device.cus() {
                cu.validate();
            }
        }
    }
}
