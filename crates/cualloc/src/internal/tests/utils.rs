use crate::internal::common::ids::{ClientId, CuRef, DeviceId};
use crate::internal::core::Core;
use crate::internal::inventory::Inventory;
use crate::internal::inventory::cu::{CuDescriptor, CuDescriptorBuilder, Scope};
use crate::internal::inventory::device::ImageUuid;
use crate::internal::inventory::load::LoadAmount;
use crate::internal::request::{CuListRequest, CuRequest};

pub const CLIENT: ClientId = ClientId::new(1);

#[allow(unused)]
pub fn enable_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn cu(name: &str) -> CuDescriptorBuilder {
    CuDescriptorBuilder::default().kernel_name(name)
}

pub fn rq<A: Into<LoadAmount>>(name: &str, load: A) -> CuRequest {
    CuRequest::shared(name, load)
}

pub fn list(entries: Vec<CuRequest>) -> CuListRequest {
    CuListRequest::new(entries, false)
}

pub fn same_device(entries: Vec<CuRequest>) -> CuListRequest {
    CuListRequest::new(entries, true)
}

/// Devices get ids 0, 1, 2, ... in the order they are added.
#[derive(Default)]
pub struct CoreBuilder {
    devices: Vec<(ImageUuid, Vec<CuDescriptor>)>,
}

impl CoreBuilder {
    /// Device with full-capacity compute units of the given kernel names
    pub fn device(self, cus: &[&str]) -> Self {
        self.device_with("image", cus.iter().map(|name| cu(name)).collect())
    }

    pub fn device_with(mut self, image_uuid: &str, cus: Vec<CuDescriptorBuilder>) -> Self {
        self.devices.push((
            ImageUuid::new(image_uuid),
            cus.into_iter().map(|b| b.build().unwrap()).collect(),
        ));
        self
    }

    pub fn build(self) -> Core {
        let mut inventory = Inventory::default();
        for (idx, (image_uuid, cus)) in self.devices.into_iter().enumerate() {
            inventory
                .add_device(DeviceId::new(idx as u32), image_uuid, cus)
                .unwrap();
        }
        Core::new(inventory)
    }
}

pub fn cu_ref(device_id: u32, cu_id: u32) -> CuRef {
    CuRef::new(device_id.into(), cu_id.into())
}

pub fn global_free(core: &Core, device_id: u32, cu_id: u32) -> LoadAmount {
    core.inventory()
        .cu(cu_ref(device_id, cu_id))
        .unwrap()
        .free_in(Scope::Global)
        .unwrap()
}

pub fn used_load(core: &Core, device_id: u32, cu_id: u32) -> LoadAmount {
    core.inventory()
        .cu(cu_ref(device_id, cu_id))
        .unwrap()
        .used_load()
}
