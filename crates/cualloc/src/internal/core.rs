use crate::internal::common::Set;
use crate::internal::common::ids::{ChannelId, CuRef};
use crate::internal::groups::{GroupTemplate, GroupTemplateRegistry};
use crate::internal::inventory::Inventory;
use crate::internal::inventory::device::Device;
use crate::internal::pools::{PoolManager, ReservationPool};
use crate::internal::registry::AllocationRegistry;
use serde::{Deserialize, Serialize};

pub(crate) struct CoreSplitMut<'a> {
    pub inventory: &'a mut Inventory,
    pub pools: &'a mut PoolManager,
    pub registry: &'a mut AllocationRegistry,
    pub templates: &'a mut GroupTemplateRegistry,
}

/// Whole state of the allocation engine.
///
/// All operations are free functions taking `&Core` or `&mut Core`; the caller
/// decides how the core is shared between threads.
#[derive(Debug, Clone, Default)]
pub struct Core {
    inventory: Inventory,
    pools: PoolManager,
    registry: AllocationRegistry,
    templates: GroupTemplateRegistry,
}

/// Serializable view of the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub devices: Vec<Device>,
    pub pools: Vec<ReservationPool>,
    pub groups: Vec<GroupTemplate>,
    pub outstanding_allocations: usize,
}

impl Core {
    pub fn new(inventory: Inventory) -> Self {
        Core {
            inventory,
            ..Default::default()
        }
    }

    #[inline]
    pub(crate) fn split_mut(&mut self) -> CoreSplitMut<'_> {
        CoreSplitMut {
            inventory: &mut self.inventory,
            pools: &mut self.pools,
            registry: &mut self.registry,
            templates: &mut self.templates,
        }
    }

    #[inline]
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Device lifecycle (add/remove/enable) goes through here.
    #[inline]
    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    #[inline]
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    #[inline]
    pub fn registry(&self) -> &AllocationRegistry {
        &self.registry
    }

    #[inline]
    pub fn templates(&self) -> &GroupTemplateRegistry {
        &self.templates
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            devices: self.inventory.devices().to_vec(),
            pools: self.pools.pools().into_iter().cloned().collect(),
            groups: self.templates.templates().into_iter().cloned().collect(),
            outstanding_allocations: self.registry.len(),
        }
    }

    /// Checks that inventory, pools and registry agree with each other.
    pub fn sanity_check(&self) {
        #[cfg(debug_assertions)]
        self.inventory.validate();

        let mut channels: Set<(CuRef, ChannelId)> = Set::new();
        for record in self.registry.records() {
            assert!(channels.insert((record.cu_ref(), record.channel_id)));
            let cu = self.inventory.cu(record.cu_ref()).unwrap();
            let channel = cu
                .channels()
                .iter()
                .find(|c| c.channel_id == record.channel_id)
                .unwrap();
            assert_eq!(channel.alloc_service_id, record.alloc_service_id);
            assert_eq!(channel.load, record.load);
            assert_eq!(channel.pool_id, record.pool_id);
            assert_eq!(channel.exclusive, record.exclusive);
        }
        let mut slice_count = 0;
        for (cu_ref, cu) in self
            .inventory
            .devices()
            .iter()
            .flat_map(|d| d.cus().iter().map(move |cu| (CuRef::new(d.device_id(), cu.cu_id()), cu)))
        {
            for channel in cu.channels() {
                assert!(channels.contains(&(cu_ref, channel.channel_id)));
            }
            for slice in cu.slices() {
                let pool = self.pools.get(slice.pool_id).unwrap();
                assert!(pool.cus().binary_search(&cu_ref).is_ok());
                if !pool.is_active() {
                    assert_eq!(slice.reserved, slice.used);
                    assert!(!slice.used.is_zero());
                }
                slice_count += 1;
            }
        }
        assert_eq!(channels.len(), self.registry.records().count());
        let pool_cus: usize = self.pools.pools().iter().map(|p| p.cus().len()).sum();
        assert_eq!(pool_cus, slice_count);
    }
}
