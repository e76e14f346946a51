use crate::internal::common::Map;
use crate::internal::common::ids::{
    AllocServiceId, ChannelId, ClientId, CuId, CuRef, DeviceId, PoolId, WrappingIdCounter,
};
use crate::internal::inventory::cu::{CuType, MemBank};
use crate::internal::inventory::device::ImageUuid;
use crate::internal::inventory::load::LoadAmount;
use serde::{Deserialize, Serialize};

/// Committed result of one leaf request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub device_id: DeviceId,
    pub cu_id: CuId,
    pub channel_id: ChannelId,
    pub kernel_name: String,
    pub kernel_alias: String,
    pub instance_name: String,
    pub cu_type: CuType,
    pub image_uuid: ImageUuid,
    pub base_address: u64,
    pub membank: MemBank,
    pub load: LoadAmount,
    pub exclusive: bool,
    pub alloc_service_id: AllocServiceId,
    pub pool_id: Option<PoolId>,
    pub client_id: ClientId,
}

impl AllocationRecord {
    #[inline]
    pub fn cu_ref(&self) -> CuRef {
        CuRef::new(self.device_id, self.cu_id)
    }
}

/// Which kind of request produced an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationOrigin {
    Cu,
    List,
    Group(String),
}

#[derive(Debug, Clone)]
pub(crate) struct AllocationEntry {
    pub origin: AllocationOrigin,
    pub client_id: ClientId,
    pub records: Vec<AllocationRecord>,
}

/// Outstanding allocations keyed by their allocation-service id.
#[derive(Debug, Clone, Default)]
pub struct AllocationRegistry {
    id_counter: WrappingIdCounter,
    entries: Map<AllocServiceId, AllocationEntry>,
}

impl AllocationRegistry {
    /// Never returns zero nor an id that is still outstanding.
    pub(crate) fn new_service_id(&mut self) -> AllocServiceId {
        let entries = &self.entries;
        AllocServiceId::new(
            self.id_counter
                .next(|id| entries.contains_key(&AllocServiceId::new(id))),
        )
    }

    pub(crate) fn insert(&mut self, alloc_service_id: AllocServiceId, entry: AllocationEntry) {
        debug_assert!(!entry.records.is_empty());
        let old = self.entries.insert(alloc_service_id, entry);
        debug_assert!(old.is_none());
    }

    pub(crate) fn remove(&mut self, alloc_service_id: AllocServiceId) -> Option<AllocationEntry> {
        self.entries.remove(&alloc_service_id)
    }

    /// Removes a single record; the whole entry disappears with its last record.
    pub(crate) fn remove_record(&mut self, record: &AllocationRecord) -> Option<AllocationRecord> {
        let entry = self.entries.get_mut(&record.alloc_service_id)?;
        let position = entry.records.iter().position(|r| {
            r.device_id == record.device_id
                && r.cu_id == record.cu_id
                && r.channel_id == record.channel_id
        })?;
        let removed = entry.records.remove(position);
        if entry.records.is_empty() {
            self.entries.remove(&record.alloc_service_id);
        }
        Some(removed)
    }

    /// Records of the allocation whose kernel name and alias match the filter.
    /// Empty filter fields match anything.
    pub fn query(
        &self,
        alloc_service_id: AllocServiceId,
        kernel_name: &str,
        kernel_alias: &str,
    ) -> Vec<AllocationRecord> {
        self.entries
            .get(&alloc_service_id)
            .map(|entry| {
                entry
                    .records
                    .iter()
                    .filter(|r| {
                        (kernel_name.is_empty() || r.kernel_name == kernel_name)
                            && (kernel_alias.is_empty() || r.kernel_alias == kernel_alias)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_template_in_use(&self, name: &str) -> bool {
        self.entries
            .values()
            .any(|e| matches!(&e.origin, AllocationOrigin::Group(n) if n == name))
    }

    pub fn has_pool_allocations(&self, pool_id: PoolId) -> bool {
        self.records().any(|r| r.pool_id == Some(pool_id))
    }

    /// Sorted so that recycling is deterministic
    pub(crate) fn service_ids_of_client(&self, client_id: ClientId) -> Vec<AllocServiceId> {
        let mut ids: Vec<AllocServiceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.client_id == client_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.entries.values().flat_map(|e| e.records.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
