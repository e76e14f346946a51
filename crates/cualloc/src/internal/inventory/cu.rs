use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{AllocServiceId, ChannelId, ClientId, CuId, PoolId};
use crate::internal::common::limits::{MAX_CU_CHANNELS, MAX_CU_RESERVES};
use crate::internal::inventory::load::LoadAmount;
use crate::internal::request::CuRequest;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CuType {
    IpKernel,
    SoftKernel,
}

/// Memory bank connected to a compute unit. Opaque for the engine.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemBank {
    pub id: u32,
    pub kind: u32,
    pub size: u64,
    pub base_address: u64,
}

/// Static description of a compute unit as reported by the image loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned")]
pub struct CuDescriptor {
    #[builder(setter(into))]
    pub kernel_name: String,
    #[builder(default, setter(into))]
    pub kernel_alias: String,
    #[builder(default, setter(into))]
    pub instance_name: String,
    #[builder(default = "CuType::IpKernel")]
    pub cu_type: CuType,
    #[builder(default = "LoadAmount::FULL", setter(into))]
    pub capacity: LoadAmount,
    #[builder(default)]
    pub base_address: u64,
    #[builder(default)]
    pub membank: MemBank,
}

/// One holder's share of a compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub load: LoadAmount,
    pub exclusive: bool,
    pub alloc_service_id: AllocServiceId,
    pub pool_id: Option<PoolId>,
    pub client_id: ClientId,
}

/// Capacity of a compute unit that was moved into a reservation pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSlice {
    pub pool_id: PoolId,
    pub reserved: LoadAmount,
    pub used: LoadAmount,
}

impl PoolSlice {
    #[inline]
    pub fn free(&self) -> LoadAmount {
        self.reserved - self.used
    }
}

/// Part of the inventory a request is allowed to draw capacity from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Pool(PoolId),
}

impl From<Option<PoolId>> for Scope {
    fn from(pool_id: Option<PoolId>) -> Self {
        match pool_id {
            Some(pool_id) => Scope::Pool(pool_id),
            None => Scope::Global,
        }
    }
}

impl Scope {
    pub fn pool_id(&self) -> Option<PoolId> {
        match self {
            Scope::Global => None,
            Scope::Pool(pool_id) => Some(*pool_id),
        }
    }
}

/// How much of a compute unit a request wants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadDemand {
    Shared(LoadAmount),
    /// The whole CU; it can be claimed only while no one else holds or reserves
    /// any part of it within the scope.
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    cu_id: CuId,
    #[serde(flatten)]
    desc: CuDescriptor,
    /// Sorted by channel id
    channels: Vec<Channel>,
    slices: Vec<PoolSlice>,
}

impl ComputeUnit {
    pub fn new(cu_id: CuId, desc: CuDescriptor) -> Self {
        ComputeUnit {
            cu_id,
            desc,
            channels: Vec::new(),
            slices: Vec::new(),
        }
    }

    #[inline]
    pub fn cu_id(&self) -> CuId {
        self.cu_id
    }

    #[inline]
    pub fn descriptor(&self) -> &CuDescriptor {
        &self.desc
    }

    #[inline]
    pub fn kernel_name(&self) -> &str {
        &self.desc.kernel_name
    }

    #[inline]
    pub fn kernel_alias(&self) -> &str {
        &self.desc.kernel_alias
    }

    #[inline]
    pub fn cu_type(&self) -> CuType {
        self.desc.cu_type
    }

    #[inline]
    pub fn capacity(&self) -> LoadAmount {
        self.desc.capacity
    }

    #[inline]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    #[inline]
    pub fn slices(&self) -> &[PoolSlice] {
        &self.slices
    }

    pub fn slice(&self, pool_id: PoolId) -> Option<&PoolSlice> {
        self.slices.iter().find(|s| s.pool_id == pool_id)
    }

    /// Empty identity fields of the request match anything.
    pub fn matches(&self, request: &CuRequest) -> bool {
        (request.kernel_name.is_empty() || self.desc.kernel_name == request.kernel_name)
            && (request.kernel_alias.is_empty() || self.desc.kernel_alias == request.kernel_alias)
            && (request.instance_name.is_empty()
                || self.desc.instance_name == request.instance_name)
            && request.cu_type.is_none_or(|t| t == self.desc.cu_type)
    }

    /// Sum of loads of all channels, pooled or not.
    pub fn used_load(&self) -> LoadAmount {
        self.channels.iter().map(|c| c.load).sum()
    }

    pub fn reserved_load(&self) -> LoadAmount {
        self.slices.iter().map(|s| s.reserved).sum()
    }

    fn global_used_load(&self) -> LoadAmount {
        self.channels
            .iter()
            .filter(|c| c.pool_id.is_none())
            .map(|c| c.load)
            .sum()
    }

    pub fn exclusive_holder(&self) -> Option<&Channel> {
        self.channels.iter().find(|c| c.exclusive)
    }

    pub fn is_idle(&self) -> bool {
        self.channels.is_empty() && self.slices.is_empty()
    }

    /// Free capacity visible within the scope.
    /// Returns `None` when the pool has no slice of this CU.
    pub fn free_in(&self, scope: Scope) -> Option<LoadAmount> {
        match scope {
            Scope::Global => Some(
                self.desc
                    .capacity
                    .saturating_sub(self.reserved_load() + self.global_used_load()),
            ),
            Scope::Pool(pool_id) => self.slice(pool_id).map(|s| s.free()),
        }
    }

    pub fn can_claim(&self, scope: Scope, demand: LoadDemand) -> bool {
        if self.exclusive_holder().is_some() || self.channels.len() >= MAX_CU_CHANNELS {
            return false;
        }
        let Some(free) = self.free_in(scope) else {
            return false;
        };
        match demand {
            LoadDemand::Shared(load) => !load.is_zero() && load <= free,
            LoadDemand::Exclusive => self.channels.is_empty() && free == self.desc.capacity,
        }
    }

    /// Creates a new channel holding the demanded load.
    pub(crate) fn claim(
        &mut self,
        scope: Scope,
        demand: LoadDemand,
        alloc_service_id: AllocServiceId,
        client_id: ClientId,
    ) -> crate::Result<&Channel> {
        if !self.can_claim(scope, demand) {
            return Err(AllocError::NoFreeChannel(self.desc.kernel_name.clone()));
        }
        let (load, exclusive) = match demand {
            LoadDemand::Shared(load) => (load, false),
            LoadDemand::Exclusive => (self.desc.capacity, true),
        };
        if let Scope::Pool(pool_id) = scope {
            // can_claim has checked the slice exists
            if let Some(slice) = self.slices.iter_mut().find(|s| s.pool_id == pool_id) {
                slice.used += load;
            }
        }
        let position = self
            .channels
            .iter()
            .enumerate()
            .position(|(i, c)| c.channel_id.as_num() != i as u32)
            .unwrap_or(self.channels.len());
        self.channels.insert(
            position,
            Channel {
                channel_id: ChannelId::new(position as u32),
                load,
                exclusive,
                alloc_service_id,
                pool_id: scope.pool_id(),
                client_id,
            },
        );
        Ok(&self.channels[position])
    }

    /// Removes the channel and returns its load back to the scope it came from.
    pub(crate) fn release_channel(&mut self, channel_id: ChannelId) -> Option<Channel> {
        let position = self
            .channels
            .iter()
            .position(|c| c.channel_id == channel_id)?;
        let channel = self.channels.remove(position);
        if let Some(pool_id) = channel.pool_id {
            if let Some(slice) = self.slices.iter_mut().find(|s| s.pool_id == pool_id) {
                slice.used -= channel.load;
            }
        }
        Some(channel)
    }

    pub fn can_reserve(&self, demand: LoadDemand) -> bool {
        if self.exclusive_holder().is_some() {
            return false;
        }
        match demand {
            LoadDemand::Shared(load) => {
                !load.is_zero() && self.free_in(Scope::Global).is_some_and(|free| load <= free)
            }
            LoadDemand::Exclusive => self.is_idle(),
        }
    }

    /// Moves capacity from the global inventory into the pool's slice.
    pub(crate) fn reserve_slice(
        &mut self,
        pool_id: PoolId,
        demand: LoadDemand,
    ) -> crate::Result<LoadAmount> {
        let has_slice = self.slice(pool_id).is_some();
        if !self.can_reserve(demand) || (!has_slice && self.slices.len() >= MAX_CU_RESERVES) {
            return Err(AllocError::NoFreeChannel(self.desc.kernel_name.clone()));
        }
        let amount = match demand {
            LoadDemand::Shared(load) => load,
            LoadDemand::Exclusive => self.desc.capacity,
        };
        if let Some(slice) = self.slices.iter_mut().find(|s| s.pool_id == pool_id) {
            slice.reserved += amount;
        } else {
            self.slices.push(PoolSlice {
                pool_id,
                reserved: amount,
                used: LoadAmount::ZERO,
            });
        }
        Ok(amount)
    }

    /// Returns the unused part of the pool's slice to the global inventory.
    /// A slice with nothing in use is removed; returns whether the slice is still present.
    pub(crate) fn shrink_slice(&mut self, pool_id: PoolId) -> bool {
        let Some(position) = self.slices.iter().position(|s| s.pool_id == pool_id) else {
            return false;
        };
        let slice = &mut self.slices[position];
        if slice.used.is_zero() {
            self.slices.remove(position);
            false
        } else {
            slice.reserved = slice.used;
            true
        }
    }

    pub(crate) fn remove_slice(&mut self, pool_id: PoolId) -> Option<PoolSlice> {
        let position = self.slices.iter().position(|s| s.pool_id == pool_id)?;
        Some(self.slices.remove(position))
    }

    #[cfg(debug_assertions)]
    pub fn validate(&self) {
        assert!(self.used_load() <= self.desc.capacity);
        assert!(self.reserved_load() + self.global_used_load() <= self.desc.capacity);
        for pair in self.channels.windows(2) {
            assert!(pair[0].channel_id < pair[1].channel_id);
        }
        if self.exclusive_holder().is_some() {
            assert_eq!(self.channels.len(), 1);
        }
        for slice in &self.slices {
            let used: LoadAmount = self
                .channels
                .iter()
                .filter(|c| c.pool_id == Some(slice.pool_id))
                .map(|c| c.load)
                .sum();
            assert_eq!(used, slice.used);
            assert!(slice.used <= slice.reserved);
        }
        for channel in &self.channels {
            assert!(!channel.load.is_zero());
            if let Some(pool_id) = channel.pool_id {
                assert!(self.slice(pool_id).is_some());
            }
        }
    }
}
