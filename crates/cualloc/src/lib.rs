#[macro_use]
pub(crate) mod internal;

pub use crate::internal::common::ids::{
    AllocServiceId, ChannelId, ClientId, CuId, CuRef, DeviceId, PoolId,
};
pub use crate::internal::common::limits;
pub use crate::internal::common::{Map, Set};

pub use crate::internal::allocator::{
    CuStatus, allocate_cu, allocate_from_device, allocate_group, allocate_list,
    check_cu_available_num, check_group_available_num, check_list_available_num, check_status,
    cu_max_capacity, is_cu_existing, is_cu_list_existing, is_group_existing, query,
    recycle_client, release, release_cu,
};
pub use crate::internal::core::{Core, CoreSnapshot};
pub use crate::internal::groups::{
    GroupTemplate, GroupTemplateRegistry, declare_group, undeclare_group,
};
pub use crate::internal::plugin::{Plugin, PluginFuncId, PluginRegistry};
pub use crate::internal::pools::{
    PoolCuSlice, PoolManager, ReservationPool, check_pool_available_num, query_pool,
    relinquish_pool, reserve_pool,
};
pub use crate::internal::registry::{AllocationOrigin, AllocationRecord, AllocationRegistry};
pub use crate::internal::request::{
    AllocPolicy, CuListRequest, CuRequest, CuRequestBuilder, ImageReservation, PoolRequest,
};

pub mod inventory {
    pub use crate::internal::inventory::Inventory;
    pub use crate::internal::inventory::cu::{
        Channel, ComputeUnit, CuDescriptor, CuDescriptorBuilder, CuType, LoadDemand, MemBank,
        PoolSlice, Scope,
    };
    pub use crate::internal::inventory::device::{Device, ImageUuid};
    pub use crate::internal::inventory::load::{
        FRACTIONS_MAX_DIGITS, FRACTIONS_PER_PERCENT, LoadAmount, LoadFractions, LoadPercent,
    };
}

pub type Error = internal::common::error::AllocError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::internal::common::error::{AllocError, ErrorCode};
