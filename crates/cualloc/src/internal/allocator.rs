//! Allocation transactions over [`Core`].
//!
//! Every allocating operation first plans all of its placements with the matcher
//! and only then mutates the inventory, so a failed request leaves the core
//! exactly as it was.

use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{AllocServiceId, ClientId, DeviceId, PoolId};
use crate::internal::common::limits::MAX_AVAILABLE_NUM;
use crate::internal::core::{Core, CoreSplitMut};
use crate::internal::inventory::Inventory;
use crate::internal::inventory::cu::Scope;
use crate::internal::inventory::load::LoadAmount;
use crate::internal::matcher::{MatchMode, PendingState, Placement, match_leaf, match_list};
use crate::internal::pools::{PoolManager, abandon_pool, reclaim_abandoned_pool, relinquish_pool};
use crate::internal::registry::{AllocationEntry, AllocationOrigin, AllocationRecord};
use crate::internal::request::{CuListRequest, CuRequest};
use serde::{Deserialize, Serialize};

/// Live state of the compute unit behind a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuStatus {
    pub busy: bool,
    pub used_load: LoadAmount,
    pub reserved_load: LoadAmount,
    pub channel_count: usize,
    pub exclusive: bool,
}

fn check_pools<'a>(
    pools: &PoolManager,
    requests: impl IntoIterator<Item = &'a CuRequest>,
) -> crate::Result<()> {
    for rq in requests {
        if let Scope::Pool(pool_id) = rq.scope() {
            if !pools.contains(pool_id) {
                log::warn!("Request for '{}' refers to unknown pool {pool_id}", rq.display_name());
                return Err(AllocError::UnknownPool(pool_id));
            }
        }
    }
    Ok(())
}

/// Devices a request is pinned to must be loaded and enabled.
fn check_device(inventory: &Inventory, device_id: DeviceId) -> crate::Result<()> {
    let device = inventory
        .device(device_id)
        .ok_or(AllocError::DeviceNotLoaded(device_id))?;
    if !device.is_enabled() {
        log::warn!("Request pinned to disabled device {device_id}");
        return Err(AllocError::NoMatchingDevice);
    }
    Ok(())
}

fn check_devices<'a>(
    inventory: &Inventory,
    requests: impl IntoIterator<Item = &'a CuRequest>,
) -> crate::Result<()> {
    requests
        .into_iter()
        .filter_map(|rq| rq.device_id)
        .try_for_each(|device_id| check_device(inventory, device_id))
}

fn make_record(
    inventory: &mut Inventory,
    placement: &Placement,
    alloc_service_id: AllocServiceId,
    client_id: ClientId,
) -> crate::Result<AllocationRecord> {
    let channel = inventory.reserve_load(
        placement.cu_ref,
        placement.scope,
        placement.demand,
        alloc_service_id,
        client_id,
    )?;
    let device = inventory
        .device(placement.cu_ref.device_id)
        .ok_or(AllocError::DeviceNotLoaded(placement.cu_ref.device_id))?;
    let cu = device
        .cu(placement.cu_ref.cu_id)
        .ok_or(AllocError::DeviceNotLoaded(placement.cu_ref.device_id))?;
    let desc = cu.descriptor();
    Ok(AllocationRecord {
        device_id: placement.cu_ref.device_id,
        cu_id: placement.cu_ref.cu_id,
        channel_id: channel.channel_id,
        kernel_name: desc.kernel_name.clone(),
        kernel_alias: desc.kernel_alias.clone(),
        instance_name: desc.instance_name.clone(),
        cu_type: desc.cu_type,
        image_uuid: device.image_uuid().clone(),
        base_address: desc.base_address,
        membank: desc.membank,
        load: channel.load,
        exclusive: channel.exclusive,
        alloc_service_id,
        pool_id: channel.pool_id,
        client_id,
    })
}

/// Applies planned placements under one allocation-service id, all or nothing.
fn commit(
    split: CoreSplitMut<'_>,
    placements: &[Placement],
    origin: AllocationOrigin,
    client_id: ClientId,
) -> crate::Result<Vec<AllocationRecord>> {
    let alloc_service_id = split.registry.new_service_id();
    let mut records: Vec<AllocationRecord> = Vec::with_capacity(placements.len());
    for placement in placements {
        match make_record(split.inventory, placement, alloc_service_id, client_id) {
            Ok(record) => records.push(record),
            Err(error) => {
                log::error!("Allocation {alloc_service_id} failed after planning: {error}");
                for record in &records {
                    if let Err(error) =
                        split.inventory.release_load(record.cu_ref(), record.channel_id)
                    {
                        log::error!("Rollback of allocation {alloc_service_id} failed: {error}");
                    }
                }
                return Err(error);
            }
        }
    }
    log::debug!(
        "Allocation {alloc_service_id} ({origin:?}) for client {client_id}: {}",
        records
            .iter()
            .map(|r| format!("{}/{}@{}", r.kernel_name, r.channel_id, r.cu_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    split.registry.insert(
        alloc_service_id,
        AllocationEntry {
            origin,
            client_id,
            records: records.clone(),
        },
    );
    Ok(records)
}

pub fn allocate_cu(
    core: &mut Core,
    request: &CuRequest,
    client_id: ClientId,
) -> crate::Result<AllocationRecord> {
    request.validate()?;
    let split = core.split_mut();
    check_devices(split.inventory, [request])?;
    check_pools(split.pools, [request])?;
    let placement = match_leaf(
        split.inventory,
        request,
        None,
        MatchMode::Claim,
        &mut PendingState::default(),
    )?;
    commit(split, &[placement], AllocationOrigin::Cu, client_id)?
        .pop()
        .ok_or_else(|| "Empty allocation".into())
}

/// Same as [`allocate_cu`], restricted to compute units of one device.
pub fn allocate_from_device(
    core: &mut Core,
    device_id: DeviceId,
    request: &CuRequest,
    client_id: ClientId,
) -> crate::Result<AllocationRecord> {
    request.validate()?;
    let split = core.split_mut();
    check_device(split.inventory, device_id)?;
    check_devices(split.inventory, [request])?;
    check_pools(split.pools, [request])?;
    let placement = match_leaf(
        split.inventory,
        request,
        Some(device_id),
        MatchMode::Claim,
        &mut PendingState::default(),
    )?;
    commit(split, &[placement], AllocationOrigin::Cu, client_id)?
        .pop()
        .ok_or_else(|| "Empty allocation".into())
}

pub fn allocate_list(
    core: &mut Core,
    list: &CuListRequest,
    client_id: ClientId,
) -> crate::Result<Vec<AllocationRecord>> {
    list.validate()?;
    let split = core.split_mut();
    check_devices(split.inventory, &list.entries)?;
    check_pools(split.pools, &list.entries)?;
    let placements = match_list(
        split.inventory,
        list,
        MatchMode::Claim,
        &mut PendingState::default(),
    )?;
    commit(split, &placements, AllocationOrigin::List, client_id)
}

fn with_pool(option: &CuListRequest, pool_id: Option<PoolId>) -> CuListRequest {
    let mut option = option.clone();
    for entry in &mut option.entries {
        entry.pool_id = pool_id;
    }
    option
}

/// Worst outcome across failed group options, used as the group's error.
fn error_rank(error: &AllocError) -> u8 {
    match error {
        AllocError::NoFreeChannel(_) => 3,
        AllocError::NoMatchingDevice => 2,
        AllocError::NoMatchingKernel(_) => 1,
        _ => 0,
    }
}

/// Tries the template's options in declaration order; the first one that fits is committed.
pub fn allocate_group(
    core: &mut Core,
    name: &str,
    pool_id: Option<PoolId>,
    client_id: ClientId,
) -> crate::Result<Vec<AllocationRecord>> {
    let split = core.split_mut();
    let template = split
        .templates
        .get(name)
        .ok_or_else(|| AllocError::UnknownTemplate(name.to_string()))?;
    let options: Vec<CuListRequest> = template
        .options
        .iter()
        .map(|o| with_pool(o, pool_id))
        .collect();
    if let Some(option) = options.first() {
        check_pools(split.pools, &option.entries)?;
    }

    let mut last_error: Option<AllocError> = None;
    for (idx, option) in options.iter().enumerate() {
        match match_list(
            split.inventory,
            option,
            MatchMode::Claim,
            &mut PendingState::default(),
        ) {
            Ok(placements) => {
                log::debug!("Group '{name}' satisfied by option {idx}");
                return commit(
                    split,
                    &placements,
                    AllocationOrigin::Group(name.to_string()),
                    client_id,
                );
            }
            Err(error) => {
                if last_error
                    .as_ref()
                    .is_none_or(|e| error_rank(&error) > error_rank(e))
                {
                    last_error = Some(error);
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| AllocError::UnknownTemplate(name.to_string())))
}

/// Releases every record of the allocation.
pub fn release(
    core: &mut Core,
    alloc_service_id: AllocServiceId,
) -> crate::Result<Vec<AllocationRecord>> {
    if alloc_service_id.as_num() == 0 {
        return Err(AllocError::invalid("Allocation service id 0"));
    }
    let split = core.split_mut();
    let entry = split
        .registry
        .remove(alloc_service_id)
        .ok_or(AllocError::UnknownAllocation(alloc_service_id))?;
    for record in &entry.records {
        if let Err(error) = split
            .inventory
            .release_load(record.cu_ref(), record.channel_id)
        {
            log::error!("Inconsistent allocation {alloc_service_id}: {error}");
        }
    }
    log::debug!(
        "Allocation {alloc_service_id} released ({} records)",
        entry.records.len()
    );
    let mut pool_ids: Vec<PoolId> = entry.records.iter().filter_map(|r| r.pool_id).collect();
    pool_ids.sort_unstable();
    pool_ids.dedup();
    for pool_id in pool_ids {
        reclaim_abandoned_pool(core, pool_id);
    }
    Ok(entry.records)
}

/// Releases exactly one record of an allocation.
pub fn release_cu(core: &mut Core, record: &AllocationRecord) -> crate::Result<()> {
    let split = core.split_mut();
    let removed = split.registry.remove_record(record).ok_or_else(|| {
        AllocError::invalid(format!(
            "Channel {} on CU {} is not held by allocation {}",
            record.channel_id,
            record.cu_ref(),
            record.alloc_service_id
        ))
    })?;
    split
        .inventory
        .release_load(removed.cu_ref(), removed.channel_id)?;
    log::debug!(
        "Channel {} on CU {} of allocation {} released",
        removed.channel_id,
        removed.cu_ref(),
        removed.alloc_service_id
    );
    if let Some(pool_id) = removed.pool_id {
        reclaim_abandoned_pool(core, pool_id);
    }
    Ok(())
}

pub fn query(
    core: &Core,
    alloc_service_id: AllocServiceId,
    kernel_name: &str,
    kernel_alias: &str,
) -> crate::Result<Vec<AllocationRecord>> {
    if alloc_service_id.as_num() == 0 {
        return Err(AllocError::invalid("Allocation service id 0"));
    }
    Ok(core
        .registry()
        .query(alloc_service_id, kernel_name, kernel_alias))
}

pub fn check_status(core: &Core, record: &AllocationRecord) -> crate::Result<CuStatus> {
    let cu = core
        .inventory()
        .cu(record.cu_ref())
        .ok_or(AllocError::DeviceNotLoaded(record.device_id))?;
    let used_load = cu.used_load();
    let reserved_load = cu.reserved_load();
    Ok(CuStatus {
        busy: !used_load.is_zero() || !reserved_load.is_zero(),
        used_load,
        reserved_load,
        channel_count: cu.channels().len(),
        exclusive: cu.exclusive_holder().is_some(),
    })
}

pub fn is_cu_existing(core: &Core, request: &CuRequest) -> crate::Result<bool> {
    request.validate()?;
    Ok(!core
        .inventory()
        .find_candidates(request)
        .is_empty())
}

/// Every leaf exists; for same-device lists, all of them on one device.
pub fn is_cu_list_existing(core: &Core, list: &CuListRequest) -> crate::Result<bool> {
    list.validate()?;
    Ok(list_exists(core.inventory(), list))
}

fn list_exists(inventory: &Inventory, list: &CuListRequest) -> bool {
    let per_leaf: Vec<Vec<DeviceId>> = list
        .entries
        .iter()
        .map(|rq| {
            inventory
                .find_candidates(rq)
                .into_iter()
                .map(|c| c.device_id)
                .collect()
        })
        .collect();
    if per_leaf.iter().any(|devices| devices.is_empty()) {
        return false;
    }
    !list.same_device
        || per_leaf[0]
            .iter()
            .any(|d| per_leaf.iter().all(|devices| devices.contains(d)))
}

pub fn is_group_existing(core: &Core, name: &str) -> bool {
    core.templates().get(name).is_some_and(|template| {
        template
            .options
            .iter()
            .any(|option| list_exists(core.inventory(), option))
    })
}

/// Capacity of the first compute unit matching the request.
pub fn cu_max_capacity(core: &Core, request: &CuRequest) -> crate::Result<LoadAmount> {
    request.validate()?;
    core.inventory()
        .find_candidates(request)
        .first()
        .and_then(|cu_ref| core.inventory().cu(*cu_ref))
        .map(|cu| cu.capacity())
        .ok_or_else(|| AllocError::NoMatchingKernel(request.display_name().to_string()))
}

fn count_available(mut try_one: impl FnMut(&mut PendingState) -> bool) -> u32 {
    let mut pending = PendingState::default();
    let mut count = 0;
    while count < MAX_AVAILABLE_NUM && try_one(&mut pending) {
        count += 1;
    }
    count
}

pub fn check_cu_available_num(core: &Core, request: &CuRequest) -> crate::Result<u32> {
    request.validate()?;
    check_pools(core.pools(), [request])?;
    Ok(count_available(|pending| {
        match_leaf(core.inventory(), request, None, MatchMode::Claim, pending).is_ok()
    }))
}

pub fn check_list_available_num(core: &Core, list: &CuListRequest) -> crate::Result<u32> {
    list.validate()?;
    check_pools(core.pools(), &list.entries)?;
    Ok(count_available(|pending| {
        match_list(core.inventory(), list, MatchMode::Claim, pending).is_ok()
    }))
}

/// Best count over the template's options.
pub fn check_group_available_num(
    core: &Core,
    name: &str,
    pool_id: Option<PoolId>,
) -> crate::Result<u32> {
    let template = core
        .templates()
        .get(name)
        .ok_or_else(|| AllocError::UnknownTemplate(name.to_string()))?;
    let mut best = 0;
    for option in &template.options {
        let option = with_pool(option, pool_id);
        check_pools(core.pools(), &option.entries)?;
        best = best.max(count_available(|pending| {
            match_list(core.inventory(), &option, MatchMode::Claim, pending).is_ok()
        }));
    }
    Ok(best)
}

/// Releases everything a client holds: its allocations first, then its pools.
/// Pools still used by other clients are abandoned and return their capacity
/// once those clients release it.
/// Returns the number of released allocations and given up pools.
pub fn recycle_client(core: &mut Core, client_id: ClientId) -> (usize, usize) {
    let alloc_ids = core.registry().service_ids_of_client(client_id);
    let released = alloc_ids
        .into_iter()
        .filter(|id| release(core, *id).is_ok())
        .count();
    let pool_ids = core.pools().pool_ids_of_client(client_id);
    let mut relinquished = 0;
    for pool_id in pool_ids {
        match relinquish_pool(core, pool_id) {
            Ok(()) => relinquished += 1,
            Err(AllocError::PoolInUse(_)) => {
                abandon_pool(core, pool_id);
                relinquished += 1;
            }
            Err(error) => log::warn!("Pool {pool_id} of client {client_id} kept: {error}"),
        }
    }
    if released > 0 || relinquished > 0 {
        log::debug!(
            "Client {client_id} recycled: {released} allocations, {relinquished} pools"
        );
    }
    (released, relinquished)
}
