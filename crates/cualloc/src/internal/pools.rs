//! Reservation pools: capacity moved out of the global inventory for pool-tagged requests.

use crate::internal::common::Map;
use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{ClientId, CuId, CuRef, DeviceId, PoolId, WrappingIdCounter};
use crate::internal::common::limits::{MAX_AVAILABLE_NUM, MAX_POOL_CU_NUM};
use crate::internal::core::Core;
use crate::internal::inventory::Inventory;
use crate::internal::inventory::cu::CuType;
use crate::internal::inventory::load::LoadAmount;
use crate::internal::matcher::{MatchMode, PendingState, Placement, match_image, match_list};
use crate::internal::request::PoolRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPool {
    pool_id: PoolId,
    client_id: ClientId,
    /// Sorted, without duplicates
    cus: Vec<CuRef>,
    /// Cleared when the owner leaves while other clients still hold channels in the pool
    active: bool,
}

impl ReservationPool {
    #[inline]
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn cus(&self) -> &[CuRef] {
        &self.cus
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// One CU slice of a pool as reported by [`query_pool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCuSlice {
    pub device_id: DeviceId,
    pub cu_id: CuId,
    pub kernel_name: String,
    pub kernel_alias: String,
    pub instance_name: String,
    pub cu_type: CuType,
    pub reserved: LoadAmount,
    pub used: LoadAmount,
}

impl PoolCuSlice {
    pub fn free(&self) -> LoadAmount {
        self.reserved - self.used
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolManager {
    id_counter: WrappingIdCounter,
    pools: Map<PoolId, ReservationPool>,
}

impl PoolManager {
    /// Includes abandoned pools that still wait for their channels to be released.
    pub fn get(&self, pool_id: PoolId) -> Option<&ReservationPool> {
        self.pools.get(&pool_id)
    }

    fn get_active(&self, pool_id: PoolId) -> Option<&ReservationPool> {
        self.get(pool_id).filter(|p| p.active)
    }

    /// The pool exists and accepts new claims.
    pub fn contains(&self, pool_id: PoolId) -> bool {
        self.get_active(pool_id).is_some()
    }

    /// Sorted by pool id
    pub fn pools(&self) -> Vec<&ReservationPool> {
        let mut pools: Vec<_> = self.pools.values().collect();
        pools.sort_unstable_by_key(|p| p.pool_id);
        pools
    }

    pub(crate) fn pool_ids_of_client(&self, client_id: ClientId) -> Vec<PoolId> {
        let mut ids: Vec<PoolId> = self
            .pools
            .values()
            .filter(|p| p.active && p.client_id == client_id)
            .map(|p| p.pool_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn new_pool_id(&mut self) -> PoolId {
        let pools = &self.pools;
        PoolId::new(self.id_counter.next(|id| pools.contains_key(&PoolId::new(id))))
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Plans whole images first, then the repeated list.
fn plan_pool(
    inventory: &Inventory,
    request: &PoolRequest,
    pending: &mut PendingState,
) -> crate::Result<Vec<Placement>> {
    let mut placements = Vec::new();
    if let Some(image) = &request.image {
        for _ in 0..image.count {
            let Some(image_placements) = match_image(inventory, &image.image_uuid, pending) else {
                let loaded = inventory
                    .devices()
                    .iter()
                    .any(|d| d.is_enabled() && d.image_uuid() == &image.image_uuid);
                return Err(if loaded {
                    AllocError::NoFreeChannel(image.image_uuid.to_string())
                } else {
                    AllocError::NoMatchingDevice
                });
            };
            placements.extend(image_placements);
        }
    }
    for _ in 0..request.list_count() {
        placements.extend(match_list(
            inventory,
            &request.list,
            MatchMode::Reserve,
            pending,
        )?);
    }
    Ok(placements)
}

pub fn reserve_pool(
    core: &mut Core,
    request: &PoolRequest,
    client_id: ClientId,
) -> crate::Result<PoolId> {
    request.validate()?;
    let split = core.split_mut();
    let placements = plan_pool(split.inventory, request, &mut PendingState::default())?;

    let pool_id = split.pools.new_pool_id();
    let mut cus: Vec<CuRef> = Vec::with_capacity(placements.len());
    for placement in &placements {
        let result = match split.inventory.cu_mut(placement.cu_ref) {
            Some(cu) => cu.reserve_slice(pool_id, placement.demand),
            None => Err(AllocError::DeviceNotLoaded(placement.cu_ref.device_id)),
        };
        if let Err(error) = result {
            log::error!("Reservation of pool {pool_id} failed after planning: {error}");
            for cu_ref in &cus {
                if let Some(cu) = split.inventory.cu_mut(*cu_ref) {
                    cu.remove_slice(pool_id);
                }
            }
            return Err(error);
        }
        cus.push(placement.cu_ref);
    }
    cus.sort_unstable();
    cus.dedup();
    log::debug!(
        "Pool {pool_id} reserved for client {client_id} over {} compute units",
        cus.len()
    );
    split.pools.pools.insert(
        pool_id,
        ReservationPool {
            pool_id,
            client_id,
            cus,
            active: true,
        },
    );
    Ok(pool_id)
}

/// Returns the pool's remaining capacity to the global inventory.
pub fn relinquish_pool(core: &mut Core, pool_id: PoolId) -> crate::Result<()> {
    let split = core.split_mut();
    let pool = split
        .pools
        .get_active(pool_id)
        .ok_or(AllocError::UnknownPool(pool_id))?;
    let in_use = pool.cus.iter().any(|cu_ref| {
        split
            .inventory
            .cu(*cu_ref)
            .and_then(|cu| cu.slice(pool_id))
            .is_some_and(|s| !s.used.is_zero())
    });
    if in_use || split.registry.has_pool_allocations(pool_id) {
        log::warn!("Pool {pool_id} cannot be relinquished, it has outstanding allocations");
        return Err(AllocError::PoolInUse(pool_id));
    }
    if let Some(pool) = split.pools.pools.remove(&pool_id) {
        for cu_ref in pool.cus {
            if let Some(cu) = split.inventory.cu_mut(cu_ref) {
                cu.remove_slice(pool_id);
            }
        }
    }
    log::debug!("Pool {pool_id} relinquished");
    Ok(())
}

/// Gives up a pool that still has outstanding channels.
///
/// The pool stops accepting claims and its unused capacity goes back to the
/// global inventory right away; the rest follows as the channels are released.
pub(crate) fn abandon_pool(core: &mut Core, pool_id: PoolId) {
    let split = core.split_mut();
    let Some(pool) = split.pools.pools.get_mut(&pool_id) else {
        return;
    };
    pool.active = false;
    log::debug!("Pool {pool_id} abandoned by client {}", pool.client_id);
    reclaim_abandoned_pool(core, pool_id);
}

/// Shrinks an abandoned pool to what its channels still use and drops it once nothing is left.
pub(crate) fn reclaim_abandoned_pool(core: &mut Core, pool_id: PoolId) {
    let split = core.split_mut();
    let Some(pool) = split.pools.pools.get_mut(&pool_id) else {
        return;
    };
    if pool.active {
        return;
    }
    pool.cus.retain(|cu_ref| {
        split
            .inventory
            .cu_mut(*cu_ref)
            .is_some_and(|cu| cu.shrink_slice(pool_id))
    });
    if pool.cus.is_empty() {
        split.pools.pools.remove(&pool_id);
        log::debug!("Abandoned pool {pool_id} returned its last capacity");
    }
}

pub fn query_pool(core: &Core, pool_id: PoolId) -> crate::Result<Vec<PoolCuSlice>> {
    let pool = core
        .pools()
        .get_active(pool_id)
        .ok_or(AllocError::UnknownPool(pool_id))?;
    if pool.cus.len() > MAX_POOL_CU_NUM {
        log::warn!(
            "Pool {pool_id} spans {} compute units, only the first {MAX_POOL_CU_NUM} are reported",
            pool.cus.len()
        );
    }
    Ok(pool
        .cus
        .iter()
        .filter_map(|cu_ref| {
            let cu = core.inventory().cu(*cu_ref)?;
            let slice = cu.slice(pool_id)?;
            Some(PoolCuSlice {
                device_id: cu_ref.device_id,
                cu_id: cu_ref.cu_id,
                kernel_name: cu.kernel_name().to_string(),
                kernel_alias: cu.kernel_alias().to_string(),
                instance_name: cu.descriptor().instance_name.clone(),
                cu_type: cu.cu_type(),
                reserved: slice.reserved,
                used: slice.used,
            })
        })
        .take(MAX_POOL_CU_NUM)
        .collect())
}

/// How many pools of this shape could be reserved right now.
pub fn check_pool_available_num(core: &Core, request: &PoolRequest) -> crate::Result<u32> {
    request.validate()?;
    let mut pending = PendingState::default();
    let mut count = 0;
    while count < MAX_AVAILABLE_NUM {
        let mut local = pending.clone();
        local.next_round();
        if plan_pool(core.inventory(), request, &mut local).is_err() {
            break;
        }
        pending = local;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::common::limits::MAX_CU_RESERVES;
    use crate::internal::inventory::cu::{CuDescriptorBuilder, Scope};
    use crate::internal::inventory::device::ImageUuid;
    use crate::internal::request::{CuListRequest, CuRequest};

    fn core_with_cus(cus: &[&str]) -> Core {
        let mut core = Core::default();
        core.inventory_mut()
            .add_device(
                0.into(),
                ImageUuid::new("img"),
                cus.iter()
                    .map(|name| {
                        CuDescriptorBuilder::default()
                            .kernel_name(*name)
                            .build()
                            .unwrap()
                    })
                    .collect(),
            )
            .unwrap();
        core
    }

    fn list(rqs: Vec<CuRequest>) -> CuListRequest {
        CuListRequest::new(rqs, false)
    }

    #[test]
    fn test_pool_ids_are_not_reused_while_alive() {
        let mut core = core_with_cus(&["a"]);
        let rq = PoolRequest::from_list(list(vec![CuRequest::shared("a", 10)]), 1);
        let p1 = reserve_pool(&mut core, &rq, 1.into()).unwrap();
        let p2 = reserve_pool(&mut core, &rq, 1.into()).unwrap();
        assert_ne!(p1, p2);
        assert_ne!(p1.as_num(), 0);
        let cu = core.inventory().cu(CuRef::new(0.into(), 0.into())).unwrap();
        assert_eq!(cu.free_in(Scope::Global), Some(80.into()));
        assert_eq!(check_pool_available_num(&core, &rq).unwrap(), 8);
        core.sanity_check();
    }

    #[test]
    fn test_pool_count_respects_slice_limit() {
        let mut core = core_with_cus(&["a"]);
        let rq = PoolRequest::from_list(
            list(vec![CuRequest::shared("a", LoadAmount::new_fractions(1))]),
            1,
        );
        assert_eq!(
            check_pool_available_num(&core, &rq).unwrap(),
            MAX_CU_RESERVES as u32
        );
        for _ in 0..10 {
            reserve_pool(&mut core, &rq, 1.into()).unwrap();
        }
        assert_eq!(
            check_pool_available_num(&core, &rq).unwrap(),
            MAX_CU_RESERVES as u32 - 10
        );
    }

    #[test]
    fn test_repeated_list_merges_into_one_slice() {
        let mut core = core_with_cus(&["a", "b"]);
        let rq = PoolRequest::from_list(
            list(vec![CuRequest::shared("a", 30), CuRequest::shared("b", 20)]),
            3,
        );
        let pool_id = reserve_pool(&mut core, &rq, 1.into()).unwrap();
        let slices = query_pool(&core, pool_id).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].reserved, 90.into());
        assert_eq!(slices[1].reserved, 60.into());
        assert_eq!(slices[0].free(), 90.into());
        core.sanity_check();
    }

    #[test]
    fn test_image_reservation() {
        let mut core = core_with_cus(&["a", "b"]);
        let rq = PoolRequest::from_image(ImageUuid::new("img"), 1);
        assert_eq!(check_pool_available_num(&core, &rq).unwrap(), 1);
        let pool_id = reserve_pool(&mut core, &rq, 1.into()).unwrap();
        assert!(
            query_pool(&core, pool_id)
                .unwrap()
                .iter()
                .all(|s| s.reserved == LoadAmount::FULL)
        );
        assert!(reserve_pool(&mut core, &rq, 1.into()).is_err());
        assert_eq!(
            reserve_pool(
                &mut core,
                &PoolRequest::from_image(ImageUuid::new("other"), 1),
                1.into()
            ),
            Err(AllocError::NoMatchingDevice)
        );
        relinquish_pool(&mut core, pool_id).unwrap();
        assert_eq!(
            relinquish_pool(&mut core, pool_id),
            Err(AllocError::UnknownPool(pool_id))
        );
        assert!(core.inventory().devices()[0].is_idle());
    }
}
