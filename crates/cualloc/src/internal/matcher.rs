//! Finds compute units for requests without touching the inventory.
//!
//! Matching runs against the live inventory plus a [`PendingState`] overlay that
//! records what was already planned in the current transaction (earlier leaves
//! of a list, earlier instances in an availability count). Nothing is committed
//! here; the allocator applies the returned placements afterwards.

use crate::internal::common::Map;
use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{CuRef, DeviceId};
use crate::internal::common::limits::{MAX_CU_CHANNELS, MAX_CU_RESERVES};
use crate::internal::inventory::Inventory;
use crate::internal::inventory::cu::{ComputeUnit, LoadDemand, Scope};
use crate::internal::inventory::device::ImageUuid;
use crate::internal::inventory::load::LoadAmount;
use crate::internal::request::{AllocPolicy, CuListRequest, CuRequest};
use smallvec::SmallVec;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Create channels within the request's scope
    Claim,
    /// Move global capacity into a pool
    Reserve,
}

/// A planned (not yet committed) piece of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Placement {
    pub cu_ref: CuRef,
    pub scope: Scope,
    pub demand: LoadDemand,
}

#[derive(Debug, Clone, Default)]
struct PendingCu {
    loads: SmallVec<[(Scope, LoadAmount); 2]>,
    channels: usize,
    new_slices: usize,
    /// Reservation round that last added a slice here
    slice_round: Option<u32>,
    exclusive: bool,
}

impl PendingCu {
    fn load_in(&self, scope: Scope) -> LoadAmount {
        self.loads
            .iter()
            .filter(|(s, _)| *s == scope)
            .map(|(_, l)| *l)
            .sum()
    }

    fn total_load(&self) -> LoadAmount {
        self.loads.iter().map(|(_, l)| *l).sum()
    }

    fn is_empty(&self) -> bool {
        self.loads.is_empty() && !self.exclusive
    }

    fn add_load(&mut self, scope: Scope, load: LoadAmount) {
        if let Some((_, l)) = self.loads.iter_mut().find(|(s, _)| *s == scope) {
            *l += load;
        } else {
            self.loads.push((scope, load));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PendingState {
    cus: Map<CuRef, PendingCu>,
    /// Each reservation round plans a distinct pool, so it needs its own slices
    round: u32,
}

impl PendingState {
    pub(crate) fn next_round(&mut self) {
        self.round += 1;
    }

    fn get(&self, cu_ref: CuRef) -> Option<&PendingCu> {
        self.cus.get(&cu_ref)
    }

    fn free_in(&self, cu_ref: CuRef, cu: &ComputeUnit, scope: Scope) -> Option<LoadAmount> {
        let free = cu.free_in(scope)?;
        Some(match self.get(cu_ref) {
            Some(p) => free.saturating_sub(p.load_in(scope)),
            None => free,
        })
    }

    /// Load held within the scope, including what is already planned.
    /// Global usage counts every channel of the CU.
    fn used_in(&self, cu_ref: CuRef, cu: &ComputeUnit, scope: Scope) -> LoadAmount {
        match scope {
            Scope::Global => {
                cu.used_load() + self.get(cu_ref).map(|p| p.total_load()).unwrap_or_default()
            }
            Scope::Pool(pool_id) => {
                cu.slice(pool_id).map(|s| s.used).unwrap_or_default()
                    + self.get(cu_ref).map(|p| p.load_in(scope)).unwrap_or_default()
            }
        }
    }

    /// Total load of all CUs of the device, including what is already planned.
    fn device_used(&self, inventory: &Inventory, device_id: DeviceId) -> LoadAmount {
        inventory
            .device(device_id)
            .map(|device| {
                device
                    .cus()
                    .iter()
                    .map(|cu| self.used_in(CuRef::new(device_id, cu.cu_id()), cu, Scope::Global))
                    .sum()
            })
            .unwrap_or_default()
    }

    fn is_feasible(&self, cu_ref: CuRef, cu: &ComputeUnit, p: &Placement, mode: MatchMode) -> bool {
        let pending = self.get(cu_ref);
        if cu.exclusive_holder().is_some() || pending.is_some_and(|p| p.exclusive) {
            return false;
        }
        let Some(free) = self.free_in(cu_ref, cu, p.scope) else {
            return false;
        };
        let untouched = pending.is_none_or(|p| p.is_empty());
        match mode {
            MatchMode::Claim => {
                let channels = pending.map(|p| p.channels).unwrap_or(0);
                if cu.channels().len() + channels >= MAX_CU_CHANNELS {
                    return false;
                }
                match p.demand {
                    LoadDemand::Shared(load) => !load.is_zero() && load <= free,
                    LoadDemand::Exclusive => {
                        cu.channels().is_empty() && untouched && free == cu.capacity()
                    }
                }
            }
            MatchMode::Reserve => {
                let needs_slice = pending.is_none_or(|p| p.slice_round != Some(self.round));
                let new_slices = pending.map(|p| p.new_slices).unwrap_or(0);
                if needs_slice && cu.slices().len() + new_slices >= MAX_CU_RESERVES {
                    return false;
                }
                match p.demand {
                    LoadDemand::Shared(load) => !load.is_zero() && load <= free,
                    LoadDemand::Exclusive => cu.is_idle() && untouched,
                }
            }
        }
    }

    fn add(&mut self, cu: &ComputeUnit, p: &Placement, mode: MatchMode) {
        let round = self.round;
        let pending = self.cus.entry(p.cu_ref).or_default();
        let load = match p.demand {
            LoadDemand::Shared(load) => load,
            LoadDemand::Exclusive => {
                pending.exclusive = true;
                cu.capacity()
            }
        };
        pending.add_load(p.scope, load);
        match mode {
            MatchMode::Claim => pending.channels += 1,
            MatchMode::Reserve => {
                if pending.slice_round != Some(round) {
                    pending.slice_round = Some(round);
                    pending.new_slices += 1;
                }
            }
        }
    }
}

/// Orders feasible candidates by the policy, then by tightest fit and the
/// global (device, CU) order.
fn pick_candidate(
    inventory: &Inventory,
    candidates: &[CuRef],
    placement_of: impl Fn(CuRef) -> Placement,
    policy: AllocPolicy,
    mode: MatchMode,
    pending: &PendingState,
) -> Option<Placement> {
    candidates
        .iter()
        .filter_map(|cu_ref| {
            let cu = inventory.cu(*cu_ref)?;
            let placement = placement_of(*cu_ref);
            if !pending.is_feasible(*cu_ref, cu, &placement, mode) {
                return None;
            }
            let free = pending.free_in(*cu_ref, cu, placement.scope)?;
            let rank = match policy {
                AllocPolicy::TightestFit => 0,
                AllocPolicy::CuMostUsedFirst => {
                    u64::MAX - pending.used_in(*cu_ref, cu, placement.scope).total_fractions()
                }
                AllocPolicy::CuLeastUsedFirst => {
                    pending.used_in(*cu_ref, cu, placement.scope).total_fractions()
                }
                AllocPolicy::DeviceMostUsedFirst => {
                    u64::MAX - pending.device_used(inventory, cu_ref.device_id).total_fractions()
                }
                AllocPolicy::DeviceLeastUsedFirst => {
                    pending.device_used(inventory, cu_ref.device_id).total_fractions()
                }
            };
            Some(((rank, free, *cu_ref), placement))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, placement)| placement)
}

fn leaf_candidates(
    inventory: &Inventory,
    request: &CuRequest,
    device: Option<DeviceId>,
) -> Vec<CuRef> {
    let mut candidates = inventory.find_candidates(request);
    if let Some(device_id) = device {
        candidates.retain(|c| c.device_id == device_id);
    }
    candidates
}

/// Places one leaf and records it in `pending`.
pub(crate) fn match_leaf(
    inventory: &Inventory,
    request: &CuRequest,
    device: Option<DeviceId>,
    mode: MatchMode,
    pending: &mut PendingState,
) -> crate::Result<Placement> {
    let candidates = leaf_candidates(inventory, request, device);
    if candidates.is_empty() {
        return Err(AllocError::NoMatchingKernel(
            request.display_name().to_string(),
        ));
    }
    let scope = match mode {
        MatchMode::Claim => request.scope(),
        MatchMode::Reserve => Scope::Global,
    };
    let demand = request.demand();
    let placement = pick_candidate(
        inventory,
        &candidates,
        |cu_ref| Placement {
            cu_ref,
            scope,
            demand,
        },
        request.policy,
        mode,
        pending,
    )
    .ok_or_else(|| AllocError::NoFreeChannel(request.display_name().to_string()))?;
    if let Some(cu) = inventory.cu(placement.cu_ref) {
        pending.add(cu, &placement, mode);
    }
    Ok(placement)
}

/// Places all leaves of a list, or none of them.
///
/// On failure `pending` is left as it was before the call.
pub(crate) fn match_list(
    inventory: &Inventory,
    list: &CuListRequest,
    mode: MatchMode,
    pending: &mut PendingState,
) -> crate::Result<Vec<Placement>> {
    if !list.same_device {
        let mut local = pending.clone();
        let placements = list
            .entries
            .iter()
            .map(|rq| match_leaf(inventory, rq, None, mode, &mut local))
            .collect::<crate::Result<Vec<_>>>()?;
        *pending = local;
        return Ok(placements);
    }

    // Devices that host every requested kernel, ignoring load
    let mut hosts: Option<Vec<DeviceId>> = None;
    for rq in &list.entries {
        let mut devices: Vec<DeviceId> = leaf_candidates(inventory, rq, None)
            .into_iter()
            .map(|c| c.device_id)
            .collect();
        if devices.is_empty() {
            return Err(AllocError::NoMatchingKernel(rq.display_name().to_string()));
        }
        devices.dedup();
        hosts = Some(match hosts {
            None => devices,
            Some(mut hosts) => {
                hosts.retain(|d| devices.contains(d));
                hosts
            }
        });
    }
    let hosts = hosts.unwrap_or_default();
    if hosts.is_empty() {
        return Err(AllocError::NoMatchingDevice);
    }
    for device_id in &hosts {
        let mut local = pending.clone();
        let placements = list
            .entries
            .iter()
            .map(|rq| match_leaf(inventory, rq, Some(*device_id), mode, &mut local))
            .collect::<crate::Result<Vec<_>>>();
        if let Ok(placements) = placements {
            *pending = local;
            return Ok(placements);
        }
    }
    Err(AllocError::NoFreeChannel(
        list.entries
            .first()
            .map(|rq| rq.display_name().to_string())
            .unwrap_or_default(),
    ))
}

/// Finds an idle enabled device loaded with the image and plans reserving all of its CUs.
pub(crate) fn match_image(
    inventory: &Inventory,
    image_uuid: &ImageUuid,
    pending: &mut PendingState,
) -> Option<Vec<Placement>> {
    let device = inventory.devices().iter().find(|d| {
        d.is_enabled()
            && d.image_uuid() == image_uuid
            && !d.cus().is_empty()
            && d.is_idle()
            && d.cus()
                .iter()
                .all(|cu| pending.get(CuRef::new(d.device_id(), cu.cu_id())).is_none())
    })?;
    let placements: Vec<Placement> = device
        .cus()
        .iter()
        .map(|cu| Placement {
            cu_ref: CuRef::new(device.device_id(), cu.cu_id()),
            scope: Scope::Global,
            demand: LoadDemand::Exclusive,
        })
        .collect();
    for (p, cu) in placements.iter().zip(device.cus()) {
        pending.add(cu, p, MatchMode::Reserve);
    }
    Some(placements)
}
