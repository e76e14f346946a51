use crate::internal::allocator::{allocate_cu, allocate_list, release, release_cu};
use crate::internal::common::ids::{AllocServiceId, PoolId};
use crate::internal::inventory::load::LoadAmount;
use crate::internal::pools::{relinquish_pool, reserve_pool};
use crate::internal::registry::AllocationRecord;
use crate::internal::request::{CuListRequest, CuRequest, PoolRequest};
use crate::internal::tests::utils::{CLIENT, CoreBuilder, list, rq};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const KERNELS: [&str; 3] = ["decoder", "scaler", "encoder"];

fn random_request(rng: &mut SmallRng, pools: &[PoolId]) -> CuRequest {
    let name = KERNELS[rng.random_range(0..KERNELS.len())];
    let mut request = if rng.random_bool(0.1) {
        CuRequest::exclusive(name)
    } else {
        rq(name, LoadAmount::new_percent(rng.random_range(1..=60)))
    };
    if !pools.is_empty() && rng.random_bool(0.3) {
        request.pool_id = Some(pools[rng.random_range(0..pools.len())]);
    }
    request
}

#[test]
fn test_random_operations_keep_invariants() {
    for seed in 0..8 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut core = CoreBuilder::default()
            .device(&["decoder", "scaler", "encoder"])
            .device(&["scaler", "scaler"])
            .device(&["encoder", "decoder"])
            .build();
        let empty = core.inventory().clone();
        let mut allocations: Vec<AllocServiceId> = Vec::new();
        let mut single: Vec<AllocationRecord> = Vec::new();
        let mut pools: Vec<PoolId> = Vec::new();

        for _ in 0..400 {
            match rng.random_range(0..10) {
                0..=2 => {
                    let request = random_request(&mut rng, &pools);
                    if let Ok(record) = allocate_cu(&mut core, &request, CLIENT) {
                        assert!(record.load <= LoadAmount::FULL);
                        if rng.random_bool(0.5) {
                            single.push(record);
                        } else {
                            allocations.push(record.alloc_service_id);
                        }
                    }
                }
                3..=4 => {
                    let count = rng.random_range(1..=4);
                    let entries = (0..count).map(|_| random_request(&mut rng, &pools)).collect();
                    let request = CuListRequest::new(entries, rng.random_bool(0.5));
                    let before = core.inventory().clone();
                    match allocate_list(&mut core, &request, CLIENT) {
                        Ok(records) => {
                            assert_eq!(records.len(), count);
                            if request.same_device {
                                assert!(
                                    records.iter().all(|r| r.device_id == records[0].device_id)
                                );
                            }
                            allocations.push(records[0].alloc_service_id);
                        }
                        Err(_) => assert_eq!(core.inventory(), &before),
                    }
                }
                5..=6 if !allocations.is_empty() => {
                    let id = allocations.swap_remove(rng.random_range(0..allocations.len()));
                    release(&mut core, id).unwrap();
                    assert!(release(&mut core, id).is_err());
                }
                7 if !single.is_empty() => {
                    let record = single.swap_remove(rng.random_range(0..single.len()));
                    release_cu(&mut core, &record).unwrap();
                }
                8 => {
                    let request = PoolRequest::from_list(
                        list(vec![rq(
                            KERNELS[rng.random_range(0..KERNELS.len())],
                            rng.random_range(10..=50u32),
                        )]),
                        rng.random_range(1..=2),
                    );
                    let before = core.inventory().clone();
                    match reserve_pool(&mut core, &request, CLIENT) {
                        Ok(pool_id) => pools.push(pool_id),
                        Err(_) => assert_eq!(core.inventory(), &before),
                    }
                }
                9 if !pools.is_empty() => {
                    let idx = rng.random_range(0..pools.len());
                    if relinquish_pool(&mut core, pools[idx]).is_ok() {
                        pools.swap_remove(idx);
                    }
                }
                _ => {}
            }
            core.sanity_check();
        }

        for id in allocations {
            release(&mut core, id).unwrap();
        }
        for record in single {
            release_cu(&mut core, &record).unwrap();
        }
        for pool_id in pools {
            relinquish_pool(&mut core, pool_id).unwrap();
        }
        assert_eq!(core.inventory(), &empty);
        core.sanity_check();
    }
}
