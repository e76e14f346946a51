use std::sync::Arc;
use std::thread;

use cualloc::inventory::{CuDescriptorBuilder, ImageUuid, LoadAmount};
use cualloc::{
    AllocError, CuListRequest, CuRequest, ErrorCode, GroupTemplate, Plugin, PluginFuncId,
    PoolRequest,
};
use cuhub::{HubConfig, Manager};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn manager_with(devices: &[&[&str]]) -> Manager {
    let manager = Manager::init(&HubConfig::default()).unwrap();
    for (idx, cus) in devices.iter().enumerate() {
        manager
            .add_device(
                (idx as u32).into(),
                ImageUuid::new("image"),
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
    }
    manager
}

#[test]
fn test_concurrent_clients_never_overcommit() {
    let manager = Arc::new(manager_with(&[&["scaler", "scaler"], &["scaler"]]));
    let handles: Vec<_> = (0..8)
        .map(|seed| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed);
                let client = manager.open_client().unwrap();
                let mut held = Vec::new();
                for _ in 0..300 {
                    if held.is_empty() || rng.random_bool(0.6) {
                        let load = rng.random_range(5..=40u32);
                        let request = CuRequest::shared("scaler", load);
                        match manager.allocate_cu(client, &request) {
                            Ok(record) => held.push(record),
                            Err(e) => assert_eq!(e.code(), ErrorCode::NoFreeChannel),
                        }
                    } else {
                        let record = held.swap_remove(rng.random_range(0..held.len()));
                        manager.release(record.alloc_service_id).unwrap();
                    }
                    let snapshot = manager.snapshot();
                    for device in &snapshot.devices {
                        for cu in device.cus() {
                            assert!(cu.used_load() <= LoadAmount::FULL);
                        }
                    }
                }
                manager.close_client(client).unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    manager.sanity_check();
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.outstanding_allocations, 0);
    assert!(
        snapshot
            .devices
            .iter()
            .all(|d| d.cus().iter().all(|cu| cu.channels().is_empty()))
    );
}

#[test]
fn test_concurrent_lists_are_atomic() {
    let manager = Arc::new(manager_with(&[&["decoder", "encoder"], &["decoder", "encoder"]]));
    let list = CuListRequest::new(
        vec![
            CuRequest::shared("decoder", 30),
            CuRequest::shared("encoder", 30),
        ],
        true,
    );
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let manager = manager.clone();
            let list = list.clone();
            thread::spawn(move || {
                let client = manager.open_client().unwrap();
                let mut granted = 0;
                for _ in 0..4 {
                    if let Ok(records) = manager.allocate_list(client, &list) {
                        assert_eq!(records.len(), 2);
                        assert_eq!(records[0].device_id, records[1].device_id);
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();
    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Three instances fit on each of the two devices
    assert_eq!(granted, 6);
    assert_eq!(manager.check_list_available_num(&list).unwrap(), 0);
    manager.sanity_check();
}

#[test]
fn test_client_sessions() {
    let manager = manager_with(&[&["scaler"]]);
    let request = CuRequest::shared("scaler", 50);
    let stranger = cualloc::ClientId::new(1000);
    assert_eq!(
        ErrorCode::of(&manager.allocate_cu(stranger, &request)),
        ErrorCode::InvalidArgument
    );

    let client = manager.open_client().unwrap();
    manager.allocate_cu(client, &request).unwrap();
    let pool = manager
        .reserve_pool(
            client,
            &PoolRequest::from_list(CuListRequest::new(vec![request.clone()], false), 1),
        )
        .unwrap();
    manager
        .allocate_cu(client, &CuRequest::shared("scaler", 10).with_pool(pool))
        .unwrap();
    assert_eq!(manager.check_cu_available_num(&request).unwrap(), 0);

    assert_eq!(manager.close_client(client).unwrap(), (2, 1));
    assert!(manager.close_client(client).is_err());
    assert_eq!(manager.check_cu_available_num(&request).unwrap(), 2);
    assert_eq!(manager.client_count(), 0);
}

#[test]
fn test_pool_outlives_its_owner_only_while_used() {
    let manager = manager_with(&[&["scaler"]]);
    let owner = manager.open_client().unwrap();
    let user = manager.open_client().unwrap();
    let pool = manager
        .reserve_pool(
            owner,
            &PoolRequest::from_list(
                CuListRequest::new(vec![CuRequest::shared("scaler", 50)], false),
                1,
            ),
        )
        .unwrap();
    manager
        .allocate_cu(user, &CuRequest::shared("scaler", 10).with_pool(pool))
        .unwrap();

    assert_eq!(manager.close_client(owner).unwrap(), (0, 1));
    assert_eq!(
        manager
            .check_cu_available_num(&CuRequest::shared("scaler", 90))
            .unwrap(),
        1
    );
    assert_eq!(
        manager.allocate_cu(user, &CuRequest::shared("scaler", 10).with_pool(pool)),
        Err(AllocError::UnknownPool(pool))
    );
    manager.sanity_check();

    assert_eq!(manager.close_client(user).unwrap(), (1, 0));
    let client = manager.open_client().unwrap();
    manager
        .allocate_cu(client, &CuRequest::shared("scaler", 100))
        .unwrap();
    assert!(manager.snapshot().pools.is_empty());
    manager.sanity_check();
}

#[test]
fn test_client_limit() {
    let mut config = HubConfig::default();
    config.limit_concurrent_clients = 2;
    let manager = Manager::init(&config).unwrap();
    let a = manager.open_client().unwrap();
    let b = manager.open_client().unwrap();
    assert_ne!(a, b);
    assert!(manager.open_client().is_err());
    manager.close_client(a).unwrap();
    let c = manager.open_client().unwrap();
    assert_ne!(c, a);
}

#[test]
fn test_device_lifecycle_through_manager() {
    let manager = manager_with(&[&["scaler"]]);
    let client = manager.open_client().unwrap();
    let record = manager
        .allocate_cu(client, &CuRequest::shared("scaler", 10))
        .unwrap();
    assert_eq!(
        manager.remove_device(0.into()),
        Err(AllocError::DeviceBusy(0.into()))
    );
    assert_eq!(
        ErrorCode::of(&manager.remove_device(4.into())).as_i32(),
        -31
    );
    manager.release_cu(&record).unwrap();
    manager.remove_device(0.into()).unwrap();
    assert_eq!(
        ErrorCode::of(&manager.allocate_cu(client, &CuRequest::shared("scaler", 10))),
        ErrorCode::NoMatchingKernel
    );
}

#[test]
fn test_groups_and_teardown() {
    let manager = manager_with(&[&["decoder", "scaler"]]);
    manager
        .declare_group(GroupTemplate::new(
            "g",
            vec![CuListRequest::new(
                vec![
                    CuRequest::shared("decoder", 50),
                    CuRequest::shared("scaler", 25),
                ],
                true,
            )],
        ))
        .unwrap();
    assert!(manager.is_group_existing("g"));
    assert_eq!(manager.check_group_available_num("g", None).unwrap(), 2);
    let client = manager.open_client().unwrap();
    let records = manager.allocate_group(client, "g", None).unwrap();
    assert_eq!(
        manager
            .query(records[0].alloc_service_id, "scaler", "")
            .unwrap()
            .len(),
        1
    );
    assert!(manager.undeclare_group("g").is_err());

    let snapshot = manager.teardown();
    assert_eq!(snapshot.outstanding_allocations, 0);
    assert_eq!(snapshot.groups.len(), 1);
}

struct Upper;

impl Plugin for Upper {
    fn implements(&self, func_id: PluginFuncId) -> bool {
        func_id == 0
    }

    fn call(&self, _func_id: PluginFuncId, input: &[u8]) -> Result<Vec<u8>, String> {
        Ok(input.to_ascii_uppercase())
    }
}

#[test]
fn test_plugins() {
    let manager = manager_with(&[]);
    manager.register_plugin("upper", Box::new(Upper)).unwrap();
    assert_eq!(manager.execute_plugin("upper", 0, b"abc").unwrap(), b"ABC");
    assert_eq!(
        ErrorCode::of(&manager.execute_plugin("upper", 3, b"abc")),
        ErrorCode::InvalidArgument
    );
    manager.unregister_plugin("upper").unwrap();
    assert!(manager.execute_plugin("upper", 0, b"abc").is_err());
}
