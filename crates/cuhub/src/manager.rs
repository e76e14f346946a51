//! Thread-safe front of the allocation engine.
//!
//! All engine state lives in one [`Core`] behind a read-write lock. Every
//! mutating request is one critical section under the write lock, so each
//! transaction sees and leaves a consistent inventory. Availability checks and
//! queries only take the read lock.

use parking_lot::{Mutex, RwLock};

use cualloc::inventory::{CuDescriptor, ImageUuid, LoadAmount};
use cualloc::limits::MAX_LIMIT_CONCURRENT_CLIENTS;
use cualloc::{
    AllocError, AllocServiceId, AllocationRecord, ClientId, Core, CoreSnapshot, CuListRequest,
    CuRequest, CuStatus, DeviceId, GroupTemplate, Plugin, PluginFuncId, PluginRegistry,
    PoolCuSlice, PoolId, PoolRequest, Set,
};

use crate::config::HubConfig;

#[derive(Debug, Default)]
struct ClientTable {
    last_id: u64,
    active: Set<ClientId>,
}

pub struct Manager {
    core: RwLock<Core>,
    plugins: RwLock<PluginRegistry>,
    clients: Mutex<ClientTable>,
    limit_concurrent_clients: u32,
}

impl Manager {
    pub fn new(core: Core, limit_concurrent_clients: u32) -> Self {
        Manager {
            core: RwLock::new(core),
            plugins: RwLock::new(PluginRegistry::default()),
            clients: Mutex::new(ClientTable::default()),
            limit_concurrent_clients: limit_concurrent_clients.min(MAX_LIMIT_CONCURRENT_CLIENTS),
        }
    }

    /// Starts the service state from a configuration.
    pub fn init(config: &HubConfig) -> crate::Result<Self> {
        config.validate()?;
        let core = config.build_core()?;
        log::info!(
            "Manager started with {} devices and {} groups",
            core.inventory().devices().len(),
            core.templates().len()
        );
        Ok(Manager::new(core, config.limit_concurrent_clients))
    }

    /// Recycles all remaining clients and returns the final state.
    pub fn teardown(self) -> CoreSnapshot {
        let mut core = self.core.into_inner();
        let clients = self.clients.into_inner();
        let mut ids: Vec<ClientId> = clients.active.iter().copied().collect();
        ids.sort_unstable();
        for client_id in ids {
            cualloc::recycle_client(&mut core, client_id);
        }
        let snapshot = core.snapshot();
        log::info!(
            "Manager stopped, {} allocations and {} pools left",
            snapshot.outstanding_allocations,
            snapshot.pools.len()
        );
        snapshot
    }

    // Client sessions

    pub fn open_client(&self) -> cualloc::Result<ClientId> {
        let mut clients = self.clients.lock();
        if clients.active.len() >= self.limit_concurrent_clients as usize {
            log::warn!(
                "Client rejected, limit of {} concurrent clients reached",
                self.limit_concurrent_clients
            );
            return Err(AllocError::GenericError(
                "Too many concurrent clients".to_string(),
            ));
        }
        loop {
            clients.last_id = clients.last_id.checked_add(1).unwrap_or(1);
            let client_id = ClientId::new(clients.last_id);
            if clients.active.insert(client_id) {
                log::debug!("Client {client_id} connected");
                return Ok(client_id);
            }
        }
    }

    /// Releases everything the client still holds and ends its session.
    pub fn close_client(&self, client_id: ClientId) -> cualloc::Result<(usize, usize)> {
        let mut core = self.core.write();
        if !self.clients.lock().active.remove(&client_id) {
            return Err(AllocError::InvalidArgument(format!(
                "Client {client_id} is not connected"
            )));
        }
        let recycled = cualloc::recycle_client(&mut core, client_id);
        log::debug!("Client {client_id} disconnected");
        Ok(recycled)
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().active.len()
    }

    /// Runs a mutating engine operation on behalf of a connected client.
    fn with_client<T>(
        &self,
        client_id: ClientId,
        f: impl FnOnce(&mut Core) -> cualloc::Result<T>,
    ) -> cualloc::Result<T> {
        let mut core = self.core.write();
        if !self.clients.lock().active.contains(&client_id) {
            return Err(AllocError::InvalidArgument(format!(
                "Client {client_id} is not connected"
            )));
        }
        f(&mut core)
    }

    // Device lifecycle

    pub fn add_device(
        &self,
        device_id: DeviceId,
        image_uuid: ImageUuid,
        cus: Vec<CuDescriptor>,
    ) -> cualloc::Result<()> {
        self.core
            .write()
            .inventory_mut()
            .add_device(device_id, image_uuid, cus)
    }

    pub fn remove_device(&self, device_id: DeviceId) -> cualloc::Result<()> {
        self.core
            .write()
            .inventory_mut()
            .remove_device(device_id)
            .map(|_| ())
    }

    pub fn set_device_enabled(&self, device_id: DeviceId, enabled: bool) -> cualloc::Result<()> {
        self.core
            .write()
            .inventory_mut()
            .set_device_enabled(device_id, enabled)
    }

    // Allocation

    pub fn allocate_cu(
        &self,
        client_id: ClientId,
        request: &CuRequest,
    ) -> cualloc::Result<AllocationRecord> {
        self.with_client(client_id, |core| {
            cualloc::allocate_cu(core, request, client_id)
        })
    }

    pub fn allocate_from_device(
        &self,
        client_id: ClientId,
        device_id: DeviceId,
        request: &CuRequest,
    ) -> cualloc::Result<AllocationRecord> {
        self.with_client(client_id, |core| {
            cualloc::allocate_from_device(core, device_id, request, client_id)
        })
    }

    pub fn allocate_list(
        &self,
        client_id: ClientId,
        list: &CuListRequest,
    ) -> cualloc::Result<Vec<AllocationRecord>> {
        self.with_client(client_id, |core| {
            cualloc::allocate_list(core, list, client_id)
        })
    }

    pub fn allocate_group(
        &self,
        client_id: ClientId,
        name: &str,
        pool_id: Option<PoolId>,
    ) -> cualloc::Result<Vec<AllocationRecord>> {
        self.with_client(client_id, |core| {
            cualloc::allocate_group(core, name, pool_id, client_id)
        })
    }

    pub fn release(&self, alloc_service_id: AllocServiceId) -> cualloc::Result<()> {
        cualloc::release(&mut self.core.write(), alloc_service_id).map(|_| ())
    }

    pub fn release_cu(&self, record: &AllocationRecord) -> cualloc::Result<()> {
        cualloc::release_cu(&mut self.core.write(), record)
    }

    pub fn query(
        &self,
        alloc_service_id: AllocServiceId,
        kernel_name: &str,
        kernel_alias: &str,
    ) -> cualloc::Result<Vec<AllocationRecord>> {
        cualloc::query(&self.core.read(), alloc_service_id, kernel_name, kernel_alias)
    }

    pub fn check_status(&self, record: &AllocationRecord) -> cualloc::Result<CuStatus> {
        cualloc::check_status(&self.core.read(), record)
    }

    // Reservation pools

    pub fn reserve_pool(
        &self,
        client_id: ClientId,
        request: &PoolRequest,
    ) -> cualloc::Result<PoolId> {
        self.with_client(client_id, |core| {
            cualloc::reserve_pool(core, request, client_id)
        })
    }

    pub fn relinquish_pool(&self, pool_id: PoolId) -> cualloc::Result<()> {
        cualloc::relinquish_pool(&mut self.core.write(), pool_id)
    }

    pub fn query_pool(&self, pool_id: PoolId) -> cualloc::Result<Vec<PoolCuSlice>> {
        cualloc::query_pool(&self.core.read(), pool_id)
    }

    // Group templates

    pub fn declare_group(&self, template: GroupTemplate) -> cualloc::Result<()> {
        cualloc::declare_group(&mut self.core.write(), template)
    }

    pub fn undeclare_group(&self, name: &str) -> cualloc::Result<()> {
        cualloc::undeclare_group(&mut self.core.write(), name).map(|_| ())
    }

    // Read-only checks

    pub fn is_cu_existing(&self, request: &CuRequest) -> cualloc::Result<bool> {
        cualloc::is_cu_existing(&self.core.read(), request)
    }

    pub fn is_cu_list_existing(&self, list: &CuListRequest) -> cualloc::Result<bool> {
        cualloc::is_cu_list_existing(&self.core.read(), list)
    }

    pub fn is_group_existing(&self, name: &str) -> bool {
        cualloc::is_group_existing(&self.core.read(), name)
    }

    pub fn cu_max_capacity(&self, request: &CuRequest) -> cualloc::Result<LoadAmount> {
        cualloc::cu_max_capacity(&self.core.read(), request)
    }

    pub fn check_cu_available_num(&self, request: &CuRequest) -> cualloc::Result<u32> {
        cualloc::check_cu_available_num(&self.core.read(), request)
    }

    pub fn check_list_available_num(&self, list: &CuListRequest) -> cualloc::Result<u32> {
        cualloc::check_list_available_num(&self.core.read(), list)
    }

    pub fn check_pool_available_num(&self, request: &PoolRequest) -> cualloc::Result<u32> {
        cualloc::check_pool_available_num(&self.core.read(), request)
    }

    pub fn check_group_available_num(
        &self,
        name: &str,
        pool_id: Option<PoolId>,
    ) -> cualloc::Result<u32> {
        cualloc::check_group_available_num(&self.core.read(), name, pool_id)
    }

    // Plugins

    pub fn register_plugin(&self, name: &str, plugin: Box<dyn Plugin>) -> cualloc::Result<()> {
        self.plugins.write().register(name, plugin)
    }

    pub fn unregister_plugin(&self, name: &str) -> cualloc::Result<()> {
        self.plugins.write().unregister(name)
    }

    pub fn execute_plugin(
        &self,
        name: &str,
        func_id: PluginFuncId,
        input: &[u8],
    ) -> cualloc::Result<Vec<u8>> {
        self.plugins.read().execute(name, func_id, input)
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        self.core.read().snapshot()
    }

    /// Debug consistency check of the whole engine state.
    pub fn sanity_check(&self) {
        self.core.read().sanity_check();
    }
}
