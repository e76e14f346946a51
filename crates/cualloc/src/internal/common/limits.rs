//! Bounds imposed by the client protocol.
//!
//! Internally every collection is dynamically sized, the bounds are only
//! checked when a request enters the engine.

/// Maximal length of kernel names, aliases, template and plugin names (in bytes).
pub const MAX_NAME_LEN: usize = 256;

/// Maximal number of entries in a CU list request.
pub const MAX_LIST_CU_NUM: usize = 16;

/// Maximal number of alternative options of a group template.
pub const MAX_GROUP_OPTION_NUM: usize = 8;

/// Maximal number of entries in one option of a group template.
pub const MAX_GROUP_CU_NUM: usize = 16;

/// Maximal number of declared group templates.
pub const MAX_GROUP_TEMPLATE_NUM: usize = 32;

/// Maximal number of CU slices returned by a pool query.
pub const MAX_POOL_CU_NUM: usize = 128;

/// Maximal number of concurrent channels on a single compute unit.
pub const MAX_CU_CHANNELS: usize = 1000;

/// Maximal number of reservation pools holding a slice of a single compute unit.
pub const MAX_CU_RESERVES: usize = 1000;

/// Upper bound of all availability counts.
pub const MAX_AVAILABLE_NUM: u32 = 1024;

/// Maximal number of registered plugins.
pub const MAX_PLUGIN_NUM: usize = 32;

/// Plugin function ids are `0..=MAX_PLUGIN_FUNC_ID`.
pub const MAX_PLUGIN_FUNC_ID: u32 = 7;

/// Maximal size of plugin input and output buffers (in bytes).
pub const MAX_PLUGIN_PARAM_LEN: usize = 16 * 1024;

/// Default and maximal number of concurrently connected clients.
pub const DEFAULT_LIMIT_CONCURRENT_CLIENTS: u32 = 40_000;
pub const MAX_LIMIT_CONCURRENT_CLIENTS: u32 = 1_000_000;
