#[macro_use]
pub(crate) mod common;
pub mod allocator;
pub mod core;
pub mod groups;
pub mod inventory;
pub(crate) mod matcher;
pub mod plugin;
pub mod pools;
pub mod registry;
pub mod request;

#[cfg(test)]
pub(crate) mod tests;
