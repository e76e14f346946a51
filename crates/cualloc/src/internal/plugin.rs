//! Named capability extensions callable through a bounded byte-buffer interface.

use crate::internal::common::Map;
use crate::internal::common::error::AllocError;
use crate::internal::common::limits::{
    MAX_NAME_LEN, MAX_PLUGIN_FUNC_ID, MAX_PLUGIN_NUM, MAX_PLUGIN_PARAM_LEN,
};

pub type PluginFuncId = u32;

pub trait Plugin: Send + Sync {
    fn plugin_version(&self) -> u32 {
        1
    }

    /// Whether the function slot `func_id` is populated.
    fn implements(&self, func_id: PluginFuncId) -> bool;

    fn call(&self, func_id: PluginFuncId, input: &[u8]) -> Result<Vec<u8>, String>;
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Map<String, Box<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

fn check_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(AllocError::invalid(format!("Invalid plugin name '{name}'")));
    }
    Ok(())
}

impl PluginRegistry {
    pub fn register(&mut self, name: &str, plugin: Box<dyn Plugin>) -> crate::Result<()> {
        check_name(name)?;
        if self.plugins.contains_key(name) {
            return Err(AllocError::invalid(format!(
                "Plugin '{name}' is already loaded"
            )));
        }
        if self.plugins.len() >= MAX_PLUGIN_NUM {
            return Err(AllocError::invalid(format!(
                "At most {MAX_PLUGIN_NUM} plugins can be loaded"
            )));
        }
        log::info!(
            "Plugin '{name}' loaded (version {})",
            plugin.plugin_version()
        );
        self.plugins.insert(name.to_string(), plugin);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> crate::Result<()> {
        self.plugins
            .remove(name)
            .map(|_| log::info!("Plugin '{name}' unloaded"))
            .ok_or_else(|| AllocError::invalid(format!("Plugin '{name}' is not loaded")))
    }

    /// Sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn execute(
        &self,
        name: &str,
        func_id: PluginFuncId,
        input: &[u8],
    ) -> crate::Result<Vec<u8>> {
        check_name(name)?;
        if func_id > MAX_PLUGIN_FUNC_ID {
            return Err(AllocError::invalid(format!(
                "Plugin function id {func_id} is out of range"
            )));
        }
        if input.len() > MAX_PLUGIN_PARAM_LEN {
            return Err(AllocError::invalid(format!(
                "Plugin input has {} bytes, limit is {MAX_PLUGIN_PARAM_LEN}",
                input.len()
            )));
        }
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| AllocError::invalid(format!("Plugin '{name}' is not loaded")))?;
        if !plugin.implements(func_id) {
            return Err(AllocError::invalid(format!(
                "Plugin '{name}' does not implement function {func_id}"
            )));
        }
        let output = plugin.call(func_id, input).map_err(|e| {
            log::warn!("Plugin '{name}' function {func_id} failed: {e}");
            AllocError::GenericError(e)
        })?;
        if output.len() > MAX_PLUGIN_PARAM_LEN {
            return Err(AllocError::GenericError(format!(
                "Plugin '{name}' returned {} bytes, limit is {MAX_PLUGIN_PARAM_LEN}",
                output.len()
            )));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Plugin for Echo {
        fn implements(&self, func_id: PluginFuncId) -> bool {
            func_id <= 1
        }

        fn call(&self, func_id: PluginFuncId, input: &[u8]) -> Result<Vec<u8>, String> {
            match func_id {
                0 => Ok(input.to_vec()),
                _ => Ok(vec![0; MAX_PLUGIN_PARAM_LEN + 1]),
            }
        }
    }

    #[test]
    fn test_plugin_execute() {
        let mut registry = PluginRegistry::default();
        registry.register("echo", Box::new(Echo)).unwrap();
        assert!(registry.register("echo", Box::new(Echo)).is_err());
        assert_eq!(registry.execute("echo", 0, b"hello").unwrap(), b"hello");
        assert_eq!(
            registry.execute("echo", 1, b"").unwrap_err().code().as_i32(),
            -1
        );
        assert_eq!(
            registry.execute("echo", 2, b"").unwrap_err().code().as_i32(),
            -2
        );
        assert!(registry.execute("echo", 8, b"").is_err());
        assert!(
            registry
                .execute("echo", 0, &vec![0; MAX_PLUGIN_PARAM_LEN + 1])
                .is_err()
        );
        assert!(registry.execute("missing", 0, b"").is_err());
        registry.unregister("echo").unwrap();
        assert!(registry.names().is_empty());
    }
}
