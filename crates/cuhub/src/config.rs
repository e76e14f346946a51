//! Service configuration loaded from a TOML file.
//!
//! The file lists the devices that are loaded when the service starts and the
//! group templates that are declared up front.

use std::path::Path;

use cualloc::inventory::{CuDescriptor, CuType, ImageUuid, Inventory, LoadAmount, MemBank};
use cualloc::limits::MAX_LIMIT_CONCURRENT_CLIENTS;
use cualloc::{
    AllocPolicy, Core, CuListRequest, CuRequest, DeviceId, GroupTemplate, Set, declare_group,
};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::common::error::config_error;

fn default_limit_concurrent_clients() -> u32 {
    cualloc::limits::DEFAULT_LIMIT_CONCURRENT_CLIENTS
}

fn default_percent() -> u32 {
    100
}

fn default_cu_type() -> CuType {
    CuType::IpKernel
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_limit_concurrent_clients")]
    pub limit_concurrent_clients: u32,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            log_level: None,
            limit_concurrent_clients: default_limit_concurrent_clients(),
            devices: Vec::new(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub id: u32,
    pub image_uuid: String,
    #[serde(default, rename = "cu")]
    pub cus: Vec<CuConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CuConfig {
    pub kernel_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default = "default_cu_type")]
    pub cu_type: CuType,
    /// Percent
    #[serde(default = "default_percent")]
    pub capacity: u32,
    #[serde(default)]
    pub base_address: u64,
    #[serde(default)]
    pub membank: MemBank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(rename = "option")]
    pub options: Vec<GroupOptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupOptionConfig {
    #[serde(default)]
    pub same_device: bool,
    #[serde(rename = "cu")]
    pub cus: Vec<GroupCuConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupCuConfig {
    #[serde(default)]
    pub kernel_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub cu_type: Option<CuType>,
    /// Pins the entry to one device
    #[serde(default)]
    pub device: Option<u32>,
    #[serde(default)]
    pub policy: AllocPolicy,
    /// Percent, ignored for exclusive entries
    #[serde(default = "default_percent")]
    pub load: u32,
    #[serde(default)]
    pub exclusive: bool,
}

impl CuConfig {
    fn to_descriptor(&self) -> CuDescriptor {
        CuDescriptor {
            kernel_name: self.kernel_name.clone(),
            kernel_alias: self.alias.clone(),
            instance_name: self.instance_name.clone(),
            cu_type: self.cu_type,
            capacity: LoadAmount::new_percent(self.capacity),
            base_address: self.base_address,
            membank: self.membank,
        }
    }
}

impl GroupConfig {
    fn to_template(&self) -> GroupTemplate {
        let options = self
            .options
            .iter()
            .map(|option| {
                let entries = option
                    .cus
                    .iter()
                    .map(|cu| CuRequest {
                        kernel_name: cu.kernel_name.clone(),
                        kernel_alias: cu.alias.clone(),
                        instance_name: cu.instance_name.clone(),
                        cu_type: cu.cu_type,
                        exclusive: cu.exclusive,
                        load: LoadAmount::new_percent(cu.load),
                        pool_id: None,
                        device_id: cu.device.map(DeviceId::new),
                        policy: cu.policy,
                    })
                    .collect();
                CuListRequest::new(entries, option.same_device)
            })
            .collect();
        GroupTemplate::new(self.name.clone(), options)
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        log::debug!(
            "Configuration loaded from {}: {} devices, {} groups",
            path.display(),
            config.devices.len(),
            config.groups.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.limit_concurrent_clients == 0
            || self.limit_concurrent_clients > MAX_LIMIT_CONCURRENT_CLIENTS
        {
            return config_error(format!(
                "limit_concurrent_clients must be in 1..={MAX_LIMIT_CONCURRENT_CLIENTS}, got {}",
                self.limit_concurrent_clients
            ));
        }
        if let Some(level) = &self.log_level {
            if level.parse::<LevelFilter>().is_err() {
                return config_error(format!("log_level: unknown level '{level}'"));
            }
        }
        let mut ids = Set::new();
        for device in &self.devices {
            if !ids.insert(device.id) {
                return config_error(format!("device: id {} is listed twice", device.id));
            }
            if device.image_uuid.is_empty() {
                return config_error(format!("device {}: empty image_uuid", device.id));
            }
            for cu in &device.cus {
                if cu.capacity == 0 || cu.capacity > 100 {
                    return config_error(format!(
                        "device {}: capacity of '{}' must be in 1..=100",
                        device.id, cu.kernel_name
                    ));
                }
            }
        }
        let mut names = Set::new();
        for group in &self.groups {
            if !names.insert(group.name.as_str()) {
                return config_error(format!("group: '{}' is declared twice", group.name));
            }
            group
                .to_template()
                .validate()
                .map_err(|e| crate::HubError::ConfigError(format!("group '{}': {e}", group.name)))?;
        }
        Ok(())
    }

    pub fn log_level_filter(&self) -> Option<LevelFilter> {
        self.log_level.as_ref().and_then(|l| l.parse().ok())
    }

    /// Loads all configured devices and declares the configured groups.
    pub fn build_core(&self) -> crate::Result<Core> {
        let mut inventory = Inventory::default();
        for device in &self.devices {
            inventory.add_device(
                device.id.into(),
                ImageUuid::new(device.image_uuid.clone()),
                device.cus.iter().map(|cu| cu.to_descriptor()).collect(),
            )?;
        }
        let mut core = Core::new(inventory);
        for group in &self.groups {
            declare_group(&mut core, group.to_template())?;
        }
        Ok(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::parse("").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.log_level_filter(), None);
        assert!(config.build_core().unwrap().inventory().devices().is_empty());
    }

    #[test]
    fn test_invalid_values() {
        assert!(HubConfig::parse("limit_concurrent_clients = 0").is_err());
        assert!(HubConfig::parse("log_level = \"loud\"").is_err());
        assert!(HubConfig::parse("unknown_field = 1").is_err());
        let duplicate = r#"
[[device]]
id = 1
image_uuid = "a"
[[device]]
id = 1
image_uuid = "b"
"#;
        assert!(matches!(
            HubConfig::parse(duplicate),
            Err(crate::HubError::ConfigError(_))
        ));
    }
}
