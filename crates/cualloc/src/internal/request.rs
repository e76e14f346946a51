use crate::internal::common::error::AllocError;
use crate::internal::common::ids::{DeviceId, PoolId};
use crate::internal::common::limits::{MAX_LIST_CU_NUM, MAX_NAME_LEN};
use crate::internal::inventory::cu::{CuType, LoadDemand, Scope};
use crate::internal::inventory::device::ImageUuid;
use crate::internal::inventory::load::LoadAmount;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Order in which matching compute units are tried.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocPolicy {
    /// Least free capacity within the request's scope first
    #[default]
    TightestFit,
    CuMostUsedFirst,
    CuLeastUsedFirst,
    /// Compute units of the device with the highest total load first
    DeviceMostUsedFirst,
    DeviceLeastUsedFirst,
}

/// Request for a share of one compute unit.
///
/// A compute unit matches when every non-empty identity field (kernel name,
/// alias, instance name) equals its counterpart and the CU type agrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned")]
pub struct CuRequest {
    #[builder(default, setter(into))]
    #[serde(default)]
    pub kernel_name: String,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub kernel_alias: String,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub instance_name: String,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub cu_type: Option<CuType>,
    #[builder(default)]
    #[serde(default)]
    pub exclusive: bool,
    /// Ignored for exclusive requests
    #[builder(default = "LoadAmount::FULL", setter(into))]
    pub load: LoadAmount,
    /// `None` (or zero) draws from the global inventory
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub pool_id: Option<PoolId>,
    /// Only compute units of this device are considered
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[builder(default)]
    #[serde(default)]
    pub policy: AllocPolicy,
}

impl Default for CuRequest {
    fn default() -> Self {
        CuRequest {
            kernel_name: String::new(),
            kernel_alias: String::new(),
            instance_name: String::new(),
            cu_type: None,
            exclusive: false,
            load: LoadAmount::FULL,
            pool_id: None,
            device_id: None,
            policy: AllocPolicy::TightestFit,
        }
    }
}

impl CuRequest {
    pub fn shared(kernel_name: impl Into<String>, load: impl Into<LoadAmount>) -> Self {
        CuRequest {
            kernel_name: kernel_name.into(),
            load: load.into(),
            ..Default::default()
        }
    }

    pub fn exclusive(kernel_name: impl Into<String>) -> Self {
        CuRequest {
            kernel_name: kernel_name.into(),
            exclusive: true,
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool_id: PoolId) -> Self {
        self.pool_id = Some(pool_id);
        self
    }

    pub fn with_alias(mut self, kernel_alias: impl Into<String>) -> Self {
        self.kernel_alias = kernel_alias.into();
        self
    }

    pub fn with_instance(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    pub fn on_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_policy(mut self, policy: AllocPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn scope(&self) -> Scope {
        Scope::from(self.pool_id.filter(|p| p.as_num() != 0))
    }

    pub fn demand(&self) -> LoadDemand {
        if self.exclusive {
            LoadDemand::Exclusive
        } else {
            LoadDemand::Shared(self.load)
        }
    }

    /// Name used in error messages
    pub fn display_name(&self) -> &str {
        [&self.kernel_alias, &self.kernel_name, &self.instance_name]
            .into_iter()
            .find(|name| !name.is_empty())
            .map(|name| name.as_str())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.kernel_name.is_empty()
            && self.kernel_alias.is_empty()
            && self.instance_name.is_empty()
        {
            return Err(AllocError::invalid(
                "None of kernel name, alias and instance name is specified",
            ));
        }
        if [&self.kernel_name, &self.kernel_alias, &self.instance_name]
            .iter()
            .any(|name| name.len() > MAX_NAME_LEN)
        {
            return Err(AllocError::invalid(format!(
                "Kernel name, alias or instance name is longer than {MAX_NAME_LEN} bytes"
            )));
        }
        if !self.exclusive && (self.load.is_zero() || self.load > LoadAmount::FULL) {
            return Err(AllocError::invalid(format!(
                "Invalid load {} for kernel '{}'",
                self.load,
                self.display_name()
            )));
        }
        Ok(())
    }
}

/// Ordered list of CU requests that are allocated together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuListRequest {
    pub entries: Vec<CuRequest>,
    #[serde(default)]
    pub same_device: bool,
}

impl CuListRequest {
    pub fn new(entries: Vec<CuRequest>, same_device: bool) -> Self {
        CuListRequest {
            entries,
            same_device,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.entries.is_empty() || self.entries.len() > MAX_LIST_CU_NUM {
            return Err(AllocError::invalid(format!(
                "CU list must have 1..={MAX_LIST_CU_NUM} entries, got {}",
                self.entries.len()
            )));
        }
        self.entries.iter().try_for_each(|e| e.validate())
    }
}

/// Whole idle devices loaded with the given image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReservation {
    pub image_uuid: ImageUuid,
    pub count: u32,
}

/// Shape of a reservation pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRequest {
    /// May be empty when only whole images are reserved
    pub list: CuListRequest,
    /// How many times the list is reserved
    pub list_count: u32,
    #[serde(default)]
    pub image: Option<ImageReservation>,
}

impl PoolRequest {
    pub fn from_list(list: CuListRequest, list_count: u32) -> Self {
        PoolRequest {
            list,
            list_count,
            image: None,
        }
    }

    pub fn from_image(image_uuid: ImageUuid, count: u32) -> Self {
        PoolRequest {
            list: CuListRequest::default(),
            list_count: 0,
            image: Some(ImageReservation { image_uuid, count }),
        }
    }

    pub(crate) fn image_count(&self) -> u32 {
        self.image.as_ref().map(|i| i.count).unwrap_or(0)
    }

    pub(crate) fn list_count(&self) -> u32 {
        if self.list.entries.is_empty() {
            0
        } else {
            self.list_count
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !self.list.entries.is_empty() {
            self.list.validate()?;
            if self.list_count == 0 {
                return Err(AllocError::invalid("CU list repeat count is zero"));
            }
            if self.list.entries.iter().any(|e| e.scope() != Scope::Global) {
                return Err(AllocError::invalid(
                    "A pool can be reserved only from the global inventory",
                ));
            }
        }
        if let Some(image) = &self.image {
            if image.image_uuid.as_str().is_empty() {
                return Err(AllocError::invalid("Empty image uuid"));
            }
        }
        if self.list_count() == 0 && self.image_count() == 0 {
            return Err(AllocError::invalid("Pool request reserves nothing"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cu_request() {
        assert!(CuRequest::shared("scaler", 45).validate().is_ok());
        assert!(CuRequest::shared("", 45).validate().is_err());
        assert!(
            CuRequest::shared("", 45)
                .with_alias("SCALER")
                .validate()
                .is_ok()
        );
        assert!(CuRequest::shared("scaler", 0).validate().is_err());
        assert!(CuRequest::shared("scaler", 101).validate().is_err());
        assert!(
            CuRequest::shared("x".repeat(MAX_NAME_LEN + 1), 1)
                .validate()
                .is_err()
        );
        let by_instance = CuRequest::default().with_instance("scaler_1");
        assert!(by_instance.validate().is_ok());
        assert_eq!(by_instance.display_name(), "scaler_1");
        assert!(CuRequest::default().validate().is_err());

        let mut rq = CuRequest::exclusive("scaler");
        rq.load = LoadAmount::ZERO;
        assert!(rq.validate().is_ok());
        assert_eq!(rq.demand(), LoadDemand::Exclusive);
    }

    #[test]
    fn test_zero_pool_is_global() {
        let rq = CuRequest::shared("scaler", 10).with_pool(PoolId::new(0));
        assert_eq!(rq.scope(), Scope::Global);
        let rq = CuRequest::shared("scaler", 10).with_pool(PoolId::new(2));
        assert_eq!(rq.scope(), Scope::Pool(PoolId::new(2)));
    }

    #[test]
    fn test_validate_list_and_pool() {
        assert!(CuListRequest::new(vec![], false).validate().is_err());
        let list = CuListRequest::new(
            (0..MAX_LIST_CU_NUM + 1)
                .map(|_| CuRequest::shared("a", 1))
                .collect(),
            false,
        );
        assert!(list.validate().is_err());

        let list = CuListRequest::new(vec![CuRequest::shared("a", 1)], false);
        assert!(PoolRequest::from_list(list.clone(), 0).validate().is_err());
        assert!(PoolRequest::from_list(list, 2).validate().is_ok());
        assert!(
            PoolRequest::from_image(ImageUuid::new("u"), 0)
                .validate()
                .is_err()
        );
        let pooled = CuListRequest::new(
            vec![CuRequest::shared("a", 1).with_pool(PoolId::new(1))],
            false,
        );
        assert!(PoolRequest::from_list(pooled, 1).validate().is_err());
    }
}
