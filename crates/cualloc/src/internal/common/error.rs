use crate::internal::common::ids::{AllocServiceId, DeviceId, PoolId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integer status codes reported at the client boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    GenericError = -1,
    InvalidArgument = -2,
    NoMatchingDevice = -3,
    NoMatchingKernel = -4,
    NoFreeChannel = -5,
    DeviceNotLoaded = -31,
    DeviceBusy = -32,
}

impl ErrorCode {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn of<T>(result: &crate::Result<T>) -> ErrorCode {
        match result {
            Ok(_) => ErrorCode::Success,
            Err(e) => e.code(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No single device can host the whole request")]
    NoMatchingDevice,
    #[error("No compute unit matches '{0}'")]
    NoMatchingKernel(String),
    #[error("No free capacity on compute units matching '{0}'")]
    NoFreeChannel(String),
    #[error("Device {0} is not loaded")]
    DeviceNotLoaded(DeviceId),
    #[error("Device {0} is busy")]
    DeviceBusy(DeviceId),
    #[error("Allocation {0} is not outstanding")]
    UnknownAllocation(AllocServiceId),
    #[error("Reservation pool {0} does not exist")]
    UnknownPool(PoolId),
    #[error("Reservation pool {0} still has outstanding allocations")]
    PoolInUse(PoolId),
    #[error("Group template '{0}' is not declared")]
    UnknownTemplate(String),
    #[error("Group template '{0}' is in use")]
    TemplateInUse(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl AllocError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AllocError::InvalidArgument(_)
            | AllocError::UnknownAllocation(_)
            | AllocError::UnknownPool(_)
            | AllocError::UnknownTemplate(_) => ErrorCode::InvalidArgument,
            AllocError::NoMatchingDevice => ErrorCode::NoMatchingDevice,
            AllocError::NoMatchingKernel(_) => ErrorCode::NoMatchingKernel,
            AllocError::NoFreeChannel(_) => ErrorCode::NoFreeChannel,
            AllocError::DeviceNotLoaded(_) => ErrorCode::DeviceNotLoaded,
            AllocError::DeviceBusy(_) => ErrorCode::DeviceBusy,
            AllocError::PoolInUse(_) | AllocError::TemplateInUse(_) | AllocError::GenericError(_) => {
                ErrorCode::GenericError
            }
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AllocError::InvalidArgument(message.into())
    }
}

impl From<String> for AllocError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for AllocError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::of(&Ok::<(), AllocError>(())).as_i32(), 0);
        assert_eq!(AllocError::invalid("x").code().as_i32(), -2);
        assert_eq!(AllocError::NoMatchingDevice.code().as_i32(), -3);
        assert_eq!(AllocError::NoMatchingKernel("k".into()).code().as_i32(), -4);
        assert_eq!(AllocError::NoFreeChannel("k".into()).code().as_i32(), -5);
        assert_eq!(AllocError::UnknownPool(PoolId::new(3)).code().as_i32(), -2);
        assert_eq!(AllocError::PoolInUse(PoolId::new(3)).code().as_i32(), -1);
        assert_eq!(AllocError::DeviceBusy(DeviceId::new(0)).code().as_i32(), -32);
    }
}
