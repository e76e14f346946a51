use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Create a newtype that will contain an identifier represented by an integer.
#[macro_export]
macro_rules! define_id_type {
    ($name: ident, $type: ident) => {
        #[derive(
            ::std::marker::Copy,
            ::std::clone::Clone,
            ::std::default::Default,
            ::std::fmt::Debug,
            ::std::hash::Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::std::cmp::Ord,
            ::std::cmp::PartialOrd,
            ::std::cmp::Eq,
            ::std::cmp::PartialEq,
        )]
        pub struct $name($type);

        impl $name {
            #[inline]
            pub const fn new(value: $type) -> Self {
                Self(value)
            }

            #[inline]
            pub fn as_num(&self) -> $type {
                self.0
            }
        }

        impl ::std::convert::From<$type> for $name {
            #[inline]
            fn from(value: $type) -> Self {
                Self::new(value)
            }
        }

        impl ::std::convert::From<$name> for $type {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl ::std::fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::std::num::ParseIntError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Ok($name(s.parse::<$type>()?))
            }
        }
    };
}

define_id_type!(DeviceId, u32);
define_id_type!(CuId, u32);
define_id_type!(ChannelId, u32);
// Zero is never handed out for the following ids, it means "none" on the wire.
define_id_type!(PoolId, u64);
define_id_type!(AllocServiceId, u64);
define_id_type!(ClientId, u64);

/// Address of a compute unit inside the inventory.
///
/// The derived ordering (device first, then CU) is the global order used for
/// deterministic tie-breaking.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CuRef {
    pub device_id: DeviceId,
    pub cu_id: CuId,
}

impl CuRef {
    #[inline]
    pub fn new(device_id: DeviceId, cu_id: CuId) -> Self {
        CuRef { device_id, cu_id }
    }
}

impl Display for CuRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device_id, self.cu_id)
    }
}

/// Generator of non-zero 64-bit identifiers that wraps around to 1.
#[derive(Debug, Clone, Default)]
pub(crate) struct WrappingIdCounter {
    last: u64,
}

impl WrappingIdCounter {
    /// Returns the next id for which `in_use` returns false.
    pub fn next(&mut self, in_use: impl Fn(u64) -> bool) -> u64 {
        loop {
            self.last = if self.last == u64::MAX {
                1
            } else {
                self.last + 1
            };
            if !in_use(self.last) {
                return self.last;
            }
        }
    }

    #[cfg(test)]
    pub fn starting_at(last: u64) -> Self {
        WrappingIdCounter { last }
    }
}
