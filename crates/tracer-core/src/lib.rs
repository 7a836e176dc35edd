pub mod context;
pub mod event;
pub mod guard;
pub mod payload;
pub mod pdk;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
