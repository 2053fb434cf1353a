pub mod postgres;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
