//! Concrete attach-event sources and serial resolvers.

#[cfg(target_os = "linux")]
pub mod linux;
