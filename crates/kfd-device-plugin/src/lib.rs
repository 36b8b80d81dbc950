//! Kubernetes device plugin advertising AMD GPUs driven by the ROCm KFD
//! kernel driver.
//!
//! The pieces, leaves first:
//! - [`hardware`]: counts GPU nodes from the KFD topology and probes `/dev/kfd`
//! - [`heartbeat`]: broadcast ticker driving periodic health checks
//! - [`discovery`]: announces the `gpu` resource kind and builds its plugin
//! - [`plugin`]: per-kind `ListAndWatch` sessions and stateless allocation
//! - [`manager`]: serves plugins on unix sockets and registers them with the kubelet

pub mod api;
pub mod app;
pub mod config;
pub mod discovery;
pub mod hardware;
pub mod heartbeat;
pub mod manager;
pub mod plugin;
