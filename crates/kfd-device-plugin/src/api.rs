//! Generated kubelet device plugin API (v1beta1).
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

tonic::include_proto!("v1beta1");

/// API version sent on registration.
pub const VERSION: &str = "v1beta1";
