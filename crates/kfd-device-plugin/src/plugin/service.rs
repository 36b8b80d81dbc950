use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;

use super::allocator;
use super::session::DeviceRecord;
use super::KfdDevicePlugin;
use crate::api;
use crate::api::device_plugin_server::DevicePlugin;
use crate::api::AllocateRequest;
use crate::api::AllocateResponse;
use crate::api::ContainerAllocateResponse;
use crate::api::DevicePluginOptions;
use crate::api::DeviceSpec;
use crate::api::Empty;
use crate::api::ListAndWatchResponse;
use crate::api::PreStartContainerRequest;
use crate::api::PreStartContainerResponse;
use crate::api::PreferredAllocationRequest;
use crate::api::PreferredAllocationResponse;

impl From<DeviceRecord> for api::Device {
    fn from(record: DeviceRecord) -> Self {
        api::Device {
            id: record.id,
            health: record.health.to_string(),
            topology: None,
        }
    }
}

/// kubelet-facing gRPC service of one plugin
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    plugin: Arc<KfdDevicePlugin>,
}

impl DevicePluginService {
    pub fn new(plugin: Arc<KfdDevicePlugin>) -> Self {
        Self { plugin }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(DevicePluginOptions::default()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// Ending this stream deregisters the resource from the kubelet.
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        let kind = self.plugin.kind().clone();
        info!(%kind, "starting to watch device list");

        let (tx, rx) = mpsc::channel(1);
        let session = self.plugin.session();
        tokio::spawn(async move {
            let end = session.run(tx).await;
            info!(%kind, ?end, "device list watch ended");
        });

        let stream = ReceiverStream::new(rx).map(|snapshot| {
            Ok(ListAndWatchResponse {
                devices: snapshot.into_iter().map(api::Device::from).collect(),
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        debug!("getting preferred device allocation: {:?}", request.into_inner());
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();

        let container_responses = req
            .container_requests
            .iter()
            .map(|container_req| {
                info!(
                    kind = %self.plugin.kind(),
                    "allocating devices to container, device IDs: {:?}",
                    container_req.devices_ids
                );
                ContainerAllocateResponse {
                    devices: allocator::allocate(container_req.devices_ids.len())
                        .into_iter()
                        .map(DeviceSpec::from)
                        .collect(),
                    ..Default::default()
                }
            })
            .collect();

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    /// No per-container preparation is needed for KFD devices.
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        debug!("pre-start container: {:?}", request.into_inner());
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
