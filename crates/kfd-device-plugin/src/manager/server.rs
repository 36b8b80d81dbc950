use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tower::service_fn;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ManagerError;
use crate::api;
use crate::api::device_plugin_server::DevicePluginServer;
use crate::api::registration_client::RegistrationClient;
use crate::api::DevicePluginOptions;
use crate::api::RegisterRequest;
use crate::plugin::DevicePluginService;
use crate::plugin::KfdDevicePlugin;

/// gRPC server of one plugin, listening on its own unix socket.
#[derive(Debug)]
pub struct PluginServer {
    plugin: Arc<KfdDevicePlugin>,
    socket_path: PathBuf,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl PluginServer {
    /// Binds `socket_path`, replacing a stale socket, and serves until the
    /// plugin is stopped.
    pub async fn start(
        plugin: Arc<KfdDevicePlugin>,
        socket_path: PathBuf,
    ) -> Result<Self, Report<ManagerError>> {
        info!("start device plugin server: {}", socket_path.display());

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).change_context(ManagerError::SocketBind {
                path: socket_path.clone(),
            })?;
        }
        let listener = UnixListener::bind(&socket_path).change_context(
            ManagerError::SocketBind {
                path: socket_path.clone(),
            },
        )?;

        let service = DevicePluginServer::new(DevicePluginService::new(plugin.clone()));
        let shutdown = plugin.clone();
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    async move {
                        shutdown.stopped().await;
                        info!("shutting down gRPC server");
                    },
                )
                .await
        });

        Ok(Self {
            plugin,
            socket_path,
            handle,
        })
    }

    /// Stops the plugin, waits for the server to drain and removes the socket.
    pub async fn stop(self) {
        self.plugin.stop();
        match self.handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("device plugin server failed: {e}"),
            Err(e) => error!("device plugin server task panicked: {e}"),
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", self.socket_path.display());
            }
        }
    }
}

/// Registers `resource_name`, served at `endpoint` (relative to the device
/// plugin directory), with the kubelet.
pub async fn register_with_kubelet(
    kubelet_socket: &Path,
    endpoint: &str,
    resource_name: &str,
) -> Result<(), Report<ManagerError>> {
    info!(
        "registering {resource_name} with kubelet: {}",
        kubelet_socket.display()
    );

    let channel = create_uds_channel(kubelet_socket).await?;
    let mut client = RegistrationClient::new(channel);

    let request = RegisterRequest {
        version: api::VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: Some(DevicePluginOptions::default()),
    };

    client
        .register(Request::new(request))
        .await
        .change_context(ManagerError::Registration {
            resource_name: resource_name.to_string(),
        })?;

    info!("successfully registered {resource_name} with kubelet");
    Ok(())
}

/// create Unix Domain Socket client connection
pub async fn create_uds_channel(socket_path: &Path) -> Result<Channel, Report<ManagerError>> {
    let path = socket_path.to_path_buf();

    // the URL is a placeholder, the connector always dials the socket
    Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                match UnixStream::connect(path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }))
        .await
        .change_context(ManagerError::Connect {
            path: socket_path.to_path_buf(),
        })
}
