use std::path::Path;
use std::sync::Arc;

#[cfg(unix)]
use dsrpc_transport::UnixDomainSocket;
use tracing::info;

use crate::channel::RpcChannel;
use crate::config::ChannelConfig;
use crate::error::Result;
use crate::sinks::ChannelSinks;
use crate::surface_map::SurfaceMapHandle;

/// Connect to a display server socket with default configuration.
pub fn connect(
    path: impl AsRef<Path>,
    sinks: ChannelSinks,
    surface_map: SurfaceMapHandle,
) -> Result<Arc<RpcChannel>> {
    connect_with_config(path, sinks, surface_map, ChannelConfig::default())
}

/// Connect with explicit configuration.
pub fn connect_with_config(
    path: impl AsRef<Path>,
    sinks: ChannelSinks,
    surface_map: SurfaceMapHandle,
    config: ChannelConfig,
) -> Result<Arc<RpcChannel>> {
    #[cfg(not(unix))]
    {
        let _ = (sinks, surface_map, config);
        let path = path.as_ref().to_path_buf();
        return Err(dsrpc_transport::TransportError::Connect {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "dsrpc requires Unix domain sockets",
            ),
        }
        .into());
    }

    #[cfg(unix)]
    {
        let path = path.as_ref();
        let transport = UnixDomainSocket::connect(path)?;
        transport.set_read_timeout(config.frame.read_timeout)?;
        transport.set_write_timeout(config.frame.write_timeout)?;
        info!(path = %path.display(), "connected to display server");

        Ok(RpcChannel::new(
            Box::new(transport),
            sinks,
            surface_map,
            config,
        ))
    }
}
