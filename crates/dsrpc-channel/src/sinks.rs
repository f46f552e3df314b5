//! Receivers for server-pushed notifications.
//!
//! The channel forwards what it decodes and keeps no state of its own about
//! displays, devices or lifecycle.

use std::sync::{Arc, Mutex};

use dsrpc_frame::{Buffer, DisplayConfiguration, Event, InputDeviceInfo, LifecycleState};
use tracing::debug;

use crate::buffer::{BufferFactory, ClientBuffer};
use crate::error::BufferError;
use crate::lock;

pub trait DisplayConfigurationSink: Send + Sync {
    fn update_configuration(&self, configuration: &DisplayConfiguration);
}

pub trait InputDeviceSink: Send + Sync {
    /// Replace the known device list.
    fn update_devices(&self, devices: Vec<DeviceData>);
}

pub trait LifecycleSink: Send + Sync {
    fn lifecycle_changed(&self, state: LifecycleState);
}

pub trait PingHandler: Send + Sync {
    /// The server sent a keep-alive; the client is expected to echo `serial`.
    fn ping(&self, serial: i32);
}

/// Receives events that are not addressed to a particular surface.
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// An input device as reported to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceData {
    pub id: u64,
    pub capabilities: u32,
    pub name: String,
    pub unique_id: String,
}

impl From<&InputDeviceInfo> for DeviceData {
    fn from(info: &InputDeviceInfo) -> Self {
        Self {
            id: info.id,
            capabilities: info.capabilities,
            name: info.name.clone(),
            unique_id: info.unique_id.clone(),
        }
    }
}

type LifecycleCallback = Box<dyn Fn(LifecycleState) + Send + Sync>;

/// Lifecycle sink with a replaceable handler.
pub struct LifecycleControl {
    handler: Mutex<LifecycleCallback>,
}

impl LifecycleControl {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(Box::new(|state: LifecycleState| debug!(?state, "lifecycle event"))),
        }
    }

    pub fn replace_handler(&self, handler: impl Fn(LifecycleState) + Send + Sync + 'static) {
        *lock(&self.handler) = Box::new(handler);
    }
}

impl Default for LifecycleControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSink for LifecycleControl {
    fn lifecycle_changed(&self, state: LifecycleState) {
        (*lock(&self.handler))(state);
    }
}

/// Sink that discards everything. The buffer factory refuses to build buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSinks;

impl DisplayConfigurationSink for NullSinks {
    fn update_configuration(&self, _configuration: &DisplayConfiguration) {}
}

impl InputDeviceSink for NullSinks {
    fn update_devices(&self, _devices: Vec<DeviceData>) {}
}

impl LifecycleSink for NullSinks {
    fn lifecycle_changed(&self, _state: LifecycleState) {}
}

impl PingHandler for NullSinks {
    fn ping(&self, _serial: i32) {}
}

impl EventSink for NullSinks {
    fn handle_event(&self, _event: &Event) {}
}

impl BufferFactory for NullSinks {
    fn generate_buffer(&self, buffer: Buffer) -> Result<Arc<dyn ClientBuffer>, BufferError> {
        Err(BufferError(format!(
            "no buffer factory for buffer {}",
            buffer.buffer_id
        )))
    }
}

/// Everything the channel forwards to.
#[derive(Clone)]
pub struct ChannelSinks {
    pub display_configuration: Arc<dyn DisplayConfigurationSink>,
    pub input_devices: Arc<dyn InputDeviceSink>,
    pub lifecycle: Arc<dyn LifecycleSink>,
    pub ping: Arc<dyn PingHandler>,
    pub events: Arc<dyn EventSink>,
    pub buffer_factory: Arc<dyn BufferFactory>,
}

impl ChannelSinks {
    /// Sinks that drop every notification.
    pub fn null() -> Self {
        let null = Arc::new(NullSinks);
        Self {
            display_configuration: null.clone(),
            input_devices: null.clone(),
            lifecycle: null.clone(),
            ping: null.clone(),
            events: null.clone(),
            buffer_factory: null,
        }
    }

    pub fn with_display_configuration(mut self, sink: Arc<dyn DisplayConfigurationSink>) -> Self {
        self.display_configuration = sink;
        self
    }

    pub fn with_input_devices(mut self, sink: Arc<dyn InputDeviceSink>) -> Self {
        self.input_devices = sink;
        self
    }

    pub fn with_lifecycle(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.lifecycle = sink;
        self
    }

    pub fn with_ping(mut self, handler: Arc<dyn PingHandler>) -> Self {
        self.ping = handler;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_buffer_factory(mut self, factory: Arc<dyn BufferFactory>) -> Self {
        self.buffer_factory = factory;
        self
    }
}

impl Default for ChannelSinks {
    fn default() -> Self {
        Self::null()
    }
}
