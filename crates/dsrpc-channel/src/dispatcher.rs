//! Routing of event sequences embedded in results.

use dsrpc_frame::{BufferOperation, BufferRequest, Event, EventSequence, LifecycleState};
use dsrpc_transport::StreamTransport;
use tracing::{debug, trace, warn};

use crate::buffer::BufferPackage;
use crate::error::{ChannelError, Result};
use crate::sinks::{ChannelSinks, DeviceData};
use crate::surface_map::SurfaceMapHandle;

pub(crate) struct EventDispatcher {
    pub(crate) sinks: ChannelSinks,
    pub(crate) surface_map: SurfaceMapHandle,
    max_side_channel_fds: usize,
}

impl EventDispatcher {
    pub(crate) fn new(
        sinks: ChannelSinks,
        surface_map: SurfaceMapHandle,
        max_side_channel_fds: usize,
    ) -> Self {
        Self {
            sinks,
            surface_map,
            max_side_channel_fds,
        }
    }

    /// Decode and route one serialized event sequence.
    ///
    /// Buffer request descriptors are read from `transport` here, since they
    /// follow the result frame on the stream. An error means the sequence was
    /// abandoned part way; events that fail to parse are skipped and do not
    /// count as errors.
    pub(crate) fn process(&self, transport: &dyn StreamTransport, bytes: &[u8]) -> Result<()> {
        let mut sequence = EventSequence::decode(bytes)?;
        trace!(fields = ?sequence.summary(), "processing event sequence");

        if let Some(configuration) = &sequence.display_configuration {
            self.sinks
                .display_configuration
                .update_configuration(configuration);
        }

        if !sequence.input_devices.is_empty() {
            let devices: Vec<DeviceData> =
                sequence.input_devices.iter().map(DeviceData::from).collect();
            self.sinks.input_devices.update_devices(devices);
        }

        if let Some(lifecycle) = sequence.lifecycle_event {
            match LifecycleState::try_from(lifecycle.new_state) {
                Ok(state) => self.sinks.lifecycle.lifecycle_changed(state),
                Err(err) => warn!(%err, "ignoring lifecycle event"),
            }
        }

        if let Some(ping) = sequence.ping_event {
            self.sinks.ping.ping(ping.serial);
        }

        if let Some(request) = sequence.buffer_request.take() {
            self.process_buffer_request(transport, request)?;
        }

        for raw in &sequence.events {
            match raw.parse() {
                Ok(event) => self.deliver(&event),
                Err(err) => warn!(%err, raw_len = raw.raw.len(), "failed to parse event"),
            }
        }

        Ok(())
    }

    /// Any descriptors still owned by `request` when this returns (including
    /// on error) are closed.
    fn process_buffer_request(
        &self,
        transport: &dyn StreamTransport,
        mut request: BufferRequest,
    ) -> Result<()> {
        let declared = request.buffer.side_channel.pending();
        if declared > self.max_side_channel_fds {
            return Err(ChannelError::TooManyDescriptors {
                count: declared,
                max: self.max_side_channel_fds,
            });
        }
        if declared > 0 {
            let mut dummy = [0u8; 1];
            let fds = transport.receive_data_with_fds(&mut dummy, declared)?;
            debug!(
                buffer_id = %request.buffer.buffer_id,
                fds = fds.len(),
                "received buffer descriptors"
            );
            request.buffer.side_channel.attach(fds);
        }

        let Some(map) = self.surface_map.get() else {
            debug!(buffer_id = %request.buffer.buffer_id, "surface map gone; dropping buffer request");
            return Ok(());
        };

        if let Some(stream_id) = request.id {
            match map.stream(stream_id) {
                Some(stream) => stream.buffer_available(request.buffer),
                None => debug!(%stream_id, "buffer for unknown stream dropped"),
            }
            return Ok(());
        }

        let Some(code) = request.operation else {
            return Ok(());
        };
        let buffer_id = request.buffer.buffer_id;
        let operation = BufferOperation::try_from(code)
            .map_err(|_| ChannelError::UnknownBufferOperation(code))?;

        match operation {
            BufferOperation::Add => {
                let buffer = self.sinks.buffer_factory.generate_buffer(request.buffer)?;
                map.insert_buffer(buffer_id, buffer.clone());
                buffer.received();
            }
            BufferOperation::Update => {
                let buffer = map
                    .buffer(buffer_id)
                    .ok_or(ChannelError::MissingBuffer(buffer_id))?;
                buffer.update(BufferPackage::from(request.buffer));
                buffer.received();
            }
            BufferOperation::Remove => {
                map.erase_buffer(buffer_id);
            }
        }
        trace!(%buffer_id, ?operation, "buffer operation applied");
        Ok(())
    }

    fn deliver(&self, event: &Event) {
        let Some(surface_id) = event.target_surface() else {
            self.sinks.events.handle_event(event);
            return;
        };

        match self
            .surface_map
            .get()
            .and_then(|map| map.surface(surface_id))
        {
            Some(surface) => surface.handle_event(event),
            None => debug!(%surface_id, event = event.kind_name(), "event for unknown surface dropped"),
        }
    }
}
