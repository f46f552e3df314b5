//! The client end of the RPC connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use dsrpc_frame::{
    decode_body, decode_header, encode_message, FrameError, LifecycleState, Message, MessageKind,
    RpcResult, HEADER_SIZE, MAX_BODY_SIZE,
};
use dsrpc_transport::{poll_fd, FdEvents, StreamTransport, TransportObserver};
use tracing::{debug, info, trace, warn};

use crate::config::ChannelConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{CallFailure, ChannelError, Result};
use crate::lock;
use crate::pending::{CallOutcome, PendingCallRegistry};
use crate::sinks::ChannelSinks;
use crate::surface_map::SurfaceMapHandle;

#[derive(Default)]
struct PriorityState {
    /// The next call made becomes the priority call.
    prioritise_next: bool,
    /// Results for other calls are held back until this one resolves.
    priority_id: Option<u32>,
    deferred: VecDeque<u32>,
}

/// Client-side RPC channel over a [`StreamTransport`].
///
/// Calls are sent as framed [`Invocation`](dsrpc_frame::Invocation)s and
/// resolved when a matching [`RpcResult`] arrives. Event sequences carried by
/// results are routed to the configured [`ChannelSinks`] and surface map
/// before the result's own call is completed.
///
/// Reading is driven by [`dispatch`](Self::dispatch) (or the transport's
/// observer callback). At most one thread reads at a time; sends may run
/// concurrently with a read.
pub struct RpcChannel {
    transport: Box<dyn StreamTransport>,
    pending: PendingCallRegistry,
    dispatcher: EventDispatcher,
    config: ChannelConfig,
    write_buf: Mutex<BytesMut>,
    read_buf: Mutex<Vec<u8>>,
    priority: Mutex<PriorityState>,
    disconnected: AtomicBool,
}

impl RpcChannel {
    /// Wrap `transport` and register the channel as its observer.
    pub fn new(
        transport: Box<dyn StreamTransport>,
        sinks: ChannelSinks,
        surface_map: SurfaceMapHandle,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let dispatcher = EventDispatcher::new(sinks, surface_map, config.max_side_channel_fds);
        let channel = Arc::new(Self {
            transport,
            pending: PendingCallRegistry::new(),
            dispatcher,
            config,
            write_buf: Mutex::new(BytesMut::new()),
            read_buf: Mutex::new(Vec::new()),
            priority: Mutex::new(PriorityState::default()),
            disconnected: AtomicBool::new(false),
        });

        let weak: Weak<RpcChannel> = Arc::downgrade(&channel);
        let observer: Weak<dyn TransportObserver> = weak;
        channel.transport.register_observer(observer);
        channel
    }

    /// Send a call to `method` and return its id.
    ///
    /// `on_complete` runs exactly once: with the parsed response, or with a
    /// [`CallFailure`] if the call could not be sent, its response could not
    /// be parsed, or the connection was lost first. When this returns an
    /// error the handler has already been invoked.
    pub fn call_method(
        &self,
        method: &str,
        parameters: &Message,
        response_kind: MessageKind,
        on_complete: impl FnOnce(CallOutcome) + Send + 'static,
    ) -> Result<u32> {
        if self.is_disconnected() {
            debug!(method, "call on disconnected channel");
            self.disarm_priority();
            on_complete(Err(CallFailure::Disconnected));
            return Err(ChannelError::Disconnected);
        }

        let fds = parameters.outgoing_fds();
        if fds.len() > self.config.max_side_channel_fds {
            let err = ChannelError::TooManyDescriptors {
                count: fds.len(),
                max: self.config.max_side_channel_fds,
            };
            self.disarm_priority();
            on_complete(Err(CallFailure::InvalidRequest(err.to_string())));
            return Err(err);
        }

        let body = match parameters.encode() {
            Ok(body) => body,
            Err(err) => {
                self.disarm_priority();
                on_complete(Err(CallFailure::InvalidRequest(err.to_string())));
                return Err(err.into());
            }
        };

        let invocation = match self.pending.allocate_and_save(
            method,
            body,
            fds.len() as u32,
            response_kind,
            Box::new(on_complete),
        ) {
            Ok(invocation) => invocation,
            Err(err) => {
                self.disarm_priority();
                return Err(err);
            }
        };
        let id = invocation.id;

        // A disconnect that drained the registry before this call was saved.
        if self.is_disconnected() {
            self.disarm_priority();
            self.pending.fail(id, CallFailure::Disconnected);
            return Err(ChannelError::Disconnected);
        }
        self.arm_priority(id);

        let sent = {
            let mut buf = lock(&self.write_buf);
            buf.clear();
            match encode_message(&invocation, self.config.frame.max_body_size, &mut buf) {
                Ok(_) => self.transport.send_message(&buf, &fds).map_err(ChannelError::from),
                Err(err) => {
                    drop(buf);
                    self.pending
                        .fail(id, CallFailure::InvalidRequest(err.to_string()));
                    self.release_priority(id);
                    return Err(err.into());
                }
            }
        };

        if let Err(err) = sent {
            warn!(id, method, %err, "invocation failed");
            self.notify_disconnected();
            if self.pending.fail(id, CallFailure::Disconnected) {
                self.release_priority(id);
            }
            return Err(err);
        }

        debug!(id, method, fds = fds.len(), "invocation sent");
        Ok(id)
    }

    /// Complete the next call made before any result that arrives after it.
    ///
    /// Results for other calls received while it is outstanding are held
    /// back and completed, in arrival order, right after it.
    pub fn process_next_request_first(&self) {
        lock(&self.priority).prioritise_next = true;
    }

    /// Read and process one result frame.
    ///
    /// Blocks until the whole frame (and any descriptors it declares) has
    /// been read. Errors in individual event sequences are logged and do not
    /// fail the read, unless they leave the stream off a frame boundary: then
    /// the result's call fails, the channel disconnects and the error is
    /// returned. A result for a call that was never made is a protocol error
    /// and is handled the same way.
    pub fn on_data_available(&self) -> Result<()> {
        let mut body = lock(&self.read_buf);

        let mut header = [0u8; HEADER_SIZE];
        self.transport.receive_data(&mut header)?;
        let body_len = decode_header(header);
        let max = self.config.frame.max_body_size.min(MAX_BODY_SIZE);
        if body_len > max {
            return Err(FrameError::BodyTooLarge {
                size: body_len,
                max,
            }
            .into());
        }

        body.clear();
        body.resize(body_len, 0);
        self.transport.receive_data(&mut body)?;
        let result: RpcResult = decode_body(&body)?;
        debug!(
            id = ?result.id,
            body_len,
            events = result.events.len(),
            "result received"
        );

        for (index, sequence) in result.events.iter().enumerate() {
            if let Err(err) = self.dispatcher.process(self.transport.as_ref(), sequence) {
                warn!(index, %err, "event sequence processing failed");
                if err.desynchronises_stream() {
                    return Err(self.abort_read(result.id, err));
                }
            }
        }

        let Some(id) = result.id else {
            return Ok(());
        };
        let response = result.response.as_deref().unwrap_or_default();

        let Some(kind) = self.pending.response_kind(id) else {
            if let Some(kind) = self.pending.take_abandoned(id) {
                return self.drain_abandoned(id, kind, response);
            }
            warn!(id, "result for a call that was never made");
            return Err(self.abort_read(None, ChannelError::UnknownCall(id)));
        };

        let mut message = match Message::decode(kind, response) {
            Ok(message) => message,
            Err(err) => {
                warn!(id, %kind, %err, "response could not be parsed");
                self.pending
                    .populate(id, Err(CallFailure::InvalidResponse(err.to_string())))?;
                self.resolve(id);
                return Ok(());
            }
        };

        if let Err(err) = self.read_side_channels(&mut message) {
            return Err(self.abort_read(Some(id), err));
        }

        trace!(id, %kind, fds = message.fd_count(), "response parsed");
        self.pending.populate(id, Ok(message))?;
        self.resolve(id);
        Ok(())
    }

    /// Read the descriptors each side channel of `message` declares.
    fn read_side_channels(&self, message: &mut Message) -> Result<()> {
        for side_channel in message.side_channels_mut() {
            let count = side_channel.pending();
            if count == 0 {
                continue;
            }
            if count > self.config.max_side_channel_fds {
                return Err(ChannelError::TooManyDescriptors {
                    count,
                    max: self.config.max_side_channel_fds,
                });
            }
            let mut dummy = [0u8; 1];
            let fds = self.transport.receive_data_with_fds(&mut dummy, count)?;
            side_channel.attach(fds);
        }
        Ok(())
    }

    /// Consume a late result for an abandoned call, closing its descriptors.
    fn drain_abandoned(&self, id: u32, kind: MessageKind, response: &[u8]) -> Result<()> {
        match Message::decode(kind, response) {
            Ok(mut message) => {
                if let Err(err) = self.read_side_channels(&mut message) {
                    return Err(self.abort_read(None, err));
                }
                debug!(id, fds = message.fd_count(), "late result for abandoned call dropped");
            }
            Err(err) => debug!(id, %err, "late result for abandoned call unparsable"),
        }
        Ok(())
    }

    /// Give up on the stream: fail `id` with the cause, then disconnect.
    fn abort_read(&self, id: Option<u32>, err: ChannelError) -> ChannelError {
        if let Some(id) = id {
            if self.pending.fail(id, CallFailure::SideChannel(err.to_string())) {
                self.release_priority(id);
            }
        }
        self.notify_disconnected();
        err
    }

    /// Mark the connection lost and fail everything waiting on it.
    ///
    /// Only the first call has any effect: the lifecycle sink hears about it,
    /// outstanding calls are failed and buffer streams are told that no more
    /// buffers will come.
    pub fn notify_disconnected(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(pending = self.pending.len(), "connection lost");
        self.dispatcher
            .sinks
            .lifecycle
            .lifecycle_changed(LifecycleState::ConnectionLost);

        *lock(&self.priority) = PriorityState::default();
        let failed = self.pending.force_completion();
        if failed > 0 {
            debug!(failed, "outstanding calls failed");
        }

        if let Some(map) = self.dispatcher.surface_map.get() {
            for stream in map.streams() {
                stream.buffer_unavailable();
            }
        }
    }

    /// React to readiness on [`watch_fd`](Self::watch_fd).
    ///
    /// Returns `false` once the channel is no longer usable.
    pub fn dispatch(&self, events: FdEvents) -> Result<bool> {
        if events.contains(FdEvents::READABLE) {
            return match self.on_data_available() {
                Ok(()) => Ok(!self.is_disconnected()),
                Err(err) if err.is_disconnect() => {
                    self.notify_disconnected();
                    Ok(false)
                }
                Err(err) => Err(err),
            };
        }
        if !self.transport.dispatch(events) {
            self.notify_disconnected();
            return Ok(false);
        }
        Ok(!self.is_disconnected())
    }

    /// Wait up to `timeout` for readiness and dispatch it.
    ///
    /// Returns `Ok(true)` while the channel stays usable, including when the
    /// wait times out.
    pub fn poll_dispatch(&self, timeout: Option<Duration>) -> Result<bool> {
        let events = poll_fd(self.watch_fd(), self.relevant_events(), timeout)
            .map_err(dsrpc_transport::TransportError::from)?;
        if events.is_empty() {
            return Ok(!self.is_disconnected());
        }
        self.dispatch(events)
    }

    /// Make a call and drive the channel until it completes.
    ///
    /// The call is prioritised over results for other calls. If no result
    /// arrives within the configured call timeout the call is abandoned.
    pub fn call_and_wait(
        &self,
        method: &str,
        parameters: &Message,
        response_kind: MessageKind,
    ) -> Result<Message> {
        let slot: Arc<Mutex<Option<CallOutcome>>> = Arc::default();
        let filled = Arc::clone(&slot);

        self.process_next_request_first();
        let id = self.call_method(method, parameters, response_kind, move |outcome| {
            *lock(&filled) = Some(outcome);
        })?;

        let deadline = Instant::now() + self.config.call_timeout;
        loop {
            if let Some(outcome) = lock(&slot).take() {
                return outcome.map_err(ChannelError::CallFailed);
            }

            let now = Instant::now();
            if now >= deadline {
                if self.pending.abandon(id) {
                    self.release_priority(id);
                }
                warn!(id, method, timeout = ?self.config.call_timeout, "call timed out");
                return Err(ChannelError::Timeout(self.config.call_timeout));
            }

            if !self.poll_dispatch(Some(deadline - now))? {
                return match lock(&slot).take() {
                    Some(outcome) => outcome.map_err(ChannelError::CallFailed),
                    None => Err(ChannelError::Disconnected),
                };
            }
        }
    }

    /// The descriptor to watch for incoming results.
    pub fn watch_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.transport.watch_fd()
    }

    pub fn relevant_events(&self) -> FdEvents {
        self.transport.relevant_events()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn disarm_priority(&self) {
        lock(&self.priority).prioritise_next = false;
    }

    fn arm_priority(&self, id: u32) {
        let mut priority = lock(&self.priority);
        if priority.prioritise_next {
            priority.prioritise_next = false;
            priority.priority_id = Some(id);
            trace!(id, "call prioritised");
        }
    }

    /// Drop the priority on `id` if it has it, completing held-back results.
    fn release_priority(&self, id: u32) {
        let released: Vec<u32> = {
            let mut priority = lock(&self.priority);
            if priority.priority_id != Some(id) {
                return;
            }
            priority.priority_id = None;
            if priority.prioritise_next {
                Vec::new()
            } else {
                priority.deferred.drain(..).collect()
            }
        };
        self.complete_all(released);
    }

    fn resolve(&self, id: u32) {
        let ready: Vec<u32> = {
            let mut priority = lock(&self.priority);
            match priority.priority_id {
                None => vec![id],
                Some(priority_id) if priority_id == id => {
                    priority.priority_id = None;
                    let mut ready = vec![id];
                    if !priority.prioritise_next {
                        ready.extend(priority.deferred.drain(..));
                    }
                    ready
                }
                Some(priority_id) => {
                    trace!(id, priority_id, "result deferred");
                    priority.deferred.push_back(id);
                    Vec::new()
                }
            }
        };
        self.complete_all(ready);
    }

    fn complete_all(&self, ids: Vec<u32>) {
        for id in ids {
            if let Err(err) = self.pending.complete(id) {
                warn!(id, %err, "result completion failed");
            }
        }
    }
}

impl TransportObserver for RpcChannel {
    fn on_data_available(&self) {
        if let Err(err) = RpcChannel::on_data_available(self) {
            if err.is_disconnect() {
                self.notify_disconnected();
            } else {
                warn!(%err, "result receipt failed");
            }
        }
    }

    fn on_disconnected(&self) {
        self.notify_disconnected();
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("pending", &self.pending.len())
            .field("disconnected", &self.is_disconnected())
            .field("surface_map", &self.dispatcher.surface_map)
            .finish()
    }
}
