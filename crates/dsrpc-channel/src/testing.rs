//! Test doubles shared by the channel's unit tests.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::BytesMut;
use dsrpc_frame::{
    encode_message, Buffer, BufferId, DisplayConfiguration, Event, LifecycleState, RpcResult,
    MAX_BODY_SIZE,
};
use dsrpc_transport::{FdEvents, StreamTransport, TransportError, TransportObserver};

use crate::buffer::{BufferFactory, BufferPackage, BufferReceiver, ClientBuffer};
use crate::error::BufferError;
use crate::sinks::{
    ChannelSinks, DeviceData, DisplayConfigurationSink, EventSink, InputDeviceSink, LifecycleSink,
    PingHandler,
};
use crate::surface_map::SurfaceEventReceiver;

#[derive(Default)]
struct MockState {
    inbound: Mutex<VecDeque<u8>>,
    inbound_fds: Mutex<VecDeque<OwnedFd>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_fds: Mutex<Vec<Vec<OwnedFd>>>,
    fail_sends: AtomicBool,
    observers: Mutex<Vec<Weak<dyn TransportObserver>>>,
}

/// Scripted transport: inbound bytes and descriptors are queued by the test,
/// outbound messages are recorded.
#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
    watch: Arc<(UnixStream, UnixStream)>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::default(),
            watch: Arc::new(UnixStream::pair().unwrap()),
        }
    }

    pub(crate) fn push_bytes(&self, bytes: &[u8]) {
        self.state.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    pub(crate) fn push_result(&self, result: &RpcResult) {
        let mut buf = BytesMut::new();
        encode_message(result, MAX_BODY_SIZE, &mut buf).unwrap();
        self.push_bytes(&buf);
    }

    /// Queue descriptors the way a peer sends them: attached to one byte.
    pub(crate) fn push_fds(&self, fds: Vec<OwnedFd>) {
        self.push_bytes(&[0]);
        self.state.inbound_fds.lock().unwrap().extend(fds);
    }

    pub(crate) fn all_data_consumed(&self) -> bool {
        self.state.inbound.lock().unwrap().is_empty()
            && self.state.inbound_fds.lock().unwrap().is_empty()
    }

    pub(crate) fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.sent.lock().unwrap().clone()
    }

    pub(crate) fn take_sent_fds(&self) -> Vec<Vec<OwnedFd>> {
        std::mem::take(&mut *self.state.sent_fds.lock().unwrap())
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn observers(&self) -> Vec<Arc<dyn TransportObserver>> {
        self.state
            .observers
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn signal_data_available(&self) {
        for observer in self.observers() {
            observer.on_data_available();
        }
    }

    pub(crate) fn signal_disconnect(&self) {
        for observer in self.observers() {
            observer.on_disconnected();
        }
    }
}

impl StreamTransport for MockTransport {
    fn register_observer(&self, observer: Weak<dyn TransportObserver>) {
        self.state.observers.lock().unwrap().push(observer);
    }

    fn receive_data(&self, buf: &mut [u8]) -> dsrpc_transport::Result<()> {
        {
            let mut inbound = self.state.inbound.lock().unwrap();
            let len = buf.len();
            if inbound.len() >= len {
                for (slot, byte) in buf.iter_mut().zip(inbound.drain(..len)) {
                    *slot = byte;
                }
                return Ok(());
            }
        }
        self.signal_disconnect();
        Err(TransportError::Disconnected)
    }

    fn receive_data_with_fds(
        &self,
        buf: &mut [u8],
        fd_count: usize,
    ) -> dsrpc_transport::Result<Vec<OwnedFd>> {
        self.receive_data(buf)?;
        let mut queued = self.state.inbound_fds.lock().unwrap();
        if queued.len() < fd_count {
            return Err(TransportError::DescriptorMismatch {
                expected: fd_count,
                received: queued.len(),
            });
        }
        Ok(queued.drain(..fd_count).collect())
    }

    fn send_message(&self, buf: &[u8], fds: &[BorrowedFd<'_>]) -> dsrpc_transport::Result<()> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(ErrorKind::BrokenPipe).into());
        }
        let copies = fds
            .iter()
            .map(|fd| fd.try_clone_to_owned())
            .collect::<std::io::Result<Vec<_>>>()?;
        self.state.sent.lock().unwrap().push(buf.to_vec());
        self.state.sent_fds.lock().unwrap().push(copies);
        Ok(())
    }

    fn watch_fd(&self) -> BorrowedFd<'_> {
        self.watch.0.as_fd()
    }

    fn dispatch(&self, events: FdEvents) -> bool {
        if events.contains(FdEvents::READABLE) {
            self.signal_data_available();
        }
        true
    }
}

/// A descriptor to hand over, plus the peer end used to tell whether every
/// copy of it has been closed.
pub(crate) fn probe_fd() -> (UnixStream, OwnedFd) {
    let (kept, carried) = UnixStream::pair().unwrap();
    kept.set_nonblocking(true).unwrap();
    (kept, OwnedFd::from(carried))
}

pub(crate) fn is_closed(probe: &UnixStream) -> bool {
    let mut byte = [0u8; 1];
    match (&*probe).read(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) if err.kind() == ErrorKind::WouldBlock => false,
        Err(err) => panic!("probe read failed: {err}"),
    }
}

#[derive(Default)]
pub(crate) struct RecordingSinks {
    pub(crate) lifecycle: Mutex<Vec<LifecycleState>>,
    pub(crate) pings: Mutex<Vec<i32>>,
    pub(crate) devices: Mutex<Vec<Vec<DeviceData>>>,
    pub(crate) configurations: Mutex<Vec<DisplayConfiguration>>,
    pub(crate) events: Mutex<Vec<Event>>,
}

impl RecordingSinks {
    pub(crate) fn sinks(self: &Arc<Self>) -> ChannelSinks {
        ChannelSinks::null()
            .with_lifecycle(self.clone())
            .with_ping(self.clone())
            .with_input_devices(self.clone())
            .with_display_configuration(self.clone())
            .with_events(self.clone())
    }
}

impl LifecycleSink for RecordingSinks {
    fn lifecycle_changed(&self, state: LifecycleState) {
        self.lifecycle.lock().unwrap().push(state);
    }
}

impl PingHandler for RecordingSinks {
    fn ping(&self, serial: i32) {
        self.pings.lock().unwrap().push(serial);
    }
}

impl InputDeviceSink for RecordingSinks {
    fn update_devices(&self, devices: Vec<DeviceData>) {
        self.devices.lock().unwrap().push(devices);
    }
}

impl DisplayConfigurationSink for RecordingSinks {
    fn update_configuration(&self, configuration: &DisplayConfiguration) {
        self.configurations
            .lock()
            .unwrap()
            .push(configuration.clone());
    }
}

impl EventSink for RecordingSinks {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
pub(crate) struct RecordingSurface {
    pub(crate) events: Mutex<Vec<Event>>,
}

impl SurfaceEventReceiver for RecordingSurface {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
pub(crate) struct RecordingStream {
    pub(crate) available: Mutex<Vec<Buffer>>,
    pub(crate) unavailable: AtomicUsize,
}

impl BufferReceiver for RecordingStream {
    fn buffer_available(&self, buffer: Buffer) {
        self.available.lock().unwrap().push(buffer);
    }

    fn buffer_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct StubBuffer {
    id: BufferId,
    pub(crate) package: Mutex<BufferPackage>,
    pub(crate) received: AtomicUsize,
    pub(crate) updates: AtomicUsize,
}

impl ClientBuffer for StubBuffer {
    fn id(&self) -> BufferId {
        self.id
    }

    fn received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&self, package: BufferPackage) {
        *self.package.lock().unwrap() = package;
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct StubFactory {
    pub(crate) built: Mutex<Vec<Arc<StubBuffer>>>,
}

impl BufferFactory for StubFactory {
    fn generate_buffer(&self, buffer: Buffer) -> Result<Arc<dyn ClientBuffer>, BufferError> {
        let stub = Arc::new(StubBuffer {
            id: buffer.buffer_id,
            package: Mutex::new(BufferPackage::from(buffer)),
            received: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        });
        self.built.lock().unwrap().push(Arc::clone(&stub));
        Ok(stub)
    }
}

pub(crate) struct FailingFactory;

impl BufferFactory for FailingFactory {
    fn generate_buffer(&self, buffer: Buffer) -> Result<Arc<dyn ClientBuffer>, BufferError> {
        Err(BufferError(format!("cannot import buffer {}", buffer.buffer_id)))
    }
}
