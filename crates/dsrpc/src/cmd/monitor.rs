use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsrpc_channel::{
    connect_with_config, BufferReceiver, ChannelConfig, ChannelSinks, ClientBuffer, DeviceData,
    DisplayConfigurationSink, EventSink, InputDeviceSink, LifecycleSink, PingHandler,
    SurfaceEventReceiver, SurfaceMap, SurfaceMapOwner,
};
use dsrpc_frame::{
    BufferId, BufferStreamId, ConnectParameters, DisplayConfiguration, Event, LifecycleState,
    Message, MessageKind, SurfaceId,
};
use tracing::{debug, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, MonitorArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_notification, print_response, Notification, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let printer = Arc::new(NotificationPrinter::new(format, args.count));
    let sinks = ChannelSinks::null()
        .with_display_configuration(printer.clone())
        .with_input_devices(printer.clone())
        .with_lifecycle(printer.clone())
        .with_ping(printer.clone())
        .with_events(printer.clone());
    let owner = SurfaceMapOwner::new(Arc::new(EverySurface(printer.clone())));

    let channel = connect_with_config(
        &args.path,
        sinks,
        owner.handle(),
        ChannelConfig::default().with_call_timeout(timeout),
    )
    .map_err(|err| channel_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let params = Message::ConnectParameters(ConnectParameters {
        application_name: args.app_name.clone(),
    });
    let response = channel
        .call_and_wait("connect", &params, MessageKind::Connection)
        .map_err(|err| channel_error("connect call failed", err))?;
    print_response("connect", &response, format);

    while running.load(Ordering::SeqCst) && !printer.is_done() {
        match channel.poll_dispatch(Some(POLL_INTERVAL)) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) if err.is_disconnect() => break,
            Err(err) => warn!(%err, "result processing failed"),
        }
    }
    debug!(printed = printer.printed(), "monitor finished");

    Ok(SUCCESS)
}

/// Prints every notification the channel forwards, up to an optional limit.
struct NotificationPrinter {
    format: OutputFormat,
    limit: Option<usize>,
    printed: AtomicUsize,
}

impl NotificationPrinter {
    fn new(format: OutputFormat, limit: Option<usize>) -> Self {
        Self {
            format,
            limit,
            printed: AtomicUsize::new(0),
        }
    }

    fn emit(&self, notification: Notification) {
        if self.is_done() {
            return;
        }
        print_notification(&notification, self.format);
        self.printed.fetch_add(1, Ordering::SeqCst);
    }

    fn printed(&self) -> usize {
        self.printed.load(Ordering::SeqCst)
    }

    fn is_done(&self) -> bool {
        self.limit.is_some_and(|limit| self.printed() >= limit)
    }
}

impl DisplayConfigurationSink for NotificationPrinter {
    fn update_configuration(&self, configuration: &DisplayConfiguration) {
        self.emit(Notification::DisplayConfiguration {
            outputs: configuration.outputs.len(),
        });
    }
}

impl InputDeviceSink for NotificationPrinter {
    fn update_devices(&self, devices: Vec<DeviceData>) {
        self.emit(Notification::InputDevices {
            names: devices.into_iter().map(|device| device.name).collect(),
        });
    }
}

impl LifecycleSink for NotificationPrinter {
    fn lifecycle_changed(&self, state: LifecycleState) {
        self.emit(Notification::Lifecycle {
            state: format!("{state:?}"),
        });
    }
}

impl PingHandler for NotificationPrinter {
    fn ping(&self, serial: i32) {
        self.emit(Notification::Ping { serial });
    }
}

impl EventSink for NotificationPrinter {
    fn handle_event(&self, event: &Event) {
        self.emit(Notification::Event {
            event: event.clone(),
        });
    }
}

impl SurfaceEventReceiver for NotificationPrinter {
    fn handle_event(&self, event: &Event) {
        EventSink::handle_event(self, event);
    }
}

/// Surface map that resolves every surface id to the printer and holds no
/// streams or buffers.
struct EverySurface(Arc<NotificationPrinter>);

impl SurfaceMap for EverySurface {
    fn surface(&self, _id: SurfaceId) -> Option<Arc<dyn SurfaceEventReceiver>> {
        Some(self.0.clone())
    }

    fn stream(&self, _id: BufferStreamId) -> Option<Arc<dyn BufferReceiver>> {
        None
    }

    fn streams(&self) -> Vec<Arc<dyn BufferReceiver>> {
        Vec::new()
    }

    fn buffer(&self, _id: BufferId) -> Option<Arc<dyn ClientBuffer>> {
        None
    }

    fn insert_buffer(&self, id: BufferId, _buffer: Arc<dyn ClientBuffer>) {
        debug!(%id, "monitor does not keep buffers");
    }

    fn erase_buffer(&self, _id: BufferId) -> Option<Arc<dyn ClientBuffer>> {
        None
    }
}
