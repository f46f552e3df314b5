//! Server-pushed event sequences embedded in results.

use serde::{Deserialize, Serialize};

use crate::codec::{decode_body, encode_body};
use crate::error::{FrameError, Result};
use crate::message::{BufferRequest, SurfaceId};

/// One batch of server-pushed notifications.
///
/// Fields are handled in declaration order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventSequence {
    pub display_configuration: Option<DisplayConfiguration>,
    /// Complete replacement for the client's input device list.
    pub input_devices: Vec<InputDeviceInfo>,
    pub lifecycle_event: Option<LifecycleEvent>,
    pub ping_event: Option<PingEvent>,
    pub buffer_request: Option<BufferRequest>,
    pub events: Vec<RawEvent>,
}

impl EventSequence {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_body(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_body(bytes)
    }

    pub fn ping(serial: i32) -> Self {
        Self {
            ping_event: Some(PingEvent { serial }),
            ..Self::default()
        }
    }

    pub fn lifecycle(state: LifecycleState) -> Self {
        Self {
            lifecycle_event: Some(LifecycleEvent {
                new_state: state as i32,
            }),
            ..Self::default()
        }
    }

    /// Names of the populated fields, for logs and CLI output.
    pub fn summary(&self) -> Vec<&'static str> {
        let mut parts = Vec::new();
        if self.display_configuration.is_some() {
            parts.push("display_configuration");
        }
        if !self.input_devices.is_empty() {
            parts.push("input_devices");
        }
        if self.lifecycle_event.is_some() {
            parts.push("lifecycle");
        }
        if self.ping_event.is_some() {
            parts.push("ping");
        }
        if self.buffer_request.is_some() {
            parts.push("buffer_request");
        }
        if !self.events.is_empty() {
            parts.push("events");
        }
        parts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfiguration {
    pub outputs: Vec<DisplayOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayOutput {
    pub output_id: u32,
    pub connected: bool,
    pub used: bool,
    pub position_x: i32,
    pub position_y: i32,
    pub current_mode: u32,
    pub modes: Vec<DisplayMode>,
    pub power_mode: i32,
    pub orientation: i32,
    pub scale: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub refresh_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDeviceInfo {
    pub id: u64,
    pub capabilities: u32,
    pub name: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub new_state: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingEvent {
    pub serial: i32,
}

/// A serialized [`Event`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub raw: Vec<u8>,
}

impl RawEvent {
    pub fn from_event(event: &Event) -> Result<Self> {
        Ok(Self {
            raw: event.encode()?,
        })
    }

    pub fn parse(&self) -> Result<Event> {
        Event::decode(&self.raw)
    }
}

/// Connection lifecycle as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active = 0,
    WillSuspend = 1,
    ConnectionLost = 2,
}

impl TryFrom<i32> for LifecycleState {
    type Error = FrameError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(LifecycleState::Active),
            1 => Ok(LifecycleState::WillSuspend),
            2 => Ok(LifecycleState::ConnectionLost),
            value => Err(FrameError::UnknownValue {
                field: "lifecycle state",
                value,
            }),
        }
    }
}

/// What a buffer request asks the client to do with a buffer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferOperation {
    Add = 0,
    Update = 1,
    Remove = 2,
}

impl TryFrom<i32> for BufferOperation {
    type Error = FrameError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(BufferOperation::Add),
            1 => Ok(BufferOperation::Update),
            2 => Ok(BufferOperation::Remove),
            value => Err(FrameError::UnknownValue {
                field: "buffer operation",
                value,
            }),
        }
    }
}

/// Typed client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Surface {
        surface_id: SurfaceId,
        attrib: i32,
        value: i32,
    },
    Resize {
        surface_id: SurfaceId,
        width: i32,
        height: i32,
    },
    Orientation {
        surface_id: SurfaceId,
        direction: i32,
    },
    CloseSurface {
        surface_id: SurfaceId,
    },
    Keymap {
        surface_id: SurfaceId,
        device_id: u64,
        keymap: Vec<u8>,
    },
    SurfaceOutput {
        surface_id: SurfaceId,
        dpi: i32,
        scale: f32,
        form_factor: i32,
        output_id: u32,
    },
    Input {
        device_id: u64,
        event_time_ns: i64,
        payload: Vec<u8>,
    },
    PromptSessionStateChange {
        new_state: i32,
    },
}

impl Event {
    /// The surface this event is addressed to, if it names one.
    pub fn target_surface(&self) -> Option<SurfaceId> {
        match self {
            Event::Surface { surface_id, .. }
            | Event::Resize { surface_id, .. }
            | Event::Orientation { surface_id, .. }
            | Event::CloseSurface { surface_id }
            | Event::Keymap { surface_id, .. }
            | Event::SurfaceOutput { surface_id, .. } => Some(*surface_id),
            Event::Input { .. } | Event::PromptSessionStateChange { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Surface { .. } => "surface",
            Event::Resize { .. } => "resize",
            Event::Orientation { .. } => "orientation",
            Event::CloseSurface { .. } => "close_surface",
            Event::Keymap { .. } => "keymap",
            Event::SurfaceOutput { .. } => "surface_output",
            Event::Input { .. } => "input",
            Event::PromptSessionStateChange { .. } => "prompt_session_state_change",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_body(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(FrameError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_states_follow_wire_values() {
        assert_eq!(LifecycleState::try_from(0).unwrap(), LifecycleState::Active);
        assert_eq!(
            LifecycleState::try_from(2).unwrap(),
            LifecycleState::ConnectionLost
        );
        assert!(LifecycleState::try_from(7).is_err());
        assert_eq!(
            EventSequence::lifecycle(LifecycleState::WillSuspend)
                .lifecycle_event
                .unwrap()
                .new_state,
            1
        );
    }

    #[test]
    fn unknown_buffer_operation_is_rejected() {
        assert_eq!(BufferOperation::try_from(1).unwrap(), BufferOperation::Update);
        let err = BufferOperation::try_from(5).unwrap_err();
        assert!(matches!(err, FrameError::UnknownValue { value: 5, .. }));
    }

    #[test]
    fn sequence_survives_encoding() {
        let resize = Event::Resize {
            surface_id: SurfaceId(3),
            width: 640,
            height: 480,
        };
        let sequence = EventSequence {
            input_devices: vec![InputDeviceInfo {
                id: 1,
                capabilities: 2,
                name: "kbd".into(),
                unique_id: "usb-1".into(),
            }],
            ping_event: Some(PingEvent { serial: 7 }),
            events: vec![RawEvent::from_event(&resize).unwrap()],
            ..EventSequence::default()
        };

        let decoded = EventSequence::decode(&sequence.encode().unwrap()).unwrap();
        assert_eq!(decoded.ping_event, Some(PingEvent { serial: 7 }));
        assert_eq!(decoded.input_devices, sequence.input_devices);
        assert_eq!(decoded.events[0].parse().unwrap(), resize);
        assert_eq!(decoded.summary(), vec!["input_devices", "ping", "events"]);
    }

    #[test]
    fn targets_follow_event_kind() {
        let close = Event::CloseSurface {
            surface_id: SurfaceId(9),
        };
        assert_eq!(close.target_surface(), Some(SurfaceId(9)));

        let input = Event::Input {
            device_id: 1,
            event_time_ns: 0,
            payload: Vec::new(),
        };
        assert_eq!(input.target_surface(), None);
        assert_eq!(input.kind_name(), "input");
    }

    #[test]
    fn truncated_raw_event_fails_to_parse() {
        let raw = RawEvent { raw: vec![1] };
        assert!(raw.parse().is_err());
    }
}
