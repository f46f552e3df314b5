use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dsrpc_frame::{Event, EventSequence, Invocation, Message, RpcResult};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    record: &'static str,
    method: &'a str,
    kind: String,
    fds: usize,
    response: &'a Message,
    timestamp: String,
}

pub fn print_response(method: &str, message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                record: "response",
                method,
                kind: message.kind().to_string(),
                fds: message.fd_count(),
                response: message,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "KIND", "FDS", "RESPONSE"])
                .add_row(vec![
                    method.to_string(),
                    message.kind().to_string(),
                    message.fd_count().to_string(),
                    to_json(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={} kind={} fds={} response={}",
                method,
                message.kind(),
                message.fd_count(),
                to_json(message)
            );
        }
    }
}

/// One notification observed by `monitor`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    DisplayConfiguration { outputs: usize },
    InputDevices { names: Vec<String> },
    Lifecycle { state: String },
    Ping { serial: i32 },
    Event { event: Event },
}

impl Notification {
    fn label(&self) -> &'static str {
        match self {
            Notification::DisplayConfiguration { .. } => "display_configuration",
            Notification::InputDevices { .. } => "input_devices",
            Notification::Lifecycle { .. } => "lifecycle",
            Notification::Ping { .. } => "ping",
            Notification::Event { event } => event.kind_name(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Notification::DisplayConfiguration { outputs } => format!("{outputs} outputs"),
            Notification::InputDevices { names } => names.join(", "),
            Notification::Lifecycle { state } => state.clone(),
            Notification::Ping { serial } => serial.to_string(),
            Notification::Event { event } => to_json(event),
        }
    }
}

#[derive(Serialize)]
struct NotificationOutput<'a> {
    record: &'static str,
    #[serde(flatten)]
    notification: &'a Notification,
    timestamp: String,
}

pub fn print_notification(notification: &Notification, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&NotificationOutput {
            record: "notification",
            notification,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NOTIFICATION", "DETAIL"])
                .add_row(vec![
                    notification.label().to_string(),
                    notification.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} {}", notification.label(), notification.detail());
        }
    }
}

#[derive(Serialize)]
struct ResultOutput {
    record: &'static str,
    index: usize,
    id: Option<u32>,
    response_size: Option<usize>,
    sequences: Vec<SequenceOutput>,
}

#[derive(Serialize)]
struct SequenceOutput {
    fields: Vec<&'static str>,
    events: Vec<String>,
    error: Option<String>,
}

impl SequenceOutput {
    fn from_bytes(bytes: &[u8]) -> Self {
        match EventSequence::decode(bytes) {
            Ok(sequence) => Self {
                fields: sequence.summary(),
                events: sequence
                    .events
                    .iter()
                    .map(|raw| match raw.parse() {
                        Ok(event) => event.kind_name().to_string(),
                        Err(err) => format!("<unparsable: {err}>"),
                    })
                    .collect(),
                error: None,
            },
            Err(err) => Self {
                fields: Vec::new(),
                events: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return format!("<invalid: {error}>");
        }
        if self.events.is_empty() {
            self.fields.join("+")
        } else {
            format!("{} [{}]", self.fields.join("+"), self.events.join(", "))
        }
    }
}

pub fn print_result(index: usize, result: &RpcResult, format: OutputFormat) {
    let out = ResultOutput {
        record: "result",
        index,
        id: result.id,
        response_size: result.response.as_ref().map(Vec::len),
        sequences: result
            .events
            .iter()
            .map(|bytes| SequenceOutput::from_bytes(bytes))
            .collect(),
    };
    let id = out.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let size = out
        .response_size
        .map_or_else(|| "-".to_string(), |size| size.to_string());
    let events = out
        .sequences
        .iter()
        .map(SequenceOutput::describe)
        .collect::<Vec<_>>()
        .join("; ");

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "ID", "RESPONSE", "EVENTS"])
                .add_row(vec![index.to_string(), id, size, events]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("#{index} id={id} response={size} events={events}");
        }
    }
}

#[derive(Serialize)]
struct InvocationOutput<'a> {
    record: &'static str,
    index: usize,
    id: u32,
    method: &'a str,
    parameters_size: usize,
    fds: u32,
}

pub fn print_invocation(index: usize, invocation: &Invocation, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&InvocationOutput {
            record: "invocation",
            index,
            id: invocation.id,
            method: &invocation.method_name,
            parameters_size: invocation.parameters.len(),
            fds: invocation.fds_on_side_channel,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "ID", "METHOD", "PARAMS", "FDS"])
                .add_row(vec![
                    index.to_string(),
                    invocation.id.to_string(),
                    invocation.method_name.clone(),
                    invocation.parameters.len().to_string(),
                    invocation.fds_on_side_channel.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{index} id={} method={} params={} fds={}",
                invocation.id,
                invocation.method_name,
                invocation.parameters.len(),
                invocation.fds_on_side_channel
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
