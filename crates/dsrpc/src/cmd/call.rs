use dsrpc_channel::{connect_with_config, ChannelConfig, ChannelSinks, SurfaceMapHandle};
use dsrpc_frame::{FrameConfig, Message};

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_response, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let params = parse_params(args.params.as_deref())?;

    let config = ChannelConfig::default()
        .with_call_timeout(timeout)
        .with_frame_config(FrameConfig {
            write_timeout: Some(timeout),
            ..FrameConfig::default()
        });
    let channel = connect_with_config(
        &args.path,
        ChannelSinks::null(),
        SurfaceMapHandle::detached(),
        config,
    )
    .map_err(|err| channel_error("connect failed", err))?;

    let response = channel
        .call_and_wait(&args.method, &params, args.response)
        .map_err(|err| channel_error("call failed", err))?;
    print_response(&args.method, &response, format);

    Ok(SUCCESS)
}

fn parse_params(json: Option<&str>) -> CliResult<Message> {
    match json {
        Some(json) => serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--params is not a valid message: {err}"))),
        None => Ok(Message::Void),
    }
}
