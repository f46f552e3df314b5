use std::fs::File;
use std::io::{BufReader, Read};

use dsrpc_frame::{FrameReader, Invocation, RpcResult};
use tracing::info;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_invocation, print_result, OutputFormat};

enum Decoded {
    Invocation(Invocation),
    Result(RpcResult),
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;
    let frames = read_capture(BufReader::new(file), args.invocations)?;

    for (index, frame) in frames.iter().enumerate() {
        match frame {
            Decoded::Invocation(invocation) => print_invocation(index, invocation, format),
            Decoded::Result(result) => print_result(index, result, format),
        }
    }
    info!(frames = frames.len(), "capture decoded");

    Ok(SUCCESS)
}

fn read_capture<R: Read>(source: R, invocations: bool) -> CliResult<Vec<Decoded>> {
    let mut reader = FrameReader::new(source);
    let mut frames = Vec::new();

    loop {
        let next = if invocations {
            reader.next_invocation().map(|frame| frame.map(Decoded::Invocation))
        } else {
            reader.next_result().map(|frame| frame.map(Decoded::Result))
        };
        let index = frames.len();
        match next.map_err(|err| frame_error(&format!("frame {index} unreadable"), err))? {
            Some(decoded) => frames.push(decoded),
            None => return Ok(frames),
        }
    }
}
