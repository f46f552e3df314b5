use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dsrpc_channel::DEFAULT_MAX_SIDE_CHANNEL_FDS;
use dsrpc_frame::{
    decode_body, decode_header, encode_message, EventSequence, Invocation, RpcResult,
    HEADER_SIZE, MAX_BODY_SIZE,
};
use dsrpc_transport::{StreamTransport, UnixDomainSocket, UnixStreamTransport};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, ServeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(path = %listener.path().display(), ping = args.ping, "serving");

    while running.load(Ordering::SeqCst) {
        let transport = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        match transport.peer_credentials() {
            Some((uid, gid, pid)) => info!(uid, gid, pid, "client connected"),
            None => info!("client connected"),
        }

        match serve_connection(&transport, args.ping, &running) {
            Ok(served) => info!(served, "client disconnected"),
            Err(err) => warn!(%err, "connection closed after error"),
        }
    }

    Ok(SUCCESS)
}

/// Answer invocations until the client goes away. Returns the number served.
fn serve_connection(
    transport: &UnixStreamTransport,
    ping: bool,
    running: &AtomicBool,
) -> dsrpc_channel::Result<usize> {
    let mut served = 0usize;
    let mut reply = BytesMut::new();

    while running.load(Ordering::SeqCst) {
        let mut header = [0u8; HEADER_SIZE];
        let mut fds = match transport.receive_with_any_fds(&mut header, DEFAULT_MAX_SIDE_CHANNEL_FDS)
        {
            Ok(fds) => fds,
            Err(err) if err.is_disconnect() => return Ok(served),
            Err(err) => return Err(err.into()),
        };
        let mut body = vec![0u8; decode_header(header)];
        fds.extend(transport.receive_with_any_fds(
            &mut body,
            DEFAULT_MAX_SIDE_CHANNEL_FDS.saturating_sub(fds.len()),
        )?);

        let invocation: Invocation = decode_body(&body)?;
        if fds.len() != invocation.fds_on_side_channel as usize {
            warn!(
                id = invocation.id,
                declared = invocation.fds_on_side_channel,
                received = fds.len(),
                "descriptor count mismatch"
            );
        }
        info!(
            id = invocation.id,
            method = %invocation.method_name,
            params = invocation.parameters.len(),
            fds = fds.len(),
            "invocation received"
        );
        drop(fds);

        let mut result = RpcResult::response(invocation.id, Vec::new());
        if ping {
            let serial = i32::try_from(invocation.id).unwrap_or(i32::MAX);
            result = result.with_event(EventSequence::ping(serial).encode()?);
        }
        reply.clear();
        encode_message(&result, MAX_BODY_SIZE, &mut reply)?;
        transport.send_message(&reply, &[])?;
        served += 1;
    }

    Ok(served)
}
