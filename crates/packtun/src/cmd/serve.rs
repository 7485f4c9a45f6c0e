use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use packtun_command::{CommandChannel, Response, Router};
use packtun_http::{ResponseWriter, Tunnel, TunnelConfig};
use packtun_transport::{Listener, TunnelStream};
use tracing::{debug, info, warn};

use crate::cmd::{Handler, ServeArgs, TUN_COMMAND};
use crate::exit::{
    command_error, io_error, transport_error, tunnel_error, CliError, CliResult, INTERNAL, SUCCESS,
};

/// Header naming the handler that produced a response.
const HANDLER_HEADER: &str = "x-packtun-handler";

pub fn run(args: ServeArgs, config: TunnelConfig) -> CliResult<i32> {
    let tunnel = Arc::new(Tunnel::new(config).map_err(|err| tunnel_error("invalid config", err))?);
    let router = Arc::new(tunnel_router()?);
    let listener =
        Listener::bind(&args.endpoint).map_err(|err| transport_error("bind failed", err))?;
    info!(
        endpoint = %listener.local_endpoint(),
        handler = args.handler.name(),
        "serving tunnel"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let served = Arc::new(AtomicUsize::new(0));
    let mut accepted = 0usize;
    let mut workers = Vec::new();

    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        accepted += 1;
        match stream.peer_credentials() {
            Some((uid, gid, pid)) => debug!(
                connection = accepted,
                transport = stream.transport_name(),
                uid,
                gid,
                pid,
                "accepted"
            ),
            None => debug!(connection = accepted, transport = stream.transport_name(), "accepted"),
        }

        let (tunnel, router, served) = (tunnel.clone(), router.clone(), served.clone());
        let handler = args.handler;
        let worker = thread::Builder::new()
            .name(format!("conn-{accepted}"))
            .spawn(move || {
                match serve_connection(&router, &tunnel, handler, stream) {
                    Ok(()) => {
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => warn!(error = %err, "connection failed"),
                }
            })
            .map_err(|err| io_error("spawn failed", err))?;
        workers.push(worker);
        workers.retain(|worker| !worker.is_finished());

        if args.count.is_some_and(|count| accepted >= count) {
            break;
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("connection thread panicked");
        }
    }
    info!(served = served.load(Ordering::SeqCst), "server stopped");
    Ok(SUCCESS)
}

fn tunnel_router() -> CliResult<Router> {
    let mut router = Router::new();
    router
        .define(TUN_COMMAND, |_| Ok(Response::new(TUN_COMMAND).with("up", true)))
        .map_err(|err| command_error("router setup failed", err))?;
    Ok(router)
}

/// Answer the opening command, then run one tunnel exchange.
fn serve_connection(
    router: &Router,
    tunnel: &Tunnel,
    handler: Handler,
    mut stream: TunnelStream,
) -> CliResult<()> {
    let command = router
        .serve_one(&CommandChannel::default(), &mut stream)
        .map_err(|err| command_error("command exchange failed", err))?;
    if command.name != TUN_COMMAND {
        return Ok(());
    }

    let (mut response, request) = tunnel
        .backend(&stream)
        .map_err(|err| tunnel_error("tunnel request failed", err))?;
    info!(method = %request.method(), uri = %request.uri(), "tunnel request");

    let content_type = request.headers().get(CONTENT_TYPE).cloned();
    let mut body = Vec::new();
    if let Err(err) = request.into_body().read_to_end(&mut body) {
        if let Err(close_err) = response.fail(&err.to_string()) {
            debug!(error = %close_err, "failed to report body error to peer");
        }
        return Err(io_error("reading request body failed", err));
    }

    let reply = handler.apply(body);
    let headers = response.headers_mut();
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(HANDLER_HEADER, HeaderValue::from_static(handler.name()));

    response
        .write_header(StatusCode::OK)
        .and_then(|()| response.write_all(&reply))
        .map_err(|err| io_error("writing response failed", err))?;
    response
        .finish()
        .map_err(|err| tunnel_error("finishing response failed", err))?;
    debug!(bytes = reply.len(), "response sent");
    Ok(())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
