//! Tunnel one HTTP exchange over a Unix socket.
//!
//! Run with:
//!   cargo run --example echo-tunnel
//!
//! The server thread answers the `tun` command, then echoes the request body
//! back with the request's headers reflected as `x-echo-*` response headers.

use std::io::{Read, Write};
use std::thread;

use packtun::command::{Command, CommandChannel, Response, Router};
use packtun::http::{BufferedResponse, ResponseWriter};
use packtun::transport::{connect, Endpoint, Listener};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_path = std::env::temp_dir().join(format!("packtun-echo-{}.sock", std::process::id()));
    let endpoint = Endpoint::Unix(sock_path);
    let listener = Listener::bind(&endpoint)?;
    eprintln!("Listening on {endpoint}");

    let server = thread::spawn(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut stream = listener.accept()?;

        let mut router = Router::new();
        router.define("tun", |_| Ok(Response::default().with("up", true)))?;
        router.serve_one(&CommandChannel::default(), &mut stream)?;

        let (mut response, request) = packtun::http::backend(&stream)?;
        for (name, value) in request.headers() {
            let echoed = format!("x-echo-{name}");
            response
                .headers_mut()
                .insert(http::HeaderName::from_bytes(echoed.as_bytes())?, value.clone());
        }
        let mut body = Vec::new();
        request.into_body().read_to_end(&mut body)?;
        response.write_all(&body)?;
        response.finish()?;
        Ok(())
    });

    let mut stream = connect(&endpoint)?;
    let opened = CommandChannel::default().call(&mut stream, &Command::new("tun"))?;
    eprintln!("Tunnel up: {:?}", opened.get_bool("up"));

    let request = http::Request::post("/echo")
        .header("x-greeting", "hello")
        .body(&b"tunnelled body"[..])?;
    let mut response = BufferedResponse::new();
    packtun::http::frontend(&mut response, request, &stream)?;

    server.join().map_err(|_| "server thread panicked")?.map_err(|err| err.to_string())?;

    let response = response.into_response();
    eprintln!("Status: {}", response.status());
    for (name, value) in response.headers() {
        eprintln!("{name}: {value:?}");
    }
    eprintln!("Body: {}", String::from_utf8_lossy(response.body()));
    Ok(())
}
