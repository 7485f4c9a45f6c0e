use std::fs;
use std::io::{self, Cursor};
use std::thread;
use std::time::{Duration, Instant};

use http::header::CONTENT_LENGTH;
use http::{HeaderName, HeaderValue, Method, Request};
use packtun_command::{Command, CommandChannel};
use packtun_http::{BufferedResponse, Tunnel, TunnelConfig};
use packtun_transport::{connect, Endpoint, TransportError, TunnelStream};
use tracing::debug;

use crate::cmd::{FetchArgs, TUN_COMMAND};
use crate::exit::{
    command_error, io_error, transport_error, tunnel_error, CliError, CliResult, FAILURE,
    REMOTE_ERROR, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_response, OutputFormat};

pub fn run(args: FetchArgs, config: TunnelConfig, format: OutputFormat) -> CliResult<i32> {
    let tunnel = Tunnel::new(config).map_err(|err| tunnel_error("invalid config", err))?;
    let request = build_request(&args)?;
    let timeout = parse_duration(&args.connect_timeout)?;

    let mut stream = connect_with_timeout(&args.endpoint, timeout)?;
    open_tunnel(&mut stream, &args.path)?;

    let mut response = BufferedResponse::new();
    tunnel
        .frontend(&mut response, request, &stream)
        .map_err(|err| tunnel_error("fetch failed", err))?;

    let response = response.into_response();
    print_response(&response, format);

    let status = response.status();
    if args.fail && (status.is_client_error() || status.is_server_error()) {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

/// Ask the server to switch this connection to the tunnel.
fn open_tunnel(stream: &mut TunnelStream, path: &str) -> CliResult<()> {
    let response = CommandChannel::default()
        .call(stream, &Command::new(TUN_COMMAND).with("path", path))
        .map_err(|err| command_error("opening tunnel failed", err))?;
    if response.get_bool("up") != Some(true) {
        return Err(CliError::new(REMOTE_ERROR, "server did not open the tunnel"));
    }
    debug!("tunnel open");
    Ok(())
}

fn build_request(args: &FetchArgs) -> CliResult<Request<Cursor<Vec<u8>>>> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|err| CliError::new(USAGE, format!("invalid method {:?}: {err}", args.method)))?;

    let body = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        Vec::new()
    };

    let mut builder = Request::builder().method(method).uri(args.path.as_str());
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        builder = builder.header(name, value);
    }
    if !body.is_empty() {
        builder = builder.header(CONTENT_LENGTH, body.len());
    }

    builder
        .body(Cursor::new(body))
        .map_err(|err| CliError::new(USAGE, format!("invalid request: {err}")))
}

fn parse_header(input: &str) -> CliResult<(HeaderName, HeaderValue)> {
    let Some((name, value)) = input.split_once(':') else {
        return Err(CliError::new(
            USAGE,
            format!("header {input:?} must look like NAME:VALUE"),
        ));
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|err| CliError::new(USAGE, format!("invalid header name in {input:?}: {err}")))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|err| CliError::new(USAGE, format!("invalid header value in {input:?}: {err}")))?;
    Ok((name, value))
}

fn connect_with_timeout(endpoint: &Endpoint, timeout: Duration) -> CliResult<TunnelStream> {
    let start = Instant::now();
    loop {
        match connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(transport_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect to {endpoint} timed out after {timeout:?}"),
                    ));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn is_retryable_connect_error(err: &TransportError) -> bool {
    match err {
        TransportError::Connect { source, .. } => matches!(
            source.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        ),
        _ => false,
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn args(endpoint: &str) -> FetchArgs {
        FetchArgs {
            endpoint: endpoint.parse().expect("endpoint"),
            method: "post".to_string(),
            path: "/upload?x=1".to_string(),
            headers: vec!["X-Test: 1".to_string(), "Accept:text/plain".to_string()],
            data: Some("hello world".to_string()),
            file: None,
            connect_timeout: "1s".to_string(),
            fail: false,
        }
    }

    #[test]
    fn builds_request_from_args() {
        let request = build_request(&args("/tmp/fetch.sock")).expect("request should build");
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/upload");
        assert_eq!(request.headers()["x-test"], "1");
        assert_eq!(request.headers()["accept"], "text/plain");
        assert_eq!(request.headers()[CONTENT_LENGTH], "11");

        let mut body = String::new();
        request.into_body().read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello world");
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_header("no-colon").unwrap_err().code, USAGE);
        assert_eq!(parse_header("bad name: x").unwrap_err().code, USAGE);
        let (name, value) = parse_header("X-Reply:  ok ").unwrap();
        assert_eq!(name, "x-reply");
        assert_eq!(value, "ok");
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn refused_connection_times_out() {
        let endpoint: Endpoint = "/tmp/packtun-fetch-missing.sock".parse().unwrap();
        let err = connect_with_timeout(&endpoint, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }
}
