use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use packtun_transport::Endpoint;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod fetch;
pub mod serve;
pub mod version;

/// Command that switches a connection from command exchange to the tunnel.
pub const TUN_COMMAND: &str = "tun";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept tunnel connections and answer each request with a handler.
    Serve(ServeArgs),
    /// Send one HTTP request through a tunnel and print the response.
    Fetch(FetchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<PathBuf>) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, crate::config::load(config.as_deref())?),
        Command::Fetch(args) => fetch::run(args, crate::config::load(config.as_deref())?, format),
        Command::Version(args) => version::run(args),
    }
}

/// How `serve` answers a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Handler {
    /// Reply with the request body unchanged.
    Echo,
    /// Reply with the request body in ASCII upper case.
    Upper,
}

impl Handler {
    pub fn name(self) -> &'static str {
        match self {
            Handler::Echo => "echo",
            Handler::Upper => "upper",
        }
    }

    pub fn apply(self, body: Vec<u8>) -> Vec<u8> {
        match self {
            Handler::Echo => body,
            Handler::Upper => body.to_ascii_uppercase(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to bind (unix:<path>, tcp:<host:port> or a socket path).
    pub endpoint: Endpoint,
    /// Request handler.
    #[arg(long, value_enum, default_value = "echo")]
    pub handler: Handler,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Endpoint to connect to (unix:<path>, tcp:<host:port> or a socket path).
    pub endpoint: Endpoint,
    /// HTTP method.
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,
    /// Request path and query.
    #[arg(long, default_value = "/")]
    pub path: String,
    /// Request header as NAME:VALUE (repeatable).
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    pub headers: Vec<String>,
    /// Request body.
    #[arg(long, short = 'd', conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the request body from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Keep retrying the connection for this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Exit with a failure code when the response status is 4xx or 5xx.
    #[arg(long)]
    pub fail: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
