//! Structured commands over a socket pair.
//!
//! Run with:
//!   cargo run --example command-rpc
//!
//! Defines `hi` and `echo` on the serving side and calls each, plus one
//! command nobody defined to show the error path.

use std::os::unix::net::UnixStream;
use std::thread;

use packtun::command::{Command, CommandChannel, Response, Router};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (mut client, mut server) = UnixStream::pair()?;
    let channel = CommandChannel::default();

    let mut router = Router::new();
    router.define("hi", |_| Ok(Response::default().with("message", "HI")))?;
    router.define("echo", |command| {
        let message = command
            .get("message")
            .and_then(|value| value.as_text())
            .ok_or("echo needs a message")?;
        Ok(Response::default().with("message", message))
    })?;

    let serving = thread::spawn(move || {
        for _ in 0..3 {
            match router.serve_one(&channel, &mut server) {
                Ok(command) => eprintln!("served {}", command.name),
                Err(err) => eprintln!("refused: {err}"),
            }
        }
    });

    let hi = channel.call(&mut client, &Command::new("hi"))?;
    println!("hi -> {:?}", hi.get_text("message"));

    let echo = channel.call(&mut client, &Command::new("echo").with("message", "ping"))?;
    println!("echo -> {:?}", echo.get_text("message"));

    match channel.call(&mut client, &Command::new("dig")) {
        Ok(response) => println!("dig -> {response:?}"),
        Err(err) => println!("dig failed: {err}"),
    }

    serving.join().map_err(|_| "server thread panicked")?;
    Ok(())
}
