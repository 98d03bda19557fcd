//! Minimal stand-in for a managed server instance, used by the integration
//! tests. It is launched through the same invocation the supervisor builds
//! for a real instance and takes its behavior from `-D` properties:
//!
//! - `stub.port`: TCP port to listen on (default 1099). A connected peer
//!   sending the line `shutdown` makes the stub exit cleanly.
//! - `stub.http.port`: additionally serve a minimal HTTP 200 on this port.
//! - `stub.delay`: seconds to wait before listening.
//! - `stub.exit`: exit immediately with this code.
//! - `stub.silent=true`: never listen; run until killed.
//!
//! With `--shutdown` on the command line it acts as the shutdown client
//! instead: it connects to `$STUB_SHUTDOWN_PORT` and sends the `shutdown`
//! line. The token `fail-client` makes it exit non-zero without connecting.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug)]
struct StubOptions {
    host: String,
    port: u16,
    http_port: Option<u16>,
    delay_secs: u64,
    exit_code: Option<i32>,
    silent: bool,
    client_mode: bool,
    fail_client: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> StubOptions {
    let mut options = StubOptions {
        host: "127.0.0.1".to_string(),
        port: 1099,
        http_port: None,
        delay_secs: 0,
        exit_code: None,
        silent: false,
        client_mode: false,
        fail_client: false,
    };

    let args: Vec<String> = args.collect();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "-b" {
            if let Some(host) = args.get(i + 1) {
                options.host = host.clone();
                i += 1;
            }
        } else if arg == "--shutdown" {
            options.client_mode = true;
        } else if arg == "fail-client" {
            options.fail_client = true;
        } else if let Some(property) = arg.strip_prefix("-D") {
            if let Some((key, value)) = property.split_once('=') {
                match key {
                    "stub.port" => {
                        if let Ok(port) = value.parse() {
                            options.port = port;
                        }
                    }
                    "stub.http.port" => {
                        if let Ok(port) = value.parse() {
                            options.http_port = Some(port);
                        }
                    }
                    "stub.delay" => {
                        if let Ok(secs) = value.parse() {
                            options.delay_secs = secs;
                        }
                    }
                    "stub.exit" => {
                        if let Ok(code) = value.parse() {
                            options.exit_code = Some(code);
                        }
                    }
                    "stub.silent" => {
                        options.silent = value == "true";
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }

    options
}

async fn run_shutdown_client(fail: bool) -> i32 {
    if fail {
        eprintln!("shutdown client refused by configuration");
        return 3;
    }
    let port = match std::env::var("STUB_SHUTDOWN_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        Some(port) => port,
        None => {
            eprintln!("no shutdown endpoint configured");
            return 1;
        }
    };
    match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(mut stream) => {
            if let Err(e) = stream.write_all(b"shutdown\n").await {
                eprintln!("cannot send shutdown command: {}", e);
                return 1;
            }
            println!("shutdown command sent");
            0
        }
        Err(e) => {
            eprintln!("cannot reach instance: {}", e);
            1
        }
    }
}

async fn serve_http(port: u16) {
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("cannot bind http port {}: {}", port, e);
            return;
        }
    };
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            use tokio::io::AsyncReadExt;
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                )
                .await;
            let _ = stream.shutdown().await;
        });
    }
}

async fn handle_control(stream: TcpStream) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim() == "shutdown" {
            println!("stub shutting down");
            std::process::exit(0);
        }
    }
}

#[tokio::main]
async fn main() {
    let options = parse_args(std::env::args().skip(1));

    if options.client_mode {
        let code = run_shutdown_client(options.fail_client).await;
        std::process::exit(code);
    }

    if let Some(code) = options.exit_code {
        eprintln!("stub exiting with code {}", code);
        std::process::exit(code);
    }

    if options.delay_secs > 0 {
        tokio::time::sleep(Duration::from_secs(options.delay_secs)).await;
    }

    if options.silent {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    if let Some(http_port) = options.http_port {
        tokio::spawn(serve_http(http_port));
    }

    let listener = match TcpListener::bind((options.host.as_str(), options.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!(
                "cannot bind {}:{}: {}",
                options.host, options.port, e
            );
            std::process::exit(2);
        }
    };
    println!("stub listening on {}:{}", options.host, options.port);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_control(stream));
            }
            Err(e) => {
                eprintln!("accept failed: {}", e);
            }
        }
    }
}
