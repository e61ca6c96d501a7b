use std::thread;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use micro_server::connection::{Connection, HttpConnection, TcpSocket};
use micro_server::handler::{Exchange, HandlerError, make_handler};
use micro_server::logging;
use micro_server::server::{HttpServer, ServerConfig};
use tracing::info;

type Conn = HttpConnection<TcpSocket>;

fn hello(exchange: &mut Exchange<'_, Conn>) -> Result<(), HandlerError> {
    let path = exchange.request().map(|request| request.uri().path().to_owned()).unwrap_or_default();
    match path.as_str() {
        "/" => {
            exchange.response_mut().header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).body("hello world\r\n");
        }
        // curl -v http://127.0.0.1:8080/slow
        "/slow" => {
            let response = exchange.suspend();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(500));
                response.resume(|connection: &mut Conn| {
                    connection.response_mut().body("sorry for the wait\r\n");
                });
            });
        }
        _ => {
            exchange.response_mut().status(StatusCode::NOT_FOUND).body("404 not found\r\n");
        }
    }
    Ok(())
}

// cargo run --example hello_server -- server.toml
fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_from_env()?;

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig { host: Some("127.0.0.1".into()), workers: 4, ..ServerConfig::default() },
    };

    let server = HttpServer::builder().handler(make_handler(hello)).config(config).build()?;
    server.start()?;
    info!(addr = ?server.local_addr(), transport = ?server.transport_kind(), "hello server is up");

    loop {
        thread::park();
    }
}
