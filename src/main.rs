//! Process entry point: reads the configuration, binds the listener, and
//! spawns one task per accepted connection.

use std::env;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use corvid::client::OutboundItem;
use corvid::config::Config;
use corvid::server::{RouterAction, Server};
use corvid::{util, Shared};
use corvid_reader::LineBuffer;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let bind_addr = config.bind;
    let read_chunk_size = config.read_chunk_size;
    let created_at = util::time_str(util::now());
    let server: Shared = Arc::new(Mutex::new(Server::new(config, created_at)));

    let mut listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("could not bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    log::info!("listening on {}", bind_addr);

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        tokio::spawn(handle_connection(server.clone(), socket, addr.to_string(), read_chunk_size));
    }
}

/// Runs one connection to completion: registers a client slot, then drives
/// its read loop and write loop concurrently until either the peer
/// disconnects or the server closes the connection (e.g. on `QUIT`/`KILL`).
async fn handle_connection(server: Shared, mut socket: TcpStream, host: String, read_chunk_size: usize) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundItem>();
    let id = server.lock().await.new_client(host.clone(), tx);
    log::debug!("accepted connection from {} as client {}", host, id);

    let (mut read_half, mut write_half) = socket.split();

    let writer = async {
        while let Some(item) = rx.recv().await {
            if write_half.write_all(item.as_ref().as_bytes()).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        let mut line_buf = LineBuffer::new();
        let mut chunk = vec![0u8; read_chunk_size];
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let mut lines = Vec::new();
            if line_buf.push(&chunk[..n], |line| lines.push(String::from_utf8_lossy(line).into_owned())).is_err() {
                log::debug!("client {} sent an oversized line, closing", id);
                break;
            }

            let mut closed = false;
            for line in lines {
                if let RouterAction::Close = server.lock().await.handle_message(id, &line) {
                    closed = true;
                    break;
                }
            }
            if closed {
                break;
            }
        }
    };

    tokio::join!(reader, writer);
    server.lock().await.handle_quit(id, "Connection closed");
    log::debug!("client {} disconnected", id);
}
