#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ankilink::actions::{self, App};
use ankilink::config::AppConfig;
use ankilink::rpc::{Pipeline, Server};

/// A server pumped on its own thread until stopped.
pub struct RunningServer {
    pub addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Server<App>>,
}

impl RunningServer {
    pub fn start(config: AppConfig) -> Self {
        let options = {
            let mut options = config.server_options();
            options.bind_port = 0;
            options
        };
        let pipeline = Pipeline::new(config.origin_policy(), actions::build(&config));
        let mut server = Server::bind(&options, pipeline).expect("bind server");
        let addr = server.local_addr();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                server.pump();
                let update = server
                    .pipeline_mut()
                    .handler_mut()
                    .state_mut()
                    .take_policy_update();
                if let Some(policy) = update {
                    server.pipeline_mut().replace_policy(policy);
                }
                thread::sleep(Duration::from_millis(1));
            }
            server
        });

        Self { addr, stop, handle }
    }

    pub fn stop(self) -> Server<App> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().expect("server thread panicked")
    }
}

/// Send raw bytes, possibly in several pieces, and read the whole response.
pub fn exchange_parts(addr: SocketAddr, parts: &[&[u8]]) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    for part in parts {
        stream.write_all(part).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8(raw[..split].to_vec()).unwrap();
    (head, raw[split + 4..].to_vec())
}

pub fn exchange(addr: SocketAddr, raw: &str) -> (String, Vec<u8>) {
    exchange_parts(addr, &[raw.as_bytes()])
}

/// Frame a POST carrying `body`, with an optional `Origin` header.
pub fn post(body: &str, origin: Option<&str>) -> String {
    let origin = origin
        .map(|origin| format!("Origin: {origin}\r\n"))
        .unwrap_or_default();
    format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\n{origin}Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}
