//! Connects to a broker, subscribes to every topic filter given on the
//! command line, and prints each received publish until interrupted.
//!
//! ```text
//! sub_client --host localhost --port 1883 a/b c/+
//! ```
#[macro_use]
extern crate log;

use std::env;
use std::net::TcpStream;
use std::process;
use std::thread;
use std::time::Duration;

use mqtt_client::{Client, ClientConfig, ConnectOptions, QoS, TcpTransport};

fn main() {
    pretty_env_logger::init();

    let mut host = "localhost".to_owned();
    let mut port = 1883u16;
    let mut topics = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => host = args.next().unwrap_or_else(|| host.clone()),
            "--port" => {
                port = args
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(port)
            }
            topic => topics.push(topic.to_owned()),
        }
    }

    if topics.is_empty() {
        eprintln!("usage: sub_client [--host HOST] [--port PORT] TOPIC_FILTER...");
        process::exit(2);
    }

    let stream = TcpStream::connect((host.as_str(), port)).unwrap_or_else(|e| {
        eprintln!("could not connect to {}:{}: {}", host, port, e);
        process::exit(1);
    });
    let transport = TcpTransport::new(stream).expect("failed to enter non-blocking mode");

    let client = Client::new(
        transport,
        4096,
        4096,
        ClientConfig::default(),
        |publish| {
            if publish.retain {
                info!("{} (retained): {:?}", publish.topic_name, publish.payload);
            } else {
                println!("{} {:?}", publish.topic_name, publish.payload);
            }
        },
    );

    let client_id = format!("sub_client{}", process::id());
    client
        .connect(&ConnectOptions {
            client_id: &client_id,
            clean_session: true,
            ..ConnectOptions::default()
        })
        .expect("failed to enqueue CONNECT");

    let subscriptions: Vec<(&str, QoS)> = topics
        .iter()
        .map(|t| (t.as_str(), QoS::AtLeastOnce))
        .collect();
    client
        .subscribe(&subscriptions)
        .expect("failed to enqueue SUBSCRIBE");

    loop {
        if let Err(e) = client.sync() {
            warn!("sync failed: {}", e);
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
}
