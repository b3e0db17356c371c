use std::error::Error;

use chat_link::stream::client::ConnectionClient;
use chat_link::stream::endpoint::{Credential, SessionEndpoint, LOCAL_CHAT_ENDPOINT};
use chat_link::stream::handlers::{ConnectionEvent, ConnectionHandlers};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_link=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let base = env_or("CHAT_ENDPOINT", LOCAL_CHAT_ENDPOINT);
    let room = env_or("CHAT_ROOM", "global");
    let token = env_or("CHAT_ACCESS_TOKEN", "REPLACE_WITH_ACCESS_TOKEN");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let endpoint = SessionEndpoint::for_room(&base, &room)?;
        let client = ConnectionClient::new(endpoint, Credential::new(token));
        let (handlers, mut events) = ConnectionHandlers::channel();
        client.connect(handlers)?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("joined room {room}; type a message, /quit to leave");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "/quit" {
                        break;
                    }
                    if let Err(err) = client.send_message(line) {
                        eprintln!("not sent: {err}");
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(ConnectionEvent::Message(text)) => println!("{text}"),
                        Some(ConnectionEvent::Reconnecting { attempt }) => {
                            eprintln!("reconnecting (attempt {attempt})");
                        }
                        Some(ConnectionEvent::Reconnected) => eprintln!("connected"),
                        Some(ConnectionEvent::Error(err)) => eprintln!("error: {err}"),
                        Some(ConnectionEvent::Failed(reason)) => {
                            eprintln!("giving up: {reason}");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        client.disconnect();
        Ok::<(), Box<dyn Error>>(())
    })
}
