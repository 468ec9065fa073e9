//! Interactive relay client.
//!
//! Every line typed on stdin is sent to the room; everything other
//! clients send is printed as it arrives.
//!
//! ```text
//! cargo run -p relay-server --example ws_client
//! RELAY_CLIENT_URL=ws://10.0.0.5:7000/ws cargo run -p relay-server --example ws_client
//! ```

use std::env;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Where to connect: env override or default.
    let url = env::var("RELAY_CLIENT_URL").unwrap_or_else(|_| "ws://127.0.0.1:7000/ws".to_string());

    println!("Connecting to {url}...");
    let (ws, _) = connect_async(url.as_str()).await?;
    println!("Connected. Type a message and press enter; 'quit' or 'exit' to leave.\n");

    let (mut outgoing, mut incoming) = ws.split();

    let printer = tokio::spawn(async move {
        while let Some(msg) = incoming.next().await {
            match msg {
                Ok(Message::Text(text)) => println!("<< {}", text.as_str()),
                Ok(Message::Binary(data)) => println!("<< ({} bytes binary)", data.len()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Read error: {e}");
                    break;
                }
            }
        }
        println!("Server closed the connection.");
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            println!("Exiting client.");
            break;
        }
        if let Err(e) = outgoing.send(Message::text(trimmed)).await {
            eprintln!("Write error: {e}");
            break;
        }
    }

    let _ = outgoing.close().await;
    printer.abort();
    Ok(())
}
