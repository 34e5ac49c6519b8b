mod config;
mod logging;

use std::time::Duration;

use market_chat::{ChatRuntimeHandle, spawn_runtime};
use market_core::{ChatCommand, ChatEvent};
use market_rest::ResourceClient;
use market_transport::HttpTransport;
use tracing::info;

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            eprintln!("Required: MARKET_API_URL and MARKET_API_KEY");
            eprintln!("Optional: MARKET_TICKET_ID (stream a thread), MARKET_AUTHOR_ID (send a probe message)");
            std::process::exit(1);
        }
    };

    let transport = match HttpTransport::new() {
        Ok(transport) => transport,
        Err(err) => {
            eprintln!("Failed to build HTTP transport: {err}");
            std::process::exit(1);
        }
    };

    let client = ResourceClient::new(transport, config.client_config());
    let handle = spawn_runtime(client, config.feed_config());

    let Some(ticket_id) = config.ticket_id.clone() else {
        println!("Resource client initialized against {}.", config.api_url);
        println!("Set MARKET_TICKET_ID to open a thread and stream live snapshots.");
        return;
    };

    if let Err(err) = stream_thread(&handle, &config, &ticket_id).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn stream_thread(
    handle: &ChatRuntimeHandle,
    config: &SmokeConfig,
    ticket_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = handle.subscribe();
    handle
        .send(ChatCommand::OpenThread {
            ticket_id: ticket_id.to_owned(),
        })
        .await?;
    info!(%ticket_id, "thread opened, streaming events");

    if let Some(author_id) = &config.author_id {
        let txn_id = handle
            .send_message(ticket_id, author_id.as_str(), "smoke probe", false)
            .await?;
        info!(%txn_id, "queued probe message");
    }

    // Observe a handful of poll cycles, then close cleanly.
    let deadline = tokio::time::Instant::now()
        + Duration::from_millis(config.poll_interval_ms.saturating_mul(4));
    loop {
        let event = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            event = events.recv() => event?,
        };
        match event {
            ChatEvent::ThreadSnapshot { ticket_id, messages } => {
                println!("[{ticket_id}] snapshot of {} message(s)", messages.len());
                if let Some(last) = messages.last() {
                    println!("  latest from {}: {}", last.author_id, last.body);
                }
            }
            ChatEvent::ThreadFetchFailed { ticket_id, error } => {
                println!("[{ticket_id}] fetch failed: {error}");
            }
            ChatEvent::SendReceipt(receipt) => match receipt.message_id {
                Some(id) => println!("send {} accepted as message {id}", receipt.client_txn_id),
                None => println!(
                    "send {} failed: {}",
                    receipt.client_txn_id,
                    receipt.error_code.as_deref().unwrap_or("unknown")
                ),
            },
            ChatEvent::ThreadClosed { ticket_id } => {
                println!("[{ticket_id}] closed");
            }
            ChatEvent::RuntimeError { code, message } => {
                println!("runtime error {code}: {message}");
            }
        }
    }

    handle
        .send(ChatCommand::CloseThread {
            ticket_id: ticket_id.to_owned(),
        })
        .await?;
    Ok(())
}
