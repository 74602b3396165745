//! Chat with the remembered peripheral over the data characteristic.
//!
//! Lines typed on stdin are written to the peripheral; text it notifies is
//! printed. `/notify on`, `/notify off`, `/reconnect` and `/quit` are
//! commands.
//!
//! Run with: cargo run --example central_chat

use gatt_central::{Central, FileStore, NotifyOutcome, Result, SessionConfig, UiEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatt_central=info".parse().unwrap()),
        )
        .init();

    let store = FileStore::new(std::env::temp_dir().join("gatt-central"));
    println!("Remembered peripheral stored in {}", store.dir().display());

    let (central, mut events) = Central::start(SessionConfig::default(), store).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(UiEvent::TextReceived(text)) => println!("<< {}", text),
                Some(UiEvent::StateChanged(state)) => println!("-- {}", state),
                None => break,
            },
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };

                match line.trim() {
                    "/quit" => break,
                    "/reconnect" => {
                        if let Err(e) = central.reconnect().await {
                            println!("!! {}", e);
                        }
                    }
                    "/notify on" | "/notify off" => {
                        let enabled = line.trim().ends_with("on");
                        match central.set_notify(enabled).await? {
                            NotifyOutcome::Requested => println!("-- notify {}", enabled),
                            NotifyOutcome::NotReady => println!("!! not connected yet"),
                        }
                    }
                    text => match central.send_text(text).await {
                        Ok(()) => println!(">> {}", text),
                        Err(e) => println!("!! {}", e),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                break;
            }
        }
    }

    central.shutdown().await?;
    println!("Done!");

    Ok(())
}
