use std::error::Error;

use cordwire::gateway::DispatchEvent;
use cordwire::{Client, Intents};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cordwire=debug")),
        )
        .init();

    let token = std::env::var("BOT_TOKEN").unwrap_or_else(|_| "REPLACE_WITH_BOT_TOKEN".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (events_tx, mut events) = mpsc::unbounded_channel::<DispatchEvent>();
        let intents = Intents::default_set() | Intents::MESSAGE_CONTENT;
        let mut client = Client::new(SecretString::new(token), intents, events_tx);

        client.login().await?;

        let outcome = tokio::select! {
            result = client.run() => result,
            _ = async {
                while let Some(event) = events.recv().await {
                    if event.name == "ready" {
                        println!("logged in as {}", event.payload["user"]["username"]);
                    }
                    println!("event={} seq={:?}", event.name, event.sequence);
                }
            } => Ok(()),
            _ = tokio::signal::ctrl_c() => Ok(()),
        };

        client.close().await;
        outcome?;
        Ok::<(), Box<dyn Error>>(())
    })
}
