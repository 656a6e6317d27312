mod chat;
mod setup;

use anyhow::Result;
use parley_core::Credentials;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let creds = match Credentials::load()? {
        Some(c) if c.is_configured() => c,
        _ => setup::run_setup()?,
    };
    chat::run(creds).await
}
