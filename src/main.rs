//! Titan - band-touch mean reversion trader
//!
//! `titan score` runs the approval batch; `titan run` runs the live loop.

use anyhow::Result;

use titan_trader::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (credentials go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
