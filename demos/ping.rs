//! Example: ping the daemon and print its identity.
//!
//! ```bash
//! cargo run --example ping
//! ```

use anyhow::Result;
use cohort_client::Client;

fn main() -> Result<()> {
    cohort_client::logging::init();

    let client = Client::discover();
    println!("daemon endpoint: {}", client.endpoint());

    let pong = client.ping()?;
    println!("{}", serde_json::to_string_pretty(&pong)?);
    Ok(())
}
