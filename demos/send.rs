//! Example: send a chat message into a group.
//!
//! ```bash
//! cargo run --example send -- <group_id> <text> [by]
//! ```

use anyhow::{bail, Result};
use cohort_client::{Client, MessageOptions};

fn main() -> Result<()> {
    cohort_client::logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (group_id, text) = match args.as_slice() {
        [g, t, ..] => (g.as_str(), t.as_str()),
        _ => bail!("usage: send <group_id> <text> [by]"),
    };
    let by = args.get(2).map(String::as_str).unwrap_or("user");

    let client = Client::discover();
    let result = client.send(group_id, text, MessageOptions::new().by(by))?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
