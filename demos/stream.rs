//! Example: print event stream items as they arrive.
//!
//! Runs until the daemon closes the stream or the process is interrupted.
//!
//! ```bash
//! cargo run --example stream -- <group_id> [by]
//! ```

use anyhow::{bail, Result};
use cohort_client::{Client, StreamItem, StreamOptions};

fn main() -> Result<()> {
    cohort_client::logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(group_id) = args.first() else {
        bail!("usage: stream <group_id> [by]");
    };
    let by = args.get(1).map(String::as_str).unwrap_or("user");

    let client = Client::discover();
    for item in client.events_stream(group_id, by, StreamOptions::new())? {
        match item? {
            StreamItem::Event { event } => println!("event: {event}"),
            StreamItem::Heartbeat { ts } => eprintln!("heartbeat at {ts}"),
            StreamItem::Other => {}
        }
    }
    eprintln!("stream closed by daemon");
    Ok(())
}
