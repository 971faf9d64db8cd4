//! Example: verify the connected daemon supports everything this client
//! relies on, by probing rather than comparing version strings.
//!
//! ```bash
//! cargo run --example compat_check
//! ```

use anyhow::Result;
use cohort_client::{Client, Requirements};

fn main() -> Result<()> {
    cohort_client::logging::init();

    let client = Client::discover();
    let info = client.assert_compatible(
        &Requirements::new()
            .capability("events_stream")
            .ops([
                "groups",
                "group_show",
                "send",
                "reply",
                "inbox_list",
                "inbox_mark_read",
                "inbox_mark_all_read",
                "context_get",
                "context_sync",
                "chat_ack",
                "notify_ack",
                "send_cross_group",
            ]),
    )?;

    println!("daemon is compatible (ipc_v={})", info.ipc_v);
    println!("{}", serde_json::to_string_pretty(&info.raw)?);
    Ok(())
}
