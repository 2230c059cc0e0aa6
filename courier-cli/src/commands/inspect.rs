//! Summarize an archived state file.

use anyhow::{Context, Result};
use courier_client::{Archive, FileArchive};
use std::path::Path;

/// Run the inspect command.
pub async fn run(path: &Path) -> Result<()> {
    println!("=== courier-cli inspect ===");
    println!();

    let Some(state) = FileArchive::new(path)
        .load()
        .await
        .with_context(|| format!("Failed to read archive {}", path.display()))?
    else {
        println!("No archive at {}", path.display());
        println!();
        println!("Run 'courier-cli demo' to create one.");
        return Ok(());
    };

    println!("Identity:");
    println!("  Anonymous ID: {}", state.anonymous_id);
    println!("  API key:      {}", state.api_key.as_deref().unwrap_or("-"));
    println!("  Email:        {}", state.email.as_deref().unwrap_or("-"));
    println!(
        "  Phone:        {}",
        state.phone_number.as_deref().unwrap_or("-")
    );
    println!(
        "  External ID:  {}",
        state.external_id.as_deref().unwrap_or("-")
    );
    match &state.push_token_data {
        Some(push) => println!("  Push token:   {} ({:?})", push.token, push.enablement),
        None => println!("  Push token:   -"),
    }

    if let Some(pending) = &state.pending_profile {
        println!();
        println!("Pending profile: {} fields", pending.len());
        for (key, value) in pending {
            println!("  {} = {}", key, value);
        }
    }

    println!();
    println!("Queue: {} requests", state.queue.len());
    for (i, request) in state.queue.iter().enumerate() {
        println!("  [{}] {} {}", i, request.kind(), request.id);
    }

    Ok(())
}
