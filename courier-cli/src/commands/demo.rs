//! Drive the pipeline against a mock API.

use anyhow::{Context, Result};
use courier_client::{ClientConfig, Courier, FileArchive, MockTransport, TransportError};
use courier_core::{PipelineEvent, Reachability, State};
use courier_types::{Event, EventName, ProfileKey, Properties, PushEnablement};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// How long to keep flushing before giving up on delivery.
const DELIVERY_DEADLINE: Duration = Duration::from_secs(15);

/// Run the demo command.
pub async fn run(
    data_dir: &Path,
    config_path: Option<&Path>,
    archive_path: Option<PathBuf>,
    fail: usize,
    api_key: &str,
) -> Result<()> {
    let config = match config_path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let archive_path = archive_path
        .or_else(|| config.archive.path.clone())
        .unwrap_or_else(|| data_dir.join(crate::ARCHIVE_FILE));

    let transport = MockTransport::new();
    if fail > 0 {
        transport.fail_next_n(
            fail,
            TransportError::Status {
                status: 503,
                retry_after: None,
            },
        );
    }

    let courier = Courier::builder()
        .config(config)
        .transport(transport.clone())
        .archive(FileArchive::new(&archive_path))
        .spawn()
        .context("Failed to start pipeline")?;
    let mut events = courier.subscribe();

    println!("=== courier-cli demo ===");
    println!("Archive: {}", archive_path.display());
    println!();

    courier.initialize(api_key)?;
    courier.set_email("ada@example.com")?;
    courier.set_profile_property(ProfileKey::FirstName, "Ada")?;
    courier.set_profile_property(ProfileKey::Custom("plan".into()), "pro")?;

    let mut properties = Properties::new();
    properties.insert("sku".into(), json!("ABC-123"));
    courier.enqueue_event(
        Event::new(EventName::ViewedProduct)
            .with_properties(properties)
            .with_value(19.99),
    )?;
    courier.set_push_token("deadbeefcafef00d", PushEnablement::Authorized)?;

    drain(&courier, &transport).await?;

    // Connectivity flap: in-flight work is requeued, then resent.
    courier.enqueue_event(Event::new(EventName::AddedToCart))?;
    courier.flush()?;
    courier.report_connectivity(Reachability::NotReachable)?;
    courier.report_connectivity(Reachability::ReachableViaCellular)?;
    drain(&courier, &transport).await?;

    courier.stop()?;
    let state = courier.snapshot().await?;
    courier.shutdown().await?;

    print_events(&mut events);
    println!();
    print_state(&state);
    println!();
    println!(
        "Transport: {} attempts, {} delivered",
        transport.attempts(),
        transport.delivered().len()
    );

    Ok(())
}

/// Flush until nothing is queued or in flight, or the deadline passes.
async fn drain(courier: &Courier, transport: &MockTransport) -> Result<()> {
    match tokio::time::timeout(DELIVERY_DEADLINE, flush_until_empty(courier)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "Gave up waiting for delivery after {:?} ({} attempts so far)",
                DELIVERY_DEADLINE,
                transport.attempts()
            );
            Ok(())
        }
    }
}

async fn flush_until_empty(courier: &Courier) -> Result<()> {
    loop {
        courier.flush()?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = courier.snapshot().await?;
        let idle = state.pending_len() == 0 && state.pending_profile.is_none();
        if state.is_initialized() && idle {
            return Ok(());
        }
    }
}

fn print_events(events: &mut broadcast::Receiver<PipelineEvent>) {
    println!("Events:");
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::Initialized {
                anonymous_id,
                restored,
            } => println!("  initialized  {} ({} restored)", anonymous_id, restored),
            PipelineEvent::Delivered { id, kind } => println!("  delivered    {} {}", kind, id),
            PipelineEvent::Retrying { id, reason, .. } => {
                println!("  retrying     {} ({})", id, reason)
            }
            PipelineEvent::Dropped { id, kind, reason } => {
                println!("  dropped      {} {} ({:?})", kind, id, reason)
            }
            PipelineEvent::AttributeRejected { key, value } => {
                println!("  rejected     {} = {}", key, value)
            }
            PipelineEvent::NotBuilt { kind, reason } => {
                println!("  not built    {} ({})", kind, reason)
            }
        }
    }
}

fn print_state(state: &State) {
    println!("State:");
    println!(
        "  Anonymous ID: {}",
        state.anonymous_id.as_deref().unwrap_or("-")
    );
    println!("  Email:        {}", state.email.as_deref().unwrap_or("-"));
    println!(
        "  Push token:   {}",
        state
            .push_token_data
            .as_ref()
            .map(|t| t.token.as_str())
            .unwrap_or("-")
    );
    println!("  Queued:       {}", state.queue.len());
    println!("  In flight:    {}", state.requests_in_flight.len());
    println!("  Retry:        {:?}", state.retry_info);
    println!("  Started:      {}", state.started);
}
