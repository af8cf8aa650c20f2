use anyhow::Context;
use std::path::PathBuf;

use portal_sync::config::{clear_config, load_config};
use portal_sync::logging::{self, log_error, log_info};
use portal_sync::session::PortalSession;
use portal_sync::sync::{DashboardData, ResourceState, SubscriptionData};
use portal_sync::upload_queue::QueuedFile;

fn describe_dashboard(state: &ResourceState<DashboardData>) -> String {
    let invoices = state
        .data
        .as_ref()
        .map(|data| data.invoices.len())
        .unwrap_or(0);
    format!(
        "dashboard [{}] {} invoices{}",
        serde_json::to_string(&state.connection_status).unwrap_or_default(),
        invoices,
        state
            .error
            .as_ref()
            .map(|e| format!(", error: {}", e))
            .unwrap_or_default()
    )
}

fn describe_subscription(state: &ResourceState<SubscriptionData>) -> String {
    let plan = state
        .data
        .as_ref()
        .and_then(|data| data.subscription.get("plan"))
        .and_then(|plan| plan.as_str())
        .unwrap_or("unknown")
        .to_string();
    format!(
        "subscription [{}] plan {}",
        serde_json::to_string(&state.connection_status).unwrap_or_default(),
        plan
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if std::env::args().nth(1).as_deref() == Some("--logout") {
        clear_config().context("Failed to clear configuration")?;
        log_info("daemon", "Signed out").unwrap_or_default();
        return Ok(());
    }

    let config = load_config().context("Failed to load configuration")?;
    let session = PortalSession::open(config).context("Failed to open session")?;

    // Any paths on the command line are queued for import
    let files = std::env::args()
        .skip(1)
        .map(PathBuf::from)
        .map(|path| {
            QueuedFile::from_path(&path)
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let dashboard = session.mount_dashboard().await?;
    let subscription = session.mount_subscription().await?;

    if !files.is_empty() {
        let report = session.store().admit(files)?;
        log_info(
            "daemon",
            &format!(
                "Queued {} files ({} duplicates skipped)",
                report.admitted.len(),
                report.duplicates.len()
            ),
        )
        .unwrap_or_default();

        let processor = session.http_processor()?;
        tokio::spawn(async move {
            if let Err(e) = processor.run_pending().await {
                log_error("daemon", &format!("Import run failed: {}", e)).unwrap_or_default();
            }
        });
    }

    let mut dashboard_changes = dashboard.watch();
    let mut subscription_changes = subscription.watch();
    log_info("daemon", &describe_dashboard(&dashboard.snapshot())).unwrap_or_default();
    log_info("daemon", &describe_subscription(&subscription.snapshot())).unwrap_or_default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = dashboard_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = describe_dashboard(&dashboard_changes.borrow_and_update());
                log_info("daemon", &line).unwrap_or_default();
            }
            changed = subscription_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = describe_subscription(&subscription_changes.borrow_and_update());
                log_info("daemon", &line).unwrap_or_default();
            }
        }
    }

    dashboard.unmount();
    subscription.unmount();
    session.close()?;
    Ok(())
}
