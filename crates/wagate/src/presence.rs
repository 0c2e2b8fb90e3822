use crate::lifecycle::BatchSummary;
use crate::protocol::Presence;
use crate::registry::SessionRegistry;

/// Mark every authenticated session as available.
///
/// Walks a snapshot of the registry, so sessions added mid-walk wait for the
/// next run. A failing session is logged and skipped.
pub async fn broadcast_presence(registry: &SessionRegistry) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for (key, connection) in registry.list() {
        if !connection.is_authenticated() {
            summary.skipped += 1;
            continue;
        }

        summary.attempted += 1;
        match connection.send_presence(Presence::Available).await {
            Ok(()) => {
                summary.succeeded += 1;
                tracing::debug!(session = %key, "presence sent");
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(session = %key, err = %e, "presence failed");
            }
        }
    }

    summary
}
