//! `status`: connect to the saved selection and report each cluster.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use tokio::task::JoinSet;

use kubedeck_core::{
    ClusterIdentity, ClusterStatus, MemorySelectionStore, SelectionCoordinator,
};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::commands::{coordinator, load};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
pub struct StatusEntry {
    #[serde(flatten)]
    cluster: ClusterIdentity,
    #[serde(flatten)]
    status: ClusterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Outcome of one probe: server version or the error text.
pub type ProbeResults = HashMap<ClusterIdentity, Result<String, String>>;

/// Ask every live cluster for its version through the wrapped call path,
/// so failures feed auth and transport tracking.
pub async fn probe_all(coord: &SelectionCoordinator) -> ProbeResults {
    let mut jobs = JoinSet::new();
    for (id, runtime) in coord.runtimes().iter() {
        let id = id.clone();
        let runtime = Arc::clone(runtime);
        jobs.spawn(async move {
            let result = runtime
                .call("server_version", |client| async move {
                    client.server_version().await
                })
                .await
                .map_err(|e| e.to_string());
            (id, result)
        });
    }

    let mut results = ProbeResults::new();
    while let Some(joined) = jobs.join_next().await {
        if let Ok((id, result)) = joined {
            results.insert(id, result);
        }
    }
    results
}

pub async fn collect(coord: &SelectionCoordinator, probes: &ProbeResults) -> Vec<StatusEntry> {
    coord
        .statuses()
        .await
        .into_iter()
        .map(|(cluster, status)| {
            let probe = probes.get(&cluster);
            let auth_reason = coord
                .runtime(&cluster)
                .filter(|rt| !rt.auth().is_valid())
                .and_then(|rt| rt.auth().reason());
            let detail = match &status {
                ClusterStatus::Failed { reason } => Some(reason.clone()),
                _ => auth_reason.or_else(|| probe.and_then(|r| r.as_ref().err().cloned())),
            };
            StatusEntry {
                version: probe.and_then(|r| r.as_ref().ok().cloned()),
                detail,
                cluster,
                status,
            }
        })
        .collect()
}

pub fn render(entries: &[StatusEntry], global: &GlobalOpts) -> Result<String, CliError> {
    let color = output::should_color(global.color);
    output::render_list(
        global.output,
        entries,
        |e| StatusRow {
            cluster: e.cluster.to_string(),
            state: output::status_label(&e.status, color),
            version: e.version.clone().unwrap_or_default(),
            detail: e.detail.clone().unwrap_or_default(),
        },
        |e| format!("{}\t{}", e.cluster, output::status_label(&e.status, false)),
    )
}

/// Connects without persisting anything: a cluster that fails here stays
/// in the saved selection.
pub async fn handle(args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (settings, core) = load(global)?;
    let store = Arc::new(MemorySelectionStore::new(settings.selected_identities()));
    let coord = coordinator(core, store, false);

    let result = async {
        coord.restore().await?;
        let probes = if args.no_probe {
            ProbeResults::new()
        } else {
            probe_all(&coord).await
        };
        Ok::<_, CliError>(collect(&coord, &probes).await)
    }
    .await;
    coord.shutdown().await;
    let entries = result?;

    let out = render(&entries, global)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
