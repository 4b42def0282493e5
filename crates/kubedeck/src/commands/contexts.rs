//! `contexts`: what the watched kubeconfigs define right now.

use serde::Serialize;
use tabled::Tabled;

use kubedeck_core::ClusterIdentity;

use crate::cli::GlobalOpts;
use crate::commands::{load, util};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ContextEntry {
    #[serde(flatten)]
    cluster: ClusterIdentity,
    selected: bool,
}

#[derive(Tabled)]
struct ContextRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Kubeconfig")]
    kubeconfig: String,
}

impl From<&ContextEntry> for ContextRow {
    fn from(entry: &ContextEntry) -> Self {
        Self {
            marker: if entry.selected { "*" } else { "" },
            context: entry.cluster.context().to_owned(),
            kubeconfig: entry.cluster.kubeconfig().display().to_string(),
        }
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (settings, _) = load(global)?;
    let selected = settings.selected_identities();

    let entries: Vec<ContextEntry> = util::scan_available(&settings)
        .await?
        .into_iter()
        .map(|cluster| ContextEntry {
            selected: selected.contains(&cluster),
            cluster,
        })
        .collect();

    let out = output::render_list(
        global.output,
        &entries,
        |e| ContextRow::from(e),
        |e| e.cluster.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
