//! `selected`, `select`, `deselect`: the persisted selection.

use tabled::Tabled;

use kubedeck_config::{SettingsStore, load_settings_from};
use kubedeck_core::{ClusterIdentity, SelectionReport};

use crate::cli::{DeselectArgs, GlobalOpts, SelectArgs};
use crate::commands::{coordinator, load, settings_file, settings_store, util};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Kubeconfig")]
    kubeconfig: String,
}

impl From<&ClusterIdentity> for ClusterRow {
    fn from(id: &ClusterIdentity) -> Self {
        Self {
            context: id.context().to_owned(),
            kubeconfig: id.kubeconfig().display().to_string(),
        }
    }
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Change")]
    change: &'static str,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Flatten a report into one row per touched cluster.
fn change_rows(report: &SelectionReport) -> Vec<ChangeRow> {
    let row = |id: &ClusterIdentity, change, detail: &str| ChangeRow {
        cluster: id.to_string(),
        change,
        detail: detail.to_owned(),
    };
    report
        .added
        .iter()
        .map(|id| row(id, "added", ""))
        .chain(report.kept.iter().map(|id| row(id, "kept", "")))
        .chain(report.removed.iter().map(|id| row(id, "removed", "")))
        .chain(report.failed.iter().map(|f| row(&f.cluster, "failed", &f.reason)))
        .collect()
}

pub fn render_report(report: &SelectionReport, global: &GlobalOpts) -> Result<String, CliError> {
    output::render_single(
        global.output,
        report,
        |r| {
            let rows = change_rows(r);
            if rows.is_empty() {
                return "No changes".into();
            }
            tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string()
        },
        |r| {
            r.added
                .iter()
                .chain(&r.kept)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        },
    )
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn handle_selected(global: &GlobalOpts) -> Result<(), CliError> {
    let settings = load_settings_from(&settings_file(global))?;
    let selected = settings.selected_identities();

    let out = output::render_list(
        global.output,
        &selected,
        |c| ClusterRow::from(c),
        ToString::to_string,
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Connect to the requested clusters and persist whichever succeeded.
pub async fn handle_select(args: SelectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (settings, core) = load(global)?;
    let mut requested = util::resolve_all(&args.clusters);
    util::ensure_available(&requested, &util::scan_available(&settings).await?)?;

    if args.add {
        let mut merged = settings.selected_identities();
        merged.append(&mut requested);
        requested = merged;
    }

    let coord = coordinator(core, settings_store(global), false);
    let result = coord.select(requested).await;
    coord.shutdown().await;
    let report = result?;

    let out = render_report(&report, global)?;
    output::print_output(&out, global.quiet);

    match report.failed.first() {
        Some(failure) => Err(CliError::RebuildFailed {
            cluster: failure.cluster.to_string(),
            reason: failure.reason.clone(),
        }),
        None => Ok(()),
    }
}

/// Drop clusters from the persisted selection without connecting.
pub async fn handle_deselect(args: DeselectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let removing = util::resolve_all(&args.clusters);
    remove_selected(&settings_store(global), &removing).await?;

    if !global.quiet {
        eprintln!("Removed {}", util::join(&removing));
    }
    Ok(())
}

/// Remove `removing` from the saved selection in one read-modify-write.
/// Nothing is written unless every cluster is currently selected.
async fn remove_selected(
    store: &SettingsStore,
    removing: &[ClusterIdentity],
) -> Result<Vec<ClusterIdentity>, CliError> {
    let settings = store
        .try_update(|settings| {
            let current = settings.selected_identities();
            if let Some(missing) = removing.iter().find(|id| !current.contains(id)) {
                return Err(CliError::NotFound {
                    resource_type: "selected cluster".into(),
                    identifier: missing.to_string(),
                    list_command: "selected".into(),
                });
            }
            let remaining: Vec<ClusterIdentity> = current
                .into_iter()
                .filter(|id| !removing.contains(id))
                .collect();
            settings.set_selected(&remaining);
            Ok(())
        })
        .await?;
    Ok(settings.selected_identities())
}
