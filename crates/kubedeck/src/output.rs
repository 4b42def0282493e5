//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use kubedeck_core::{AuthState, ClusterStatus, Connectivity};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Short state label for a cluster, colored when `color` is set.
pub fn status_label(status: &ClusterStatus, color: bool) -> String {
    let (label, tone) = match status {
        ClusterStatus::Connected {
            auth: AuthState::Invalid,
            ..
        } => ("auth invalid", Tone::Bad),
        ClusterStatus::Connected {
            auth: AuthState::Recovering,
            ..
        } => ("recovering", Tone::Warn),
        ClusterStatus::Connected {
            connectivity: Connectivity::Degraded,
            ..
        } => ("degraded", Tone::Warn),
        ClusterStatus::Connected { .. } => ("connected", Tone::Good),
        ClusterStatus::Failed { .. } => ("failed", Tone::Bad),
        ClusterStatus::Pending => ("pending", Tone::Muted),
    };
    paint(label, tone, color)
}

#[derive(Clone, Copy)]
pub enum Tone {
    Good,
    Warn,
    Bad,
    Muted,
}

pub fn paint(text: &str, tone: Tone, color: bool) -> String {
    if !color {
        return text.to_owned();
    }
    match tone {
        Tone::Good => text.green().to_string(),
        Tone::Warn => text.yellow().to_string(),
        Tone::Bad => text.red().bold().to_string(),
        Tone::Muted => text.dimmed().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via `serde_yaml`
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(data)?),
        OutputFormat::Plain => Ok(data.iter().map(&id_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views don't use
/// the `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(data)?),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Item {
        name: &'static str,
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Name")]
        name: &'static str,
    }

    fn items() -> Vec<Item> {
        vec![Item { name: "dev" }, Item { name: "prod" }]
    }

    #[test]
    fn plain_is_one_identifier_per_line() {
        let out = render_list(
            OutputFormat::Plain,
            &items(),
            |i| Row { name: i.name },
            |i| i.name.to_owned(),
        )
        .unwrap();
        assert_eq!(out, "dev\nprod");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_list(
            OutputFormat::JsonCompact,
            &items(),
            |i| Row { name: i.name },
            |i| i.name.to_owned(),
        )
        .unwrap();
        assert_eq!(out, r#"[{"name":"dev"},{"name":"prod"}]"#);
    }

    #[test]
    fn table_uses_renamed_headers() {
        let out = render_list(
            OutputFormat::Table,
            &items(),
            |i| Row { name: i.name },
            |i| i.name.to_owned(),
        )
        .unwrap();
        assert!(out.contains("Name"));
        assert!(out.contains("prod"));
    }

    #[test]
    fn status_labels_without_color() {
        let degraded = ClusterStatus::Connected {
            auth: AuthState::Valid,
            connectivity: Connectivity::Degraded,
        };
        let invalid = ClusterStatus::Connected {
            auth: AuthState::Invalid,
            connectivity: Connectivity::Degraded,
        };
        assert_eq!(status_label(&degraded, false), "degraded");
        assert_eq!(status_label(&invalid, false), "auth invalid");
        assert_eq!(status_label(&ClusterStatus::Pending, false), "pending");
    }
}
