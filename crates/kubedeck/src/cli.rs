//! Clap derive structures for the `kubedeck` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use kubedeck_core::ClusterIdentity;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// kubedeck -- keep many Kubernetes contexts connected at once
#[derive(Debug, Parser)]
#[command(
    name = "kubedeck",
    version,
    about = "Connect to many Kubernetes contexts at once and keep them healthy",
    long_about = "Selects clusters by (kubeconfig, context), connects to each in isolation,\n\
        recovers from rejected credentials and dead connections per cluster,\n\
        and follows kubeconfig edits on disk.\n\n\
        Clusters are named PATH:CONTEXT, e.g. ~/.kube/config:staging.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "KUBEDECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "KUBEDECK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Write logs to stderr as JSON lines
    #[arg(long, env = "KUBEDECK_LOG_JSON", global = true)]
    pub log_json: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List contexts found in the watched kubeconfig locations
    #[command(alias = "ctx")]
    Contexts,

    /// Show the persisted selection
    Selected,

    /// Connect to the selection and report each cluster's state
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Replace the selection (or add to it with --add)
    Select(SelectArgs),

    /// Remove clusters from the selection
    Deselect(DeselectArgs),

    /// Keep the selection connected, follow kubeconfig edits, print events
    ///
    /// Reads console commands from stdin: status, select, add, deselect,
    /// retry, quit.
    Run(RunArgs),

    /// Inspect settings
    Config(ConfigArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Skip the reachability probe
    #[arg(long)]
    pub no_probe: bool,
}

#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Clusters as PATH:CONTEXT
    #[arg(required = true, value_name = "CLUSTER")]
    pub clusters: Vec<ClusterIdentity>,

    /// Keep the current selection and add these
    #[arg(long, short = 'a')]
    pub add: bool,
}

#[derive(Debug, Args)]
pub struct DeselectArgs {
    /// Clusters as PATH:CONTEXT
    #[arg(required = true, value_name = "CLUSTER")]
    pub clusters: Vec<ClusterIdentity>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Only print events for these clusters
    #[arg(long = "only", value_name = "CLUSTER")]
    pub only: Vec<ClusterIdentity>,

    /// Do not read console commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings file path
    Path,
    /// Print the effective settings (file plus KUBEDECK_* overrides)
    Show,
}
