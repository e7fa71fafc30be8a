//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueHint};

/// Hierarchical time series reconciliation
#[derive(Parser, Debug)]
#[command(name = "htsr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Logging verbosity on stderr (-d info, -dd debug, -ddd trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub debug: u8,

    /// Directory holding a local .htsr.toml (default: cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the hierarchy as a tree
    Tree {
        /// Hierarchy definition (.toml or .json)
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
    },

    /// List node names per level, root first
    Levels {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        /// Drop leaves (and levels left empty)
        #[arg(long)]
        skip_leaves: bool,
    },

    /// Print the summing matrix
    Matrix {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
    },

    /// Reconcile a forecast table
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Reconciliation strategies; frames are JSON in split layout, output goes to stdout
#[derive(Subcommand, Debug)]
pub enum ReconcileCommands {
    /// Aggregate a bottom-level forecast
    BottomUp {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        /// Forecast over the bottom nodes
        #[arg(value_hint = ValueHint::FilePath)]
        forecast: PathBuf,
    },

    /// Split a root forecast by historical proportions
    TopDown {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        /// History over the bottom nodes
        #[arg(value_hint = ValueHint::FilePath)]
        history: PathBuf,
        /// Forecast with the single column "root"
        #[arg(value_hint = ValueHint::FilePath)]
        forecast: PathBuf,
        /// Proportion estimator: ahp or pha
        #[arg(short, long, default_value = "ahp")]
        kind: String,
        /// Print the static shares to stderr
        #[arg(long)]
        show_proportions: bool,
    },

    /// Split the root by the forecast's own sibling ratios
    Proportions {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        /// Forecast over all nodes
        #[arg(value_hint = ValueHint::FilePath)]
        forecast: PathBuf,
        /// Print the proportions frame to stderr
        #[arg(long)]
        show_proportions: bool,
    },

    /// Keep one level's forecasts, split downward and aggregate upward
    MiddleOut {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        forecast: PathBuf,
        /// Level to anchor on (0 = root)
        #[arg(short, long)]
        level: usize,
        #[arg(long)]
        show_proportions: bool,
    },

    /// Least-squares combination of all levels
    Optimal {
        #[arg(value_hint = ValueHint::FilePath)]
        hierarchy: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        forecast: PathBuf,
        /// Weight per node (.toml or .json map)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        weights: Option<PathBuf>,
        /// Lower/upper per bottom node (.toml or .json map)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        bounds: Option<PathBuf>,
        /// Solver backend, overrides settings: lsqr or lsmr
        #[arg(long)]
        backend: Option<String>,
        /// Solve time steps in parallel
        #[arg(long)]
        parallel: bool,
        /// Print per-step solver diagnostics to stderr
        #[arg(long)]
        report: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective settings
    Show,
    /// Show config file locations
    Path,
    /// Print a commented template
    Template,
}
