//! Command dispatch: load inputs, run the engine, print results.

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::generate;
use tracing::{debug, instrument};

use crate::application::{ProportionKind, ReconciliationEngine};
use crate::cli::args::{Cli, Commands, ConfigCommands, ReconcileCommands};
use crate::cli::output;
use crate::cli::{CliError, CliResult};
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::{Frame, TreeConvert};
use crate::infrastructure::{load_bounds, load_frame, load_hierarchy, load_weights, write_frame};
use crate::solver::Backend;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Some(Commands::Tree { hierarchy }) => cmd_tree(hierarchy),
        Some(Commands::Levels {
            hierarchy,
            skip_leaves,
        }) => cmd_levels(hierarchy, *skip_leaves),
        Some(Commands::Matrix { hierarchy }) => cmd_matrix(hierarchy),
        Some(Commands::Reconcile { command }) => cmd_reconcile(cli, command),
        Some(Commands::Config { command }) => cmd_config(cli, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        None => Err(CliError::Usage(
            "no command given, see 'htsr --help'".to_string(),
        )),
    }
}

fn project_dir(cli: &Cli) -> CliResult<PathBuf> {
    match &cli.project_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir()
            .map_err(|e| CliError::Infra(crate::infrastructure::InfraError::io("current dir", e))),
    }
}

fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let dir = project_dir(cli)?;
    Ok(Settings::load(Some(&dir))?)
}

fn engine(hierarchy: &Path) -> CliResult<ReconciliationEngine> {
    let definition = load_hierarchy(hierarchy)?;
    Ok(ReconciliationEngine::new(&definition)?)
}

fn print_frame(frame: &Frame) -> CliResult<()> {
    write_frame(frame, io::stdout().lock())?;
    Ok(())
}

fn print_proportions(label: &str, frame: &Frame) -> CliResult<()> {
    output::header(label);
    write_frame(frame, io::stderr().lock())?;
    Ok(())
}

#[instrument]
fn cmd_tree(hierarchy: &Path) -> CliResult<()> {
    let engine = engine(hierarchy)?;
    output::info(&engine.tree().to_tree_string());
    Ok(())
}

#[instrument]
fn cmd_levels(hierarchy: &Path, skip_leaves: bool) -> CliResult<()> {
    let engine = engine(hierarchy)?;
    for (depth, names) in engine.tree().nodes_per_level(skip_leaves).enumerate() {
        output::info(&format!("{}: {}", depth, names.join(", ")));
    }
    Ok(())
}

#[instrument]
fn cmd_matrix(hierarchy: &Path) -> CliResult<()> {
    let engine = engine(hierarchy)?;
    let summing = engine.summing();
    let width = summing
        .tree_nodes()
        .iter()
        .chain(summing.bottom_nodes())
        .map(String::len)
        .max()
        .unwrap_or(1);

    let header: Vec<String> = summing
        .bottom_nodes()
        .iter()
        .map(|name| format!("{name:>width$}"))
        .collect();
    output::info(&format!("{:width$} {}", "", header.join(" ")));
    for (name, row) in summing.tree_nodes().iter().zip(summing.indicator_rows()) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:>width$}")).collect();
        output::info(&format!("{name:width$} {}", cells.join(" ")));
    }
    Ok(())
}

fn cmd_reconcile(cli: &Cli, command: &ReconcileCommands) -> CliResult<()> {
    match command {
        ReconcileCommands::BottomUp {
            hierarchy,
            forecast,
        } => {
            let engine = engine(hierarchy)?;
            let reconciled = engine.bottom_up(&load_frame(forecast)?)?;
            print_frame(&reconciled)
        }
        ReconcileCommands::TopDown {
            hierarchy,
            history,
            forecast,
            kind,
            show_proportions,
        } => {
            let kind: ProportionKind = kind.parse()?;
            let engine = engine(hierarchy)?;
            let result = engine.top_down(&load_frame(history)?, &load_frame(forecast)?, kind)?;
            if result.proportions.skipped_steps > 0 {
                output::warning(&format!(
                    "{} history steps with a zero total were left out of the proportions",
                    result.proportions.skipped_steps
                ));
            }
            if *show_proportions {
                output::header(&format!("{} proportions", result.proportions.kind));
                for (node, share) in result.proportions.iter() {
                    output::detail(&format!("{node}: {share}"));
                }
            }
            print_frame(&result.forecast)
        }
        ReconcileCommands::Proportions {
            hierarchy,
            forecast,
            show_proportions,
        } => {
            let engine = engine(hierarchy)?;
            let result = engine.forecast_proportions(&load_frame(forecast)?)?;
            if *show_proportions {
                print_proportions("forecast proportions", &result.proportions)?;
            }
            print_frame(&result.forecast)
        }
        ReconcileCommands::MiddleOut {
            hierarchy,
            forecast,
            level,
            show_proportions,
        } => {
            let engine = engine(hierarchy)?;
            let result = engine.middle_out(&load_frame(forecast)?, *level)?;
            if *show_proportions {
                print_proportions(&format!("proportions below level {level}"), &result.proportions)?;
            }
            print_frame(&result.forecast)
        }
        ReconcileCommands::Optimal {
            hierarchy,
            forecast,
            weights,
            bounds,
            backend,
            parallel,
            report,
        } => {
            let settings = load_settings(cli)?;
            let mut options = settings.combination_options();
            if let Some(name) = backend {
                options.backend = name.parse::<Backend>()?;
            }
            options.parallel |= *parallel;
            if let Some(path) = weights {
                options.weights = Some(load_weights(path)?);
            }
            if let Some(path) = bounds {
                options.bounds = Some(load_bounds(path)?);
            }
            debug!("optimal combination options: {:?}", options);

            let engine = engine(hierarchy)?;
            let result = engine.optimal_combination(&load_frame(forecast)?, &options)?;
            if *report {
                output::header(&format!("{} diagnostics", options.backend));
                for step in &result.diagnostics {
                    output::action(
                        &step.index,
                        &format!(
                            "{} (iterations {}, residual {:.3e}, cond {:.3e})",
                            step.report.stop,
                            step.report.iterations,
                            step.report.residual_norm,
                            step.report.condition
                        ),
                    );
                    if let Some(refinement) = &step.refinement {
                        output::detail(&format!(
                            "bounded: {} (iterations {}, cost {:.3e}, active {})",
                            refinement.status,
                            refinement.iterations,
                            refinement.cost,
                            refinement.active
                        ));
                    }
                    if !step.report.stop.converged() {
                        output::warning(&format!("step {} did not converge", step.index));
                    }
                }
            }
            print_frame(&result.forecast)
        }
    }
}

fn cmd_config(cli: &Cli, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let settings = load_settings(cli)?;
            output::info(&settings.to_toml()?);
            Ok(())
        }
        ConfigCommands::Path => {
            match global_config_path() {
                Some(path) => output::action("global", &path.display()),
                None => output::warning("no global config directory on this platform"),
            }
            output::action("local", &local_config_path(&project_dir(cli)?).display());
            Ok(())
        }
        ConfigCommands::Template => {
            output::info(&Settings::template());
            Ok(())
        }
    }
}
