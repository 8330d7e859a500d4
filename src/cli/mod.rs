//! CF-017: CLI subcommands — init, validate, list, describe, plan, run, history.

use crate::core::context::Context;
use crate::core::parser;
use crate::core::executor::{Executor, RunReport};
use crate::core::planner::Planner;
use crate::core::registry::Registry;
use crate::core::resolver::{EdgeLabel, Node};
use crate::core::types::{
    values_to_json, CapforgeConfig, ExecutionPlan, Infeasibility, OrderedPlan, RunEvent, UnitKind,
    Value,
};
use crate::journal::eventlog;
use crate::units;
use clap::Subcommand;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new capforge catalog
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate capforge.yaml without running anything
    Validate {
        /// Path to capforge.yaml
        #[arg(short, long, default_value = "capforge.yaml")]
        file: PathBuf,
    },

    /// List units runnable on the supplied context (all capabilities if none)
    List {
        /// Path to capforge.yaml
        #[arg(short, long, default_value = "capforge.yaml")]
        file: PathBuf,

        /// Context value as key=value (repeatable)
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Include actions
        #[arg(long)]
        act: bool,

        /// Emit the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one unit's contract
    Describe {
        /// Path to capforge.yaml
        #[arg(short, long, default_value = "capforge.yaml")]
        file: PathBuf,

        /// Unit id
        id: String,

        /// Emit the descriptor as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve providers for a unit and show the execution order
    Plan {
        /// Path to capforge.yaml
        #[arg(short, long, default_value = "capforge.yaml")]
        file: PathBuf,

        /// Target unit id
        target: String,

        /// Context value as key=value (repeatable)
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// Plan and execute a unit with its providers
    Run {
        /// Path to capforge.yaml
        #[arg(short, long, default_value = "capforge.yaml")]
        file: PathBuf,

        /// Target unit id
        target: String,

        /// Context value as key=value (repeatable)
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// State directory for the run journal
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Run independent units of each plan level concurrently
        #[arg(long)]
        parallel: bool,

        /// Print the final context as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recorded runs from the journal
    History {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Show only the last N runs
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::List {
            file,
            context,
            act,
            json,
        } => cmd_list(&file, &context, act, json),
        Commands::Describe { file, id, json } => cmd_describe(&file, &id, json),
        Commands::Plan {
            file,
            target,
            context,
        } => cmd_plan(&file, &target, &context),
        Commands::Run {
            file,
            target,
            context,
            state_dir,
            parallel,
            json,
        } => cmd_run(&file, &target, &context, &state_dir, parallel, json),
        Commands::History { state_dir, limit } => cmd_history(&state_dir, limit),
    }
}

/// Parse `key=value`, coercing the value: booleans, integers and JSON
/// arrays/objects are typed; anything else stays a string.
pub fn parse_context_arg(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("context '{}' must be KEY=VALUE", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("context '{}' has an empty key", arg));
    }

    let value = match raw {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                Value::from(n)
            } else if raw.starts_with('[') || raw.starts_with('{') {
                serde_json::from_str::<serde_json::Value>(raw)
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(raw))
            } else {
                Value::from(raw)
            }
        }
    };
    Ok((key.to_string(), value))
}

fn build_context(args: &[String], config: &CapforgeConfig) -> Result<Context, String> {
    let mut context = Context::new().with_policy(config.policy.bindings);
    for arg in args {
        let (key, value) = parse_context_arg(arg)?;
        context.insert(key, value);
    }
    Ok(context)
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("capforge.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-catalog
description: "Managed by capforge"

policy:
  bindings: first_wins
  journal: true
  parallel: false

units:
  org.example.capability.greeting:
    description: Produce a greeting for a name
    inputs:
      name:
        type: string
        required: true
        verify: [non_empty]
    outputs: [greeting]
    run: echo "hello, $CAPFORGE_IN_NAME"

  org.example.action.shout:
    kind: action
    description: Upper-case the greeting
    inputs:
      greeting:
        type: string
        required: true
    outputs: [shout]
    run: echo "$CAPFORGE_IN_GREETING" | tr '[:lower:]' '[:upper:]'
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized capforge catalog at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let actions = config
            .units
            .values()
            .filter(|u| u.kind == UnitKind::Action)
            .count();
        println!(
            "OK: {} ({} capabilities, {} actions)",
            config.name,
            config.units.len() - actions,
            actions
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse, validate and register a manifest.
fn load_catalog(file: &Path) -> Result<(CapforgeConfig, Registry), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }
    let registry = units::registry_from_config(&config)?;
    Ok((config, registry))
}

fn cmd_list(file: &Path, context: &[String], act: bool, json: bool) -> Result<(), String> {
    let (config, registry) = load_catalog(file)?;
    let ctx = build_context(context, &config)?;

    let matched: Vec<_> = if ctx.is_empty() {
        registry
            .iter()
            .filter(|(_, u)| act || u.descriptor().kind == UnitKind::Capability)
            .map(|(_, u)| u.clone())
            .collect()
    } else {
        let available: BTreeSet<String> = ctx.key_set();
        let mut found = registry.by_attributes_of_kind(&available, UnitKind::Capability);
        if act {
            found.extend(registry.by_attributes_of_kind(&available, UnitKind::Action));
        }
        found.into_values().collect()
    };

    if json {
        let descriptors: Vec<_> = matched.iter().map(|u| u.descriptor()).collect();
        let out = serde_json::to_string_pretty(&descriptors)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    if matched.is_empty() {
        println!("No units match the supplied context.");
        return Ok(());
    }
    println!("{} ({} units)", config.name, matched.len());
    for unit in &matched {
        let d = unit.descriptor();
        println!("  [{}] {} v{}", d.kind, d.id, d.version);
        if !d.description.is_empty() {
            println!("      {}", d.description);
        }
    }
    Ok(())
}

fn cmd_describe(file: &Path, id: &str, json: bool) -> Result<(), String> {
    let (_, registry) = load_catalog(file)?;
    let unit = registry
        .get(id)
        .ok_or_else(|| format!("unit '{}' not found in registry", id))?;
    let d = unit.descriptor();

    if json {
        let out = serde_json::to_string_pretty(d)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    println!("{} v{} [{}]", d.id, d.version, d.kind);
    println!("  Name: {}", d.name);
    if !d.description.is_empty() {
        println!("  Description: {}", d.description);
    }
    if !d.tags.is_empty() {
        println!("  Tags: {}", d.tags.join(", "));
    }
    println!("  Inputs:");
    for property in d.inputs.values() {
        let verifiers: Vec<&str> = property.verifiers.iter().map(|v| v.name()).collect();
        let providers = registry.providers_of(&property.name);
        println!(
            "    {}: {}{}{}{}",
            property.name,
            property.type_tag,
            if property.required { " (required)" } else { "" },
            if verifiers.is_empty() {
                String::new()
            } else {
                format!(" verify [{}]", verifiers.join(", "))
            },
            if providers.is_empty() {
                String::new()
            } else {
                format!(" <- {}", providers.join(", "))
            }
        );
    }
    println!(
        "  Outputs: {}",
        d.outputs.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for request in &d.requests {
        match &request.condition {
            Some(cond) => println!("  Requests: {} (when {})", request.id, cond),
            None => println!("  Requests: {}", request.id),
        }
    }
    for raise in &d.raises {
        println!("  Raises: {} {}", raise.code, raise.description);
    }
    Ok(())
}

/// Plan `target`, printing the order or the reason it cannot run.
fn plan_target(
    registry: &Registry,
    target: &str,
    ctx: &Context,
) -> Result<OrderedPlan, String> {
    let planner = Planner::new(registry);
    let plan = planner.build_plan(target, ctx).map_err(|e| e.to_string())?;
    match plan {
        ExecutionPlan::Ordered(ordered) => Ok(ordered),
        ExecutionPlan::Infeasible(reason) => {
            println!("Plan infeasible: {}", reason);
            if let Infeasibility::Missing(_) = &reason {
                let graph = planner.build_graph(target, ctx).map_err(|e| e.to_string())?;
                for edge in graph.edges() {
                    if let (Node::Missing(key), Node::Unit(consumer)) = (&edge.from, &edge.to) {
                        let how = match edge.label {
                            EdgeLabel::Requested => "requested",
                            _ => "required",
                        };
                        println!("  - {} ({} by {})", key, how, consumer);
                    }
                }
            }
            Err(format!("cannot plan '{}'", target))
        }
    }
}

fn print_plan(registry: &Registry, plan: &OrderedPlan) {
    println!("Planning: {} ({} steps)", plan.target, plan.steps.len());
    let mut n = 0;
    for (depth, level) in plan.levels.iter().enumerate() {
        for id in level {
            n += 1;
            let outputs = registry
                .get(id)
                .map(|u| u.descriptor().outputs.iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            println!(
                "  {:>2}. [L{}] {} -> {}",
                n,
                depth,
                id,
                if outputs.is_empty() {
                    "(no outputs)".to_string()
                } else {
                    outputs.join(", ")
                }
            );
        }
    }
}

fn cmd_plan(file: &Path, target: &str, context: &[String]) -> Result<(), String> {
    let (config, registry) = load_catalog(file)?;
    let ctx = build_context(context, &config)?;
    let plan = plan_target(&registry, target, &ctx)?;
    print_plan(&registry, &plan);
    println!();
    println!(
        "Fingerprint: {}",
        Planner::new(&registry).fingerprint(&plan)
    );
    Ok(())
}

fn cmd_run(
    file: &Path,
    target: &str,
    context: &[String],
    state_dir: &Path,
    parallel: bool,
    json: bool,
) -> Result<(), String> {
    let (config, registry) = load_catalog(file)?;
    let ctx = build_context(context, &config)?;
    let plan = plan_target(&registry, target, &ctx)?;

    let mut executor = Executor::new(&registry);
    if config.policy.journal {
        executor = executor.with_journal(state_dir);
    }
    let result = if parallel || config.policy.parallel {
        executor.run_plan_parallel(&plan, ctx)
    } else {
        executor.run_plan(&plan, ctx)
    };
    let report = result.map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&values_to_json(report.context.values()))
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", out);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {} ({})", report.run_id, report.target);
    for step in &report.steps {
        let discarded = if step.discarded.is_empty() {
            String::new()
        } else {
            format!(" (kept earlier: {})", step.discarded.join(", "))
        };
        println!(
            "  {} {} ({:.2}s) -> {}{}",
            step.state,
            step.unit_id,
            step.duration_seconds,
            step.bound.join(", "),
            discarded
        );
    }
    println!();
    println!(
        "Run complete: {} step(s) in {:.2}s.",
        report.succeeded(),
        report.total_seconds
    );
}

fn cmd_history(state_dir: &Path, limit: usize) -> Result<(), String> {
    let events = eventlog::read_events(state_dir)?;
    let runs: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            RunEvent::RunCompleted {
                run_id,
                target,
                succeeded,
                failed,
                total_seconds,
            } => Some((&e.ts, run_id, target, *succeeded, *failed, *total_seconds)),
            _ => None,
        })
        .collect();

    if runs.is_empty() {
        println!("No runs recorded. Run `capforge run` first.");
        return Ok(());
    }

    let skip = runs.len().saturating_sub(limit);
    for (ts, run_id, target, succeeded, failed, secs) in runs.into_iter().skip(skip) {
        let status = if failed == 0 { "ok" } else { "FAILED" };
        println!(
            "{} {} {} [{}] {} step(s) ({:.2}s)",
            ts, run_id, target, status, succeeded, secs
        );
    }
    Ok(())
}
