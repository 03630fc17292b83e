use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use serde::Deserialize;

use restruct_core::{
    print_tree, structurize_method, BlockGraph, PassConfig, StructurizeConfig, TreeSummary,
    VALID_PASS_NAMES,
};

/// Rebuild structured statements from control-flow graphs.
#[derive(Parser)]
#[command(name = "restruct", version)]
struct Cli {
    /// JSON file holding one block graph, or `{"methods": [{"name", "graph"}]}`.
    input: PathBuf,

    /// Skip an optional pass (synchronized, label-normalize, exit-merge,
    /// redundant-returns). May be repeated.
    #[arg(long = "skip-pass")]
    skip_pass: Vec<String>,

    /// Node-split attempts allowed per container child.
    #[arg(long)]
    split_budget: Option<usize>,

    /// Emit a JSON summary instead of pseudo-source.
    #[arg(long)]
    json: bool,

    /// Dump each finished tree to stderr.
    #[arg(long)]
    dump_tree: bool,

    /// Stop after the named pass and dump the tree.
    #[arg(long)]
    dump_after: Option<String>,

    /// Only dump methods whose name contains this string.
    #[arg(long)]
    dump_method: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Input {
    Methods { methods: Vec<Method> },
    Single(BlockGraph),
}

#[derive(Deserialize)]
struct Method {
    name: String,
    graph: BlockGraph,
}

fn build_config(cli: &Cli) -> Result<StructurizeConfig> {
    if let Some(stage) = cli.dump_after.as_deref() {
        if !VALID_PASS_NAMES.contains(&stage) {
            bail!(
                "unknown pass {stage:?} for --dump-after (expected one of: {})",
                VALID_PASS_NAMES.join(", ")
            );
        }
    }
    let skip: Vec<&str> = cli.skip_pass.iter().map(String::as_str).collect();
    let mut config = StructurizeConfig {
        passes: PassConfig::from_skip_list(&skip),
        ..StructurizeConfig::default()
    };
    if let Some(budget) = cli.split_budget {
        config.split_budget = budget;
    }
    config.debug.dump_tree = cli.dump_tree;
    config.debug.dump_after = cli.dump_after.clone();
    config.debug.method_filter = cli.dump_method.clone();
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = build_config(&cli)?;
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let input: Input = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;
    let methods = match input {
        Input::Methods { methods } => methods,
        Input::Single(graph) => vec![Method {
            name: "main".into(),
            graph,
        }],
    };

    let mut summaries = Vec::new();
    let mut failures = 0usize;
    for method in &methods {
        let output = match structurize_method(&method.name, &method.graph, &config) {
            Ok(output) => output,
            Err(e) => {
                warn!("{}: {e}", method.name);
                failures += 1;
                continue;
            }
        };
        if cli.json {
            summaries.push((method.name.as_str(), TreeSummary::of(&output.tree)));
        } else if !output.stopped_early {
            println!("// {}", method.name);
            print!("{}", print_tree(&output.tree));
        }
    }

    if cli.json {
        let map: serde_json::Map<String, serde_json::Value> = summaries
            .into_iter()
            .map(|(name, summary)| Ok((name.to_string(), serde_json::to_value(summary)?)))
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    }

    info!(
        "structured {} of {} methods",
        methods.len() - failures,
        methods.len()
    );
    if failures == methods.len() && failures > 0 {
        bail!("no method could be structured");
    }
    Ok(())
}
