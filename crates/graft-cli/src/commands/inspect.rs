//! Inspect command: load one node through a session and show what was mapped

use std::collections::BTreeMap;

use clap::Args;
use serde::Serialize;

use crate::output::{render_table, to_json, OutputFormat};
use crate::AppContext;
use graft_core::{LoadMap, NodeId, ObjectGraph, Properties, Token};

#[derive(Args)]
pub struct InspectArgs {
    /// Stored node id
    pub id: i64,

    /// Load depth (default: configured default_depth)
    #[arg(long)]
    pub depth: Option<i32>,
}

#[derive(Debug, Serialize)]
struct TargetView {
    id: Option<NodeId>,
    label: String,
}

#[derive(Debug, Serialize)]
struct InspectView {
    id: NodeId,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<Token>,
    properties: Properties,
    relations: BTreeMap<String, Vec<TargetView>>,
    load_map: LoadMap,
    /// Nodes brought into memory by the load
    loaded_nodes: usize,
}

pub async fn run(args: &InspectArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let registry = ctx.registry()?;
    let depth = args.depth.unwrap_or(ctx.config.default_depth);
    let id = NodeId(args.id);

    let mut graph = ObjectGraph::new();
    let mut session = ctx.read_session(registry.clone());
    let Some(handle) = session.load_depth(&mut graph, id, depth).await? else {
        anyhow::bail!("Node {} not found", id);
    };

    let node = graph.get(handle)?;
    let mut relations = BTreeMap::new();
    if let Some(entity) = registry.entity(&node.label) {
        for (field, _) in entity.relationships() {
            let targets = graph
                .targets(handle, field)
                .iter()
                .filter_map(|t| graph.node(*t))
                .map(|t| TargetView {
                    id: t.id(),
                    label: t.label.clone(),
                })
                .collect();
            relations.insert(field.to_string(), targets);
        }
    }

    let view = InspectView {
        id,
        label: node.label.clone(),
        token: node.token.clone(),
        properties: node.properties.clone(),
        relations,
        load_map: graph.load_map(handle),
        loaded_nodes: graph.len(),
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", to_json(&view)?),
        OutputFormat::Table => print_view(&view),
    }
    Ok(())
}

fn print_view(view: &InspectView) {
    println!("Node {} ({})", view.id, view.label);
    if let Some(token) = &view.token {
        println!("  Token: {}", token);
    }
    if !view.properties.is_empty() {
        println!("  Properties:");
        for (name, value) in &view.properties {
            println!("    {} = {}", name, value);
        }
    }

    let rows: Vec<Vec<String>> = view
        .relations
        .iter()
        .map(|(field, targets)| {
            let shown = targets
                .iter()
                .map(|t| match t.id {
                    Some(id) => format!("{} {}", t.label, id),
                    None => t.label.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            let loaded = view
                .load_map
                .get(field)
                .map(|c| format!("{} ({})", c.ids.len(), c.cardinality))
                .unwrap_or_else(|| "-".to_string());
            vec![field.clone(), shown, loaded]
        })
        .collect();

    if !rows.is_empty() {
        println!();
        for line in render_table(&["field", "targets", "load map"], &rows).lines() {
            println!("  {}", line);
        }
    }
    println!();
    println!("Loaded {} nodes", view.loaded_nodes);
}
