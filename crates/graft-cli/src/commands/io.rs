//! Import/Export commands

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::output::{to_json, OutputFormat};
use crate::AppContext;
use graft_core::{
    Node, NodeId, NodeRef, ObjectGraph, Operation, Properties, SaveReport, TraversalEngine,
};

#[derive(Args)]
pub struct ImportArgs {
    /// Input file (JSON format)
    pub file: PathBuf,

    /// Traversal depth from the root (default: configured default_depth)
    #[arg(long)]
    pub depth: Option<i32>,

    /// Print the planned operations without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Object graph described with file-local references
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportDocument {
    /// Reference of the node the save starts from (default: the first node)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub nodes: Vec<ImportNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportNode {
    #[serde(rename = "ref")]
    pub local_ref: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Relationship field -> local references, in field order
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ImportResult<'a> {
    report: &'a SaveReport,
    /// Stored id of every node that is now persisted
    ids: BTreeMap<&'a str, NodeId>,
}

impl ImportDocument {
    /// Build the object graph and return it with the root handle and the local reference table
    pub fn into_graph(self) -> anyhow::Result<(ObjectGraph, NodeRef, Vec<(String, NodeRef)>)> {
        let mut graph = ObjectGraph::new();
        let mut refs: HashMap<String, NodeRef> = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());

        for entry in &self.nodes {
            let mut node = Node::new(entry.label.clone());
            node.token = entry.token.clone().map(Into::into);
            node.properties = entry.properties.clone();
            let handle = graph.add(node);
            if refs.insert(entry.local_ref.clone(), handle).is_some() {
                anyhow::bail!("Duplicate node reference '{}'", entry.local_ref);
            }
            order.push((entry.local_ref.clone(), handle));
        }

        for entry in &self.nodes {
            let from = refs[&entry.local_ref];
            for (field, targets) in &entry.relations {
                let targets = targets
                    .iter()
                    .map(|r| {
                        refs.get(r).copied().ok_or_else(|| {
                            anyhow::anyhow!(
                                "{}.{} refers to unknown node '{}'",
                                entry.local_ref,
                                field,
                                r
                            )
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                graph.set_targets(from, field, targets)?;
            }
        }

        let root = match &self.root {
            Some(r) => *refs
                .get(r)
                .ok_or_else(|| anyhow::anyhow!("Root '{}' is not one of the nodes", r))?,
            None => order
                .first()
                .map(|(_, handle)| *handle)
                .ok_or_else(|| anyhow::anyhow!("Import document has no nodes"))?,
        };

        Ok((graph, root, order))
    }
}

pub async fn run_import(args: &ImportArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&args.file)?;
    let doc: ImportDocument = serde_json::from_str(&content)?;
    let (mut graph, root, refs) = doc.into_graph()?;

    let registry = ctx.registry()?;
    let depth = args.depth.unwrap_or(ctx.config.default_depth);

    if args.dry_run {
        let plan = TraversalEngine::new(&registry).plan_save(&graph, root, depth)?;
        match ctx.format {
            OutputFormat::Json => println!("{}", to_json(plan.batch())?),
            OutputFormat::Table => {
                let summary = plan.batch().summary();
                println!(
                    "Planned {} operations ({} upserts, {} relationship creates, {} relationship deletes)",
                    plan.batch().len(),
                    summary.node_upserts,
                    summary.relationship_creates,
                    summary.relationship_deletes
                );
                for op in plan.batch() {
                    println!("  {}", describe(op));
                }
            }
        }
        return Ok(());
    }

    let mut session = ctx.session(registry);
    session.begin().await?;
    let report = match session.save_depth(&mut graph, root, depth).await {
        Ok(report) => report,
        Err(e) => {
            session.rollback().await?;
            return Err(e.into());
        }
    };
    session.commit().await?;

    let ids: BTreeMap<&str, NodeId> = refs
        .iter()
        .filter_map(|(r, handle)| {
            graph
                .node(*handle)
                .and_then(Node::id)
                .map(|id| (r.as_str(), id))
        })
        .collect();

    match ctx.format {
        OutputFormat::Json => println!(
            "{}",
            to_json(&ImportResult {
                report: &report,
                ids,
            })?
        ),
        OutputFormat::Table => {
            println!(
                "Imported {} nodes ({} written, {} relationships created, {} deleted)",
                report.nodes_visited,
                report.nodes_written,
                report.relationships_created,
                report.relationships_deleted
            );
            if report.deferred_links > 0 {
                println!(
                    "  {} links beyond depth {} were not saved",
                    report.deferred_links, depth
                );
            }
            for (r, id) in &ids {
                println!("  {} -> {}", r, id);
            }
        }
    }
    Ok(())
}

fn describe(op: &Operation) -> String {
    match op {
        Operation::UpsertNode {
            temp, label, key, ..
        } => format!("upsert {} {} ({:?})", label, temp, key),
        Operation::CreateRelationship {
            key,
            position: Some(p),
        } => format!("create {} at {}", key, p),
        Operation::CreateRelationship { key, position: None } => format!("create {}", key),
        Operation::DeleteRelationship { key } => format!("delete {}", key),
        Operation::DeleteNode { id } => format!("delete node {}", id),
    }
}

pub async fn run_export(args: &ExportArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let mut session = ctx.read_session(Default::default());
    let snapshot = session.snapshot().await?;
    let content = to_json(&snapshot)?;

    if let Some(path) = &args.output {
        #[cfg(unix)]
        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?;
            file.write_all(content.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(path, &content)?;
        }
        println!(
            "Exported {} nodes and {} relationships to {:?}",
            snapshot.nodes.len(),
            snapshot.edges.len(),
            path
        );
    } else {
        println!("{}", content);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> ImportDocument {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_graph_from_document() {
        let (graph, root, refs) = doc(
            r#"{
                "root": "acme",
                "nodes": [
                    {"ref": "alice", "label": "Person", "properties": {"name": "Alice"},
                     "relations": {"employer": ["acme"]}},
                    {"ref": "acme", "label": "Organization", "token": "acme-inc"}
                ]
            }"#,
        )
        .into_graph()
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(refs.len(), 2);
        let (_, alice) = &refs[0];
        assert_eq!(graph.targets(*alice, "employer"), &[root]);
        assert_eq!(graph.node(root).unwrap().token.as_ref().unwrap().as_str(), "acme-inc");
    }

    #[test]
    fn test_root_defaults_to_first_node() {
        let (_, root, refs) = doc(r#"{"nodes": [{"ref": "a", "label": "A"}, {"ref": "b", "label": "B"}]}"#)
            .into_graph()
            .unwrap();
        assert_eq!(root, refs[0].1);
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let err = doc(r#"{"nodes": [{"ref": "a", "label": "A", "relations": {"friends": ["ghost"]}}]}"#)
            .into_graph()
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_reference_is_rejected() {
        assert!(doc(r#"{"nodes": [{"ref": "a", "label": "A"}, {"ref": "a", "label": "A"}]}"#)
            .into_graph()
            .is_err());
        assert!(doc(r#"{"nodes": []}"#).into_graph().is_err());
    }
}
