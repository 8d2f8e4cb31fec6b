//! Stats and purge commands

use clap::Args;

use crate::output::{render_table, to_json, OutputFormat};
use crate::AppContext;

#[derive(Args)]
pub struct PurgeArgs {
    /// Confirm removal of every node and relationship
    #[arg(long)]
    pub force: bool,
}

pub async fn run_stats(ctx: &AppContext) -> anyhow::Result<()> {
    let mut session = ctx.read_session(Default::default());
    let stats = session.snapshot().await?.stats();

    match ctx.format {
        OutputFormat::Json => println!("{}", to_json(&stats)?),
        OutputFormat::Table => {
            println!("Nodes: {}", stats.nodes);
            println!("Relationships: {}", stats.relationships);
            if !stats.labels.is_empty() {
                let rows: Vec<Vec<String>> = stats
                    .labels
                    .iter()
                    .map(|(label, count)| vec![label.clone(), count.to_string()])
                    .collect();
                println!();
                println!("{}", render_table(&["label", "nodes"], &rows));
            }
        }
    }
    Ok(())
}

pub async fn run_purge(args: &PurgeArgs, ctx: &AppContext) -> anyhow::Result<()> {
    if !args.force {
        anyhow::bail!("Purge removes every node and relationship. Use --force to confirm.");
    }

    let mut session = ctx.session(Default::default());
    let before = session.snapshot().await?.stats();
    session.purge_database().await?;
    println!(
        "Purged {} nodes and {} relationships",
        before.nodes, before.relationships
    );
    Ok(())
}
