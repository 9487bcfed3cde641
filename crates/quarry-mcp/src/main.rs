use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{ProjectAddParams, ProjectScopeParams, RebuildParams, SearchParams, config::AppConfig};
use mcp_server::{CoreContext, catch_up_project, handlers, serve_stdio};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "quarry-mcp")]
#[command(about = "Local code retrieval engine manager")]
struct Cli {
    /// Config file; environment overrides still apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a working tree as a project.
    Add {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Create the project without a vector index.
        #[arg(long)]
        no_vectors: bool,
    },
    /// Remove a project and purge its derived indexes.
    Remove { selector: String },
    List,
    Activate { selector: String },
    /// Bring a project's indexes up to date.
    Index {
        #[arg(default_value = "auto")]
        selector: String,
        /// Drop and re-create the indexes first.
        #[arg(long)]
        rebuild: bool,
    },
    /// Query a project from the shell.
    Search {
        query: String,
        #[arg(default_value = "auto")]
        selector: String,
        #[arg(short, long, default_value_t = 8)]
        k: usize,
    },
    Status,
    /// Serve the tool protocol on stdio.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if matches!(cli.command, Commands::Serve) {
        tracing_subscriber::fmt()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("quarry.toml"));
    let config = AppConfig::load(&config_path).context("failed loading configuration")?;
    let ctx = Arc::new(CoreContext::open(config)?);

    match cli.command {
        Commands::Add {
            path,
            name,
            no_vectors,
        } => add(&ctx, &path, name, no_vectors),
        Commands::Remove { selector } => remove(&ctx, &selector).await,
        Commands::List => list(&ctx),
        Commands::Activate { selector } => activate(&ctx, &selector),
        Commands::Index { selector, rebuild } => index(&ctx, &selector, rebuild).await,
        Commands::Search { query, selector, k } => search(&ctx, &selector, &query, k).await,
        Commands::Status => status(&ctx).await,
        Commands::Serve => serve_stdio(ctx).await,
    }
}

fn add(ctx: &CoreContext, path: &std::path::Path, name: Option<String>, no_vectors: bool) -> anyhow::Result<()> {
    let project = handlers::project::project_add(
        ctx,
        ProjectAddParams {
            path: path.to_string_lossy().to_string(),
            name,
            enable_vectors: !no_vectors,
        },
    )?;
    println!("added project {} ({}) at {}", project.name, project.id, project.root);
    Ok(())
}

async fn remove(ctx: &CoreContext, selector: &str) -> anyhow::Result<()> {
    let project = handlers::project::project_remove(
        ctx,
        ProjectScopeParams {
            project: selector.to_string(),
            working_dir: None,
        },
    )
    .await?;
    println!("removed project {} ({})", project.name, project.id);
    Ok(())
}

fn list(ctx: &CoreContext) -> anyhow::Result<()> {
    let listed = handlers::project::project_list(ctx)?;
    for (idx, project) in listed.projects.iter().enumerate() {
        println!(
            "{}. {} ({}) {}{}",
            idx + 1,
            project.name,
            project.id,
            project.root,
            if project.active { " [active]" } else { "" }
        );
    }
    Ok(())
}

fn activate(ctx: &CoreContext, selector: &str) -> anyhow::Result<()> {
    let project = handlers::project::project_activate(
        ctx,
        ProjectScopeParams {
            project: selector.to_string(),
            working_dir: None,
        },
    )?;
    println!("activated project {} ({})", project.name, project.id);
    Ok(())
}

async fn index(ctx: &CoreContext, selector: &str, rebuild: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let stats = if rebuild {
        handlers::index::index_rebuild(
            ctx,
            RebuildParams {
                project: selector.to_string(),
                drop_vectors: true,
                working_dir: None,
            },
            &cancel,
        )
        .await?
    } else {
        let (_, handles) = handlers::resolve_scope(ctx, selector, None)?;
        catch_up_project(ctx, &handles, &cancel).await?
    };
    println!(
        "indexed: added={} modified={} deleted={} errors={} in {}ms",
        stats.added,
        stats.modified,
        stats.deleted,
        stats.errors.len(),
        stats.duration_ms
    );
    for error in &stats.errors {
        eprintln!("  {error}");
    }
    Ok(())
}

async fn search(ctx: &CoreContext, selector: &str, query: &str, k: usize) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let result = handlers::search::rag_search(
        ctx,
        SearchParams {
            project: selector.to_string(),
            query: query.to_string(),
            k,
            use_vector: true,
            auto_index: true,
            working_dir: None,
            alpha: None,
            beta: None,
        },
        &cancel,
    )
    .await?;

    if !result.degraded_reasons.is_empty() {
        let reasons = result
            .degraded_reasons
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!("degraded: {reasons}");
    }
    for (idx, candidate) in result.candidates.iter().enumerate() {
        println!(
            "{}. {}:{}..{} (score {:.3})",
            idx + 1,
            candidate.path,
            candidate.start_line,
            candidate.end_line,
            candidate.fused_score
        );
    }
    Ok(())
}

async fn status(ctx: &CoreContext) -> anyhow::Result<()> {
    let mut projects = Vec::new();
    for project in handlers::project::project_list(ctx)?.projects {
        let status = handlers::index::index_status(
            ctx,
            ProjectScopeParams {
                project: project.id.clone(),
                working_dir: None,
            },
        )
        .await?;
        projects.push(serde_json::json!({
            "id": project.id,
            "name": project.name,
            "root": project.root,
            "active": project.active,
            "files_indexed": status.files_indexed,
            "chunks_indexed": status.chunks_indexed,
            "vectors_indexed": status.vectors_indexed,
            "needs_rebuild": status.needs_rebuild,
        }));
    }
    let (p50, p95) = ctx.search_latency_percentiles_ms();
    let output = serde_json::json!({
        "projects": projects,
        "telemetry": ctx.telemetry.snapshot(),
        "search_latency_ms": { "p50": p50, "p95": p95 },
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
