//! Deckhand CLI entrypoint.
//!
//! This is the main entrypoint for the deckhand command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use deckhand::apply::StdinApprover;
use deckhand::bundle::Pipeline;
use deckhand::cli::{ArtifactCommands, Cli, Commands, OutputFormatter, StateCommands};
use deckhand::config::{BundleLoader, EngineSettings, find_bundle_file, select_target};
use deckhand::context::DeployContext;
use deckhand::deployer::Deployer;
use deckhand::dyn_value::Value;
use deckhand::error::{ConfigError, Result};
use deckhand::planner::ResourceSet;
use deckhand::state::{ArtifactStateFile, StateStore, StateSync};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// A loaded bundle together with its invocation context.
struct Workspace {
    ctx: DeployContext,
    tree: Value,
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Artifact { command } => return cmd_artifact(command, &formatter).await,
        Commands::Validate => return cmd_validate(load_workspace(&cli, false)?, &formatter),
        _ => {}
    }

    let auto_approve = matches!(
        cli.command,
        Commands::Deploy { yes: true } | Commands::Destroy { yes: true }
    );
    let workspace = load_workspace(&cli, auto_approve)?;
    watch_interrupt(workspace.ctx.cancel_token());

    match cli.command {
        Commands::Plan => cmd_plan(workspace, &formatter).await,
        Commands::Deploy { .. } => cmd_deploy(workspace, false, &formatter).await,
        Commands::Destroy { .. } => cmd_deploy(workspace, true, &formatter).await,
        Commands::Bind { identity, id } => cmd_bind(workspace, &identity, Some(&id)).await,
        Commands::Unbind { identity } => cmd_bind(workspace, &identity, None).await,
        Commands::State { command } => cmd_state(&workspace.ctx, &command, &formatter).await,
        Commands::Validate | Commands::Artifact { .. } => Ok(()),
    }
}

/// Locates and loads the bundle, its settings and its target.
fn load_workspace(cli: &Cli, auto_approve: bool) -> Result<Workspace> {
    let bundle_file = resolve_bundle_path(cli.bundle.as_ref())?;
    let root = bundle_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut settings = EngineSettings::load(&root)?;
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    settings.auto_approve |= auto_approve;

    let tree = BundleLoader::new()
        .with_base_path(&root)
        .load_file(&bundle_file)?;
    let target = select_target(&tree, cli.target.as_deref())?;
    info!("Using target '{target}' of {}", bundle_file.display());

    let ctx = DeployContext::new(root, target, settings).with_variables(cli.variables());
    Ok(Workspace { ctx, tree })
}

/// Resolves the bundle file path.
fn resolve_bundle_path(bundle_path: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = bundle_path {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(ConfigError::FileNotFound { path: path.clone() }.into());
    }

    let current_dir = std::env::current_dir()?;
    find_bundle_file(current_dir)
}

/// Cancels in-flight work on Ctrl-C.
fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for in-flight operations to finish");
            cancel.cancel();
        }
    });
}

/// Validate the bundle.
fn cmd_validate(workspace: Workspace, formatter: &OutputFormatter) -> Result<()> {
    let Workspace { ctx, tree } = workspace;
    let output = Pipeline::standard().run(tree, &ctx);

    if !output.diagnostics.is_empty() {
        eprintln!("{}", formatter.format_diagnostics(&output.diagnostics));
    }
    let tree = output.into_tree()?;

    let resources = ResourceSet::from_tree(&tree, ctx.table())?;
    eprintln!("Bundle is valid!");
    eprintln!("\nBundle summary:");
    eprintln!("  Target: {}", ctx.target());
    eprintln!("  Backend: {}", ctx.settings().backend);
    eprintln!("  Resources: {}", resources.len());
    Ok(())
}

/// Show the deployment plan.
async fn cmd_plan(workspace: Workspace, formatter: &OutputFormatter) -> Result<()> {
    let Workspace { ctx, tree } = workspace;
    let backend = ctx.backend()?;
    let local = ctx.local_store();
    let remote = ctx.remote_state_store().await;

    let deployer = Deployer::new(&ctx, backend.as_ref(), &local).with_remote(remote.as_deref());
    let bundle = deployer.prepare(tree)?;
    if !bundle.diagnostics.is_empty() {
        eprintln!("{}", formatter.format_diagnostics(&bundle.diagnostics));
    }

    let plan = deployer.plan(&bundle).await?;
    eprintln!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// Deploy or destroy the bundle.
async fn cmd_deploy(workspace: Workspace, destroy: bool, formatter: &OutputFormatter) -> Result<()> {
    let Workspace { ctx, tree } = workspace;
    let backend = ctx.backend()?;
    let local = ctx.local_store();
    let remote = ctx.remote_state_store().await;
    let approver = StdinApprover::stdio();

    let deployer = Deployer::new(&ctx, backend.as_ref(), &local)
        .with_remote(remote.as_deref())
        .with_approver(&approver);
    let bundle = deployer.prepare(tree)?;
    if !bundle.diagnostics.is_empty() {
        eprintln!("{}", formatter.format_diagnostics(&bundle.diagnostics));
    }

    let outcome = if destroy {
        deployer.destroy(&bundle).await?
    } else {
        deployer.deploy(&bundle).await?
    };
    eprintln!("{}", formatter.format_outcome(&outcome));
    Ok(())
}

/// Bind a resource, or unbind it when no remote id is given.
async fn cmd_bind(workspace: Workspace, identity: &str, remote_id: Option<&str>) -> Result<()> {
    let Workspace { ctx, tree } = workspace;
    let backend = ctx.backend()?;
    let local = ctx.local_store();
    let remote = ctx.remote_state_store().await;

    let deployer = Deployer::new(&ctx, backend.as_ref(), &local).with_remote(remote.as_deref());
    let bundle = deployer.prepare(tree)?;

    match remote_id {
        Some(remote_id) => {
            let entry = deployer.bind(&bundle, identity, remote_id).await?;
            eprintln!("Bound {identity} to {}", entry.id);
        }
        None => {
            deployer.unbind(&bundle, identity).await?;
            eprintln!("Unbound {identity}; the remote object was left in place.");
        }
    }
    Ok(())
}

/// Manage recorded state.
async fn cmd_state(ctx: &DeployContext, command: &StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let local = ctx.local_store();

    if let StateCommands::Show = command {
        let snapshot = local.load().await?;
        eprintln!("{}", formatter.format_state(snapshot.as_ref()));
        return Ok(());
    }

    let remote = ctx.remote_state_store().await.ok_or_else(|| {
        ConfigError::validation("no remote state backend is configured", "state.backend")
    })?;
    let companions = ctx.companion_blobs();
    let sync = StateSync::new(&local, &*remote).with_companions(&companions);
    debug!("Syncing {} with {}", local.location(), remote.location());

    let output = match command {
        StateCommands::Pull => formatter.format_sync("pull", sync.pull().await?),
        StateCommands::Push | StateCommands::Show => formatter.format_sync("push", sync.push().await?),
    };
    eprintln!("{output}");
    Ok(())
}

/// Run the artifact validation gate.
async fn cmd_artifact(command: &ArtifactCommands, formatter: &OutputFormatter) -> Result<()> {
    let state = match command {
        ArtifactCommands::Validate { path } => ArtifactStateFile::for_artifact(path).validate().await?,
        ArtifactCommands::Deploy { path } => ArtifactStateFile::for_artifact(path).deploy().await?,
    };
    eprintln!("{}", formatter.format_artifact(&state));
    Ok(())
}
