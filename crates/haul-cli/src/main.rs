mod adapters;

use adapters::{ShellCompute, ShellIdentity, ShellImage, ShellStorage};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haul_cloud::Cloud;
use haul_core::{Backend, BootSource, CloudConfig, HaulConfig, MigrationInfo};
use haul_orchestrator::{sync_identity, BatchPolicy, InstanceTransport};
use haul_remote::{RemoteSession, SshRunner};
use haul_transport::TransporterTable;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "haul")]
#[command(about = "Migrate compute instances between two cloud installations", long_about = None)]
struct Cli {
    /// Migration configuration (YAML).
    #[arg(long, global = true, default_value = "haul.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify each instance and print the route it would take.
    Plan {
        /// Migration record exported from the source control plane (JSON).
        #[arg(long)]
        info: PathBuf,
    },
    /// Migrate instances to the destination cloud.
    Migrate {
        #[arg(long)]
        info: PathBuf,
        /// Migrate only these instance ids (defaults to all).
        #[arg(long)]
        instance: Vec<String>,
        /// Log every remote command without executing anything.
        #[arg(long)]
        dry_run: bool,
        /// Continue with the next instance after a failure.
        #[arg(long)]
        keep_going: bool,
    },
    /// Replay source tenants, roles, and users onto the destination.
    SyncIdentity,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = HaulConfig::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config {:?}", cli.config))?;
    info!(
        run = %config.migrate.run_id,
        src = %config.src.host,
        dst = %config.dst.host,
        "configuration loaded"
    );

    match cli.command {
        Commands::Plan { info } => {
            let info = load_info(&info)?;
            plan(&config, &info)
        }
        Commands::Migrate {
            info,
            instance,
            dry_run,
            keep_going,
        } => {
            if dry_run {
                config.migrate.dry_run = true;
            }
            let mut info = load_info(&info)?;
            migrate(&config, &mut info, instance, keep_going)
        }
        Commands::SyncIdentity => run_identity_sync(&config),
    }
}

fn load_info(path: &PathBuf) -> Result<MigrationInfo> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing migration record {path:?}"))
}

fn build_cloud(config: &HaulConfig, cloud_config: &CloudConfig) -> Cloud {
    let runner = Arc::new(SshRunner::new(
        config.migrate.ssh_user.clone(),
        config.migrate.key_file.clone(),
    ));
    let session = RemoteSession::new(&cloud_config.host, runner, config.migrate.dry_run);
    Cloud::new(
        cloud_config.clone(),
        Arc::new(ShellCompute::new(session.clone(), cloud_config.clone())),
        Arc::new(ShellStorage::new(session.clone(), cloud_config.clone())),
        Arc::new(ShellImage::new(session.clone(), cloud_config.clone())),
        session,
    )
}

fn describe_route(boot: &BootSource, src: Backend, dst: Backend) -> &'static str {
    match boot {
        BootSource::Volume(_) => "volume boot: unsupported (no disk transport path)",
        BootSource::Image(_) => match (src, dst) {
            (Backend::Replicated, _) => "export boot disk, upload as image, deploy",
            (Backend::File, Backend::Replicated) => {
                "diff-and-merge: rebase diff onto base image, upload merged disk, deploy"
            }
            (Backend::File, Backend::File) => "deploy first, then stream-copy the diff",
        },
    }
}

fn plan(config: &HaulConfig, info: &MigrationInfo) -> Result<()> {
    let table = TransporterTable::standard();
    let src_backend = config.src.compute_backend;
    let dst_backend = config.dst.storage_backend;
    let transporter = table
        .resolve(src_backend, dst_backend)
        .context("resolving transporter for the configured backend pair")?;

    println!("routing {src_backend} -> {dst_backend} via {}", transporter.label());
    for (id, entry) in &info.compute.instances {
        match entry.boot_source() {
            Ok(boot) => {
                let route = describe_route(&boot, src_backend, dst_backend);
                let ephemeral = if entry.body.is_ephemeral {
                    " + ephemeral copy"
                } else {
                    ""
                };
                println!("- {id}: {route}{ephemeral}");
            }
            Err(err) => println!("- {id}: INVALID RECORD ({err})"),
        }
    }
    Ok(())
}

fn migrate(
    config: &HaulConfig,
    info: &mut MigrationInfo,
    selected: Vec<String>,
    keep_going: bool,
) -> Result<()> {
    let src = build_cloud(config, &config.src);
    let dst = build_cloud(config, &config.dst);
    let table = TransporterTable::standard();
    let orchestrator = InstanceTransport::new(&config.migrate, &src, &dst, &table);

    let ids: Vec<String> = if selected.is_empty() {
        info.compute.instances.keys().cloned().collect()
    } else {
        selected
    };
    let policy = if keep_going {
        BatchPolicy::ContinueOnError
    } else {
        BatchPolicy::AbortOnError
    };

    let report = orchestrator
        .migrate_batch(info, &ids, policy)
        .context("migration batch failed")?;

    for migrated in &report.migrated {
        println!(
            "migrated {} -> {}",
            migrated.instance_id,
            migrated.new_id.as_deref().unwrap_or("?")
        );
    }
    for (id, err) in &report.failed {
        println!("FAILED {id}: {err}");
    }
    println!(
        "batch finished in {}s: {} migrated, {} failed",
        (report.finished_at - report.started_at).num_seconds(),
        report.migrated.len(),
        report.failed.len()
    );
    if report.failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} instance(s) failed to migrate", report.failed.len())
    }
}

fn run_identity_sync(config: &HaulConfig) -> Result<()> {
    let runner = Arc::new(SshRunner::new(
        config.migrate.ssh_user.clone(),
        config.migrate.key_file.clone(),
    ));
    let src_session = RemoteSession::new(&config.src.host, runner.clone(), config.migrate.dry_run);
    let dst_session = RemoteSession::new(&config.dst.host, runner, config.migrate.dry_run);
    let src = ShellIdentity::new(src_session, config.src.clone());
    let dst = ShellIdentity::new(dst_session, config.dst.clone());

    let report = sync_identity(&src, &dst).context("identity sync failed")?;
    println!(
        "identity sync: {} tenants, {} roles, {} users created, {} assignments applied, {} already present",
        report.tenants_created,
        report.roles_created,
        report.users_created,
        report.assignments_applied,
        report.skipped_existing
    );
    Ok(())
}
