//! Single-binary orchestrator for a local Cascata stack (§10.1): builds and runs the gateway and
//! the worker as child processes so an engineer can exercise the full platform without a process
//! manager. Postgres and Redis are assumed already reachable at the defaults `cascata-gateway`
//! and `cascata-jobs` fall back to when unset; this binary only owns the two Rust processes.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::{Child, Command};

#[derive(Parser, Debug)]
#[command(name = "cascata-lite")]
#[command(about = "Cascata local dev stack runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Subcommand, Debug)]
enum CommandKind {
    /// Build and run the gateway and worker in the foreground.
    Up,

    /// Run pending migrations against the control database (and, if `--tenant-url` is given, a
    /// single tenant database) without starting either service.
    Migrate {
        #[arg(long)]
        tenant_url: Option<String>,
    },

    /// Seed a demo project via `cascata-admin seed-project`.
    Seed {
        #[arg(long, default_value = "demo")]
        slug: String,
        #[arg(long, default_value = "Demo")]
        display_name: String,
        #[arg(long, default_value = "demo")]
        db_name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let repo = find_repo_root().context("find repo root (run from inside the workspace)")?;

    match cli.command {
        CommandKind::Up => cmd_up(&repo).await,
        CommandKind::Migrate { tenant_url } => cmd_migrate(&repo, tenant_url.as_deref()).await,
        CommandKind::Seed { slug, display_name, db_name } => {
            cmd_seed(&repo, &slug, &display_name, &db_name).await
        }
    }
}

async fn cmd_up(repo: &Path) -> anyhow::Result<()> {
    cargo_build(repo, &["cascata-gateway", "cascata-jobs"])
        .await
        .context("cargo build required packages")?;

    run_control_migrations(repo)
        .await
        .context("run control database migrations")?;

    let gateway_bin = bin_path(repo, "cascata-gateway");
    let worker_bin = bin_path(repo, "cascata-jobs");

    let mut gateway = spawn(&gateway_bin, &[]).context("start gateway")?;
    let mut worker = spawn(&worker_bin, &[]).context("start worker")?;

    eprintln!(
        "\ncascata-lite up: stack running\n\
\n\
Next:\n\
  cascata-lite seed --slug demo\n\
  curl localhost:8080/healthz\n\
\n\
Ctrl-C stops both processes.\n"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("cascata-lite up: ctrl-c received, stopping...");
        }
        status = gateway.wait() => {
            eprintln!("cascata-lite up: gateway exited: {status:?}");
        }
        status = worker.wait() => {
            eprintln!("cascata-lite up: worker exited: {status:?}");
        }
    }

    kill_and_wait("gateway", &mut gateway).await;
    kill_and_wait("worker", &mut worker).await;

    Ok(())
}

async fn cmd_migrate(repo: &Path, tenant_url: Option<&str>) -> anyhow::Result<()> {
    cargo_build(repo, &["cascata-admin"])
        .await
        .context("cargo build cascata-admin")?;

    run_control_migrations(repo).await?;

    if let Some(url) = tenant_url {
        let admin_bin = bin_path(repo, "cascata-admin");
        run_bin(
            &admin_bin,
            &["migrate", "--target", "tenant", "--database-url", url],
        )
        .await
        .context("migrate tenant database")?;
    }

    Ok(())
}

async fn cmd_seed(repo: &Path, slug: &str, display_name: &str, db_name: &str) -> anyhow::Result<()> {
    cargo_build(repo, &["cascata-admin"])
        .await
        .context("cargo build cascata-admin")?;

    let admin_bin = bin_path(repo, "cascata-admin");
    run_bin(
        &admin_bin,
        &[
            "seed-project",
            "--slug",
            slug,
            "--display-name",
            display_name,
            "--db-name",
            db_name,
        ],
    )
    .await
    .context("cascata-admin seed-project")
}

async fn run_control_migrations(repo: &Path) -> anyhow::Result<()> {
    cargo_build(repo, &["cascata-admin"])
        .await
        .context("cargo build cascata-admin")?;
    let admin_bin = bin_path(repo, "cascata-admin");

    // Retry because Postgres may still be starting up.
    let mut last_err: Option<anyhow::Error> = None;
    for _ in 0..20 {
        match run_bin(&admin_bin, &["migrate", "--target", "control"]).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("migrations failed")))
}

fn spawn(bin: &Path, args: &[&str]) -> anyhow::Result<Child> {
    Command::new(bin)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .spawn()
        .with_context(|| format!("spawn {}", bin.display()))
}

async fn kill_and_wait(name: &str, child: &mut Child) {
    if let Some(pid) = child.id() {
        eprintln!("cascata-lite up: stopping {name} (pid {pid})");
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

async fn cargo_build(repo: &Path, packages: &[&str]) -> anyhow::Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(repo).arg("build");
    for p in packages {
        cmd.arg("-p").arg(p);
    }
    run_cmd(&mut cmd).await.context("cargo build")?;
    Ok(())
}

async fn run_bin(bin: &Path, args: &[&str]) -> anyhow::Result<()> {
    let mut cmd = Command::new(bin);
    cmd.args(args);
    run_cmd(&mut cmd)
        .await
        .with_context(|| format!("run {}", bin.display()))
}

async fn run_cmd(cmd: &mut Command) -> anyhow::Result<()> {
    let status = cmd.status().await.context("spawn command")?;
    if !status.success() {
        anyhow::bail!("command failed: {status}");
    }
    Ok(())
}

fn bin_path(repo: &Path, name: &str) -> PathBuf {
    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| repo.join("target"));
    target_dir
        .join("debug")
        .join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}

fn find_repo_root() -> anyhow::Result<PathBuf> {
    let mut dir = std::env::current_dir().context("read cwd")?;
    for _ in 0..8 {
        if dir.join("crates").join("cascata-core").join("Cargo.toml").exists() {
            return Ok(dir);
        }
        let Some(parent) = dir.parent() else {
            break;
        };
        dir = parent.to_path_buf();
    }
    anyhow::bail!("could not locate workspace root (expected crates/cascata-core/Cargo.toml)")
}
