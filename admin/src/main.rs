//! `cascata-admin`: the operator CLI. One verb per operational task an engineer runs by hand
//! against a deployment: apply migrations, seed or rotate a project's keys, manually enqueue a
//! job for smoke-testing, or run any one of the three service modes in-process.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cascata_core::jobs::{PushJob, PushNotification, WebhookJob, PUSH_QUEUE, WEBHOOK_QUEUE};
use cascata_core::project::{PoolSelector, Project, ProjectMetadata};
use cascata_core::redis_queue::RedisQueue;
use cascata_core::secrets::SecretCipher;
use cascata_core::Queue;
use config::AdminConfig;

#[derive(Parser, Debug)]
#[command(name = "cascata-admin")]
#[command(about = "Cascata operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MigrationTarget {
    /// The shared control database (`projects`, `push_delivery_history`).
    Control,
    /// A single tenant database: the realtime notify function plus the device/rule tables.
    Tenant,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ServiceMode {
    Api,
    ControlPlane,
    Worker,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run migrations against the control database or a single tenant database.
    Migrate {
        #[arg(long, value_enum)]
        target: MigrationTarget,
        /// Required (and only meaningful) for `--target tenant`; the control database URL is
        /// read from the environment like every other subcommand.
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Provision a new project record with freshly generated keys (mirrors
    /// `POST /control/projects`, for use before the control plane is reachable).
    SeedProject {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        db_name: String,
    },

    /// Rotate one of a project's three secrets in place.
    RotateKey {
        #[arg(long)]
        slug: String,
        #[arg(long, value_enum)]
        key: KeyKind,
    },

    /// Enqueue a webhook delivery job for smoke-testing a worker deployment.
    EnqueueWebhook {
        #[arg(long)]
        project_slug: String,
        #[arg(long)]
        target_url: String,
        #[arg(long, default_value = "standard")]
        retry_policy: String,
        #[arg(long)]
        fallback_url: Option<String>,
    },

    /// Enqueue a push delivery job for smoke-testing a worker deployment.
    EnqueuePush {
        #[arg(long)]
        project_slug: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
    },

    /// Run one of the three service modes in-process (useful for a single-process smoke test
    /// without a process manager).
    Serve {
        #[arg(long, value_enum)]
        mode: ServiceMode,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KeyKind {
    Anon,
    Service,
    Jwt,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AdminConfig::from_env().context("load admin config")?;

    match cli.command {
        Command::Migrate { target, database_url } => migrate(&config, target, database_url).await,
        Command::SeedProject { slug, display_name, db_name } => {
            seed_project(&config, &slug, &display_name, &db_name).await
        }
        Command::RotateKey { slug, key } => rotate_key(&config, &slug, key).await,
        Command::EnqueueWebhook { project_slug, target_url, retry_policy, fallback_url } => {
            enqueue_webhook(&config, &project_slug, &target_url, &retry_policy, fallback_url).await
        }
        Command::EnqueuePush { project_slug, user_id, title, body } => {
            enqueue_push(&config, &project_slug, &user_id, &title, &body).await
        }
        Command::Serve { mode } => serve(mode).await,
    }
}

async fn control_pool(config: &AdminConfig) -> anyhow::Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.control_database_url)
        .await
        .context("connect control database")
}

async fn migrate(
    config: &AdminConfig,
    target: MigrationTarget,
    database_url: Option<String>,
) -> anyhow::Result<()> {
    match target {
        MigrationTarget::Control => {
            let pool = control_pool(config).await?;
            sqlx::migrate!("./migrations/control")
                .run(&pool)
                .await
                .context("migrate control database")?;
            tracing::info!(event = "admin.migrate.control_done", "control database migrated");
        }
        MigrationTarget::Tenant => {
            let url = database_url.context("--database-url is required for --target tenant")?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await
                .context("connect tenant database")?;
            sqlx::migrate!("./migrations/tenant_template")
                .run(&pool)
                .await
                .context("migrate tenant database")?;
            tracing::info!(event = "admin.migrate.tenant_done", "tenant database migrated");
        }
    }
    Ok(())
}

fn random_key_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn sys_secret(config: &AdminConfig) -> anyhow::Result<String> {
    config
        .sys_secret
        .clone()
        .context("SYS_SECRET must be set for any subcommand that touches project secrets")
}

async fn seed_project(
    config: &AdminConfig,
    slug: &str,
    display_name: &str,
    db_name: &str,
) -> anyhow::Result<()> {
    let pool = control_pool(config).await?;
    let cipher = SecretCipher::from_base64(&sys_secret(config)?)?;

    let anon_key = random_key_hex();
    let service_key = random_key_hex();
    let jwt_secret = random_key_hex();
    let metadata = serde_json::to_value(ProjectMetadata::default())?;

    sqlx::query(
        "INSERT INTO projects (slug, display_name, db_name, status, blocklist, \
         anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata) \
         VALUES ($1, $2, $3, 'active', '{}', $4, $5, $6, $7)",
    )
    .bind(slug)
    .bind(display_name)
    .bind(db_name)
    .bind(cipher.encrypt(&anon_key)?)
    .bind(cipher.encrypt(&service_key)?)
    .bind(cipher.encrypt(&jwt_secret)?)
    .bind(metadata)
    .execute(&pool)
    .await
    .context("insert project")?;

    println!("seeded project slug={slug}");
    println!("  anon_key:    {anon_key}");
    println!("  service_key: {service_key}");
    println!("  jwt_secret:  {jwt_secret}");
    println!("(these plaintext values are shown once; the control database stores only the encrypted form)");
    Ok(())
}

async fn rotate_key(config: &AdminConfig, slug: &str, key: KeyKind) -> anyhow::Result<()> {
    let pool = control_pool(config).await?;
    let cipher = SecretCipher::from_base64(&sys_secret(config)?)?;

    let new_plaintext = random_key_hex();
    let ciphertext = cipher.encrypt(&new_plaintext)?;
    let column = match key {
        KeyKind::Anon => "anon_key_encrypted",
        KeyKind::Service => "service_key_encrypted",
        KeyKind::Jwt => "jwt_secret_encrypted",
    };

    let result = sqlx::query(&format!(
        "UPDATE projects SET {column} = $1, updated_at = now() WHERE slug = $2"
    ))
    .bind(&ciphertext)
    .bind(slug)
    .execute(&pool)
    .await
    .context("rotate key")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("no project with slug {slug}");
    }

    println!("rotated {key:?} for {slug}: {new_plaintext}");
    Ok(())
}

async fn redis_queue(config: &AdminConfig) -> anyhow::Result<RedisQueue> {
    let client = redis::Client::open(config.redis_url()).context("invalid redis url")?;
    let conn = client
        .get_connection_manager()
        .await
        .context("connect redis")?;
    Ok(RedisQueue::new(conn))
}

async fn enqueue_webhook(
    config: &AdminConfig,
    project_slug: &str,
    target_url: &str,
    retry_policy: &str,
    fallback_url: Option<String>,
) -> anyhow::Result<()> {
    let queue = redis_queue(config).await?;
    let job = WebhookJob {
        project_slug: project_slug.to_string(),
        target_url: target_url.to_string(),
        payload: serde_json::json!({ "event": "admin.smoke_test", "id": Uuid::new_v4() }),
        secret: random_key_hex(),
        event_type: "admin.smoke_test".to_string(),
        table_name: "admin_smoke_test".to_string(),
        fallback_url,
        retry_policy: retry_policy.to_string(),
    };
    let payload = serde_json::to_value(&job)?;
    let id = queue.publish(WEBHOOK_QUEUE, payload, chrono::Utc::now()).await?;
    println!("enqueued webhook job ack_token={id}");
    Ok(())
}

async fn enqueue_push(
    config: &AdminConfig,
    project_slug: &str,
    user_id: &str,
    title: &str,
    body: &str,
) -> anyhow::Result<()> {
    let pool = control_pool(config).await?;
    let project: Project = sqlx::query_as(
        "SELECT id, slug, display_name, db_name, custom_hostname, status, blocklist, \
         anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, \
         created_at, updated_at FROM projects WHERE slug = $1",
    )
    .bind(project_slug)
    .fetch_one(&pool)
    .await
    .context("load project")?;

    let queue = redis_queue(config).await?;
    let selector = PoolSelector::resolve(&project, false);
    let job = PushJob {
        project_slug: project_slug.to_string(),
        user_id: user_id.to_string(),
        notification: PushNotification {
            title: title.to_string(),
            body: body.to_string(),
            data: serde_json::json!({}),
        },
        db_selector: (&selector).into(),
    };
    let payload = serde_json::to_value(&job)?;
    let id = queue.publish(PUSH_QUEUE, payload, chrono::Utc::now()).await?;
    println!("enqueued push job ack_token={id}");
    Ok(())
}

async fn serve(mode: ServiceMode) -> anyhow::Result<()> {
    match mode {
        ServiceMode::Api | ServiceMode::ControlPlane => {
            let mode_str = if matches!(mode, ServiceMode::Api) { "API" } else { "CONTROL_PLANE" };
            std::env::set_var("SERVICE_MODE", mode_str);
            let gateway_config =
                cascata_gateway::config::GatewayConfig::from_env().context("load gateway config")?;
            let port = gateway_config.port;
            let state = cascata_gateway::build_state(gateway_config)
                .await
                .context("build gateway state")?;
            let app = cascata_gateway::router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .context("bind gateway listener")?;
            tracing::info!(event = "admin.serve.gateway", mode = mode_str, port, "serving gateway in-process");
            axum::serve(listener, app).await.context("serve gateway")?;
        }
        ServiceMode::Worker => {
            let worker_config =
                cascata_jobs::config::WorkerConfig::from_env().context("load worker config")?;
            let state = cascata_jobs::build_state(worker_config)
                .await
                .context("build worker state")?;
            tracing::info!(event = "admin.serve.worker", "serving worker in-process");
            cascata_jobs::run_worker(state).await;
        }
    }
    Ok(())
}
