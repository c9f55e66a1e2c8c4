use sqlx::Row;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::SqlitePool;
use uuid::Uuid;

use rolegate::authz::system_role_id;
use rolegate::db;
use rolegate::jwt::JwtConfig;
use rolegate::store::{RoleStore, TenantStore, UserStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "rolegate operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty reversible migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create a tenant and print its application key
    CreateTenant {
        name: String,
        /// Key expiry in days; the key never expires when omitted
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// Create a user holding the given roles
    CreateUser {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long = "role", required = true)]
        roles: Vec<String>,
    },
    /// Sign an access token for a role the user holds
    IssueToken {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let (up, down) = make_migration_files(&name)?;
            println!("Created migration: {}", up.display());
            println!("Created migration: {}", down.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            let current = latest_applied(&pool).await?.context("no migrations are applied")?;
            let target = migrator
                .iter()
                .map(|m| m.version)
                .filter(|v| *v < current)
                .max()
                .unwrap_or(0);
            migrator
                .undo(&pool, target)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back migration {}", current);
        }
        Commands::CreateTenant { name, expires_in_days } => {
            let pool = get_pool().await?;
            let expires_at = expires_in_days.map(|days| Utc::now() + chrono::Duration::days(days));
            let issued = TenantStore::new(pool).create(name.trim(), expires_at).await?;
            println!("tenant_id:       {}", issued.tenant.id);
            println!("application_key: {}", issued.application_key);
            println!("Store the key now; only its hash is kept.");
        }
        Commands::CreateUser { tenant, email, name, roles } => {
            let pool = get_pool().await?;
            let role_store = RoleStore::new(pool.clone());
            for role in &roles {
                resolve_role(&role_store, tenant, role).await?;
            }
            let user = UserStore::new(pool).create(tenant, name.trim(), &email, &roles).await?;
            println!("user_id: {}", user.id);
            println!("roles:   {}", user.roles.join(", "));
        }
        Commands::IssueToken { tenant, user, role } => {
            let pool = get_pool().await?;
            let user = UserStore::new(pool.clone())
                .get(tenant, user)
                .await
                .context("user not found in tenant")?;
            if !user.holds_role(&role) {
                anyhow::bail!("user {} does not hold role '{}'", user.id, role);
            }
            let role_id = resolve_role(&RoleStore::new(pool), tenant, &role).await?;
            let jwt = JwtConfig::from_env()?;
            println!("{}", jwt.encode(user.id, role_id, tenant)?);
        }
    }

    Ok(())
}

/// System role names map to their fixed ids; anything else must be a role
/// of the tenant.
async fn resolve_role(roles: &RoleStore, tenant: Uuid, name: &str) -> anyhow::Result<Uuid> {
    if let Some(id) = system_role_id(name) {
        return Ok(id);
    }
    let role = roles
        .find_by_name(tenant, name)
        .await?
        .with_context(|| format!("role '{}' does not exist in tenant {}", name, tenant))?;
    Ok(role.role_id)
}

fn make_migration_files(name: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let dir = Path::new("migrations");
    let up = dir.join(format!("{}_{}.up.sql", timestamp, sanitized));
    let down = dir.join(format!("{}_{}.down.sql", timestamp, sanitized));

    if up.exists() || down.exists() {
        anyhow::bail!("migration already exists: {}", up.display());
    }

    fs::write(&up, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", up.display()))?;
    fs::write(&down, "-- Revert the matching up migration here\n")
        .with_context(|| format!("failed to create migration at {}", down.display()))?;

    Ok((up, down))
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn migrations_table_exists(pool: &SqlitePool) -> anyhow::Result<bool> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn latest_applied(pool: &SqlitePool) -> anyhow::Result<Option<i64>> {
    if !migrations_table_exists(pool).await? {
        return Ok(None);
    }
    let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok(latest)
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let applied_versions: HashSet<i64> = if migrations_table_exists(pool).await? {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter().filter(|m| m.migration_type.is_up_migration()) {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
