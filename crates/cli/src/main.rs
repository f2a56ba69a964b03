//! Command-line front end for TopCAT catalogs.

mod render;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use topcat_client::{
    Arg, CatalogClient, Direction, DownloadApi, HttpSignOut, LogoutInput, QueryCacheRegistry,
    QueryInput, SessionStore, SubmitCartRequest, WriteInput,
};
use topcat_core::config::AppConfig;
use topcat_core::{FacilityRegistry, Param, Query, Session};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "topcatctl")]
#[command(about = "Query and manage ICAT catalogs through TopCAT")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Config file path
    #[arg(long, global = true, env = "TOPCAT_CONFIG")]
    config: Option<String>,

    /// Facility to use (default: the only configured facility)
    #[arg(long, global = true, env = "TOPCAT_FACILITY")]
    facility: Option<String>,
}

#[derive(Args, Clone)]
struct PasswordArgs {
    /// Password (avoid if possible; prefer --password-stdin)
    #[arg(long)]
    password: Option<String>,

    /// Read password from stdin
    #[arg(long, default_value_t = false)]
    password_stdin: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to the facility and store the session locally
    Login {
        /// Authentication plugin (e.g. "db", "anon", "cas")
        plugin: String,
        /// Username for username/password plugins
        #[arg(long)]
        username: Option<String>,
        #[command(flatten)]
        password: PasswordArgs,
        /// CAS service URL
        #[arg(long, conflicts_with = "username")]
        service: Option<String>,
        /// CAS ticket
        #[arg(long, requires = "service")]
        ticket: Option<String>,
    },
    /// Log out of the facility
    Logout {
        /// Forget the local session but leave it valid on the server
        #[arg(long, default_value_t = false)]
        soft: bool,
    },
    /// Show the current session
    Whoami,
    /// Show the catalog server version
    Version,
    /// Extend the current session on the server
    Refresh,
    /// Run a JPQL query
    Query {
        /// Query text; `?` placeholders take --param values in order
        query: String,
        /// Bind parameter (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Abandon the request after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List entities of one type
    Entities {
        /// Entity type, e.g. "dataset" or "investigation"
        entity_type: String,
        /// Condition (repeatable, joined with `and`)
        #[arg(long = "where")]
        conditions: Vec<String>,
        /// Bind parameter for the conditions' placeholders (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Sort field, optionally followed by "desc" (repeatable)
        #[arg(long = "order")]
        order: Vec<String>,
        /// Related entity to load (repeatable)
        #[arg(long = "include")]
        includes: Vec<String>,
        /// Maximum number of rows
        #[arg(long)]
        limit: Option<u64>,
        /// Rows to skip (with --limit)
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Create or update entities from a JSON array ("-" reads stdin)
    Write {
        file: String,
    },
    /// Check a password against the current user
    VerifyPassword {
        #[command(flatten)]
        password: PasswordArgs,
    },
    /// List your downloads
    Downloads {
        /// Only smart-client downloads still being restored
        #[arg(long, default_value_t = false)]
        restoring: bool,
    },
    /// Download cart commands
    Cart {
        #[command(subcommand)]
        command: CartCommands,
    },
}

#[derive(Subcommand)]
enum CartCommands {
    /// Show the cart
    Show,
    /// Empty the cart
    Clear,
    /// Submit the cart for download
    Submit {
        /// Name of the prepared download
        #[arg(long)]
        file_name: String,
        /// Transport mechanism
        #[arg(long, default_value = "https")]
        transport: String,
        /// Address notified when the download is ready
        #[arg(long)]
        email: Option<String>,
        /// Zip the download
        #[arg(long, default_value_t = false)]
        zip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { global, command } = Cli::parse();
    let client = connect(&global).await?;

    match command {
        Commands::Login {
            plugin,
            username,
            password,
            service,
            ticket,
        } => handle_login_command(&client, &plugin, username, &password, service, ticket).await,
        Commands::Logout { soft } => handle_logout_command(&client, soft).await,
        Commands::Whoami => handle_whoami_command(&client),
        Commands::Version => {
            println!("{}", client.version().await?);
            Ok(())
        }
        Commands::Refresh => {
            client.refresh_session().await?;
            println!("Session refreshed");
            Ok(())
        }
        Commands::Query {
            query,
            params,
            timeout,
        } => handle_query_command(&client, query, &params, timeout).await,
        Commands::Entities {
            entity_type,
            conditions,
            params,
            order,
            includes,
            limit,
            offset,
        } => {
            handle_entities_command(
                &client,
                &entity_type,
                &conditions,
                &params,
                &order,
                &includes,
                limit.map(|count| (offset, count)),
            )
            .await
        }
        Commands::Write { file } => handle_write_command(&client, &file).await,
        Commands::VerifyPassword { password } => {
            let password = read_password(&password)?;
            if client.verify_password(&password).await {
                println!("Password verified");
                Ok(())
            } else {
                anyhow::bail!("password verification failed");
            }
        }
        Commands::Downloads { restoring } => handle_downloads_command(&client, restoring).await,
        Commands::Cart { command } => handle_cart_command(&client, command).await,
    }
}

async fn connect(global: &GlobalArgs) -> Result<CatalogClient> {
    let config_path = config_path(global.config.as_deref())?;
    let config = load_config(&config_path)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration {}: {e}", config_path.display()))?;

    let registry = FacilityRegistry::from_configs(config.facilities.clone())?;
    let facility = match &global.facility {
        Some(name) => registry.get(name)?,
        None => registry.sole().ok_or_else(|| {
            anyhow::anyhow!(
                "several facilities configured ({}); choose one with --facility",
                registry.names().collect::<Vec<_>>().join(", ")
            )
        })?,
    };

    let session_path = match &config.session.path {
        Some(path) => path.clone(),
        None => default_session_path()?,
    };
    let sessions = SessionStore::open(&session_path)
        .await
        .with_context(|| format!("failed to open session file {}", session_path.display()))?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("topcatctl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let mut client = CatalogClient::new(
        facility,
        http.clone(),
        Arc::new(sessions),
        Arc::new(QueryCacheRegistry::new()),
    )?
    .with_query_ttl(config.cache.query_ttl())
    .with_sign_out(Arc::new(HttpSignOut::new(http.clone())));
    if let Some(url) = &config.download_api.url {
        client = client.with_download_api(DownloadApi::new(http, url)?);
    }
    Ok(client)
}

async fn handle_login_command(
    client: &CatalogClient,
    plugin: &str,
    username: Option<String>,
    password: &PasswordArgs,
    service: Option<String>,
    ticket: Option<String>,
) -> Result<()> {
    let (primary, secondary) = match service {
        Some(service) => (Some(service), ticket),
        None if username.is_some() => (username, Some(read_password(password)?)),
        None => (None, None),
    };

    let outcome = client
        .login(plugin, primary.as_deref(), secondary.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {}", e.user_message()))?;

    println!(
        "Logged in to {} as {}",
        client.facility().name(),
        outcome.session.username
    );
    for diagnostic in &outcome.diagnostics {
        eprintln!("Warning: {diagnostic}");
    }
    Ok(())
}

async fn handle_logout_command(client: &CatalogClient, soft: bool) -> Result<()> {
    let input = if soft {
        LogoutInput::from_args(vec![Arg::Bool(true)])?
    } else {
        LogoutInput::from_args(Vec::new())?
    };
    let result = client.logout(input).await;
    println!("Logged out of {}", client.facility().name());
    result.context("server-side logout failed")
}

fn handle_whoami_command(client: &CatalogClient) -> Result<()> {
    let session = require_session(client)?;
    for line in render::render_session(client.facility().name(), &session) {
        println!("{line}");
    }
    Ok(())
}

async fn handle_query_command(
    client: &CatalogClient,
    text: String,
    params: &[String],
    timeout: Option<u64>,
) -> Result<()> {
    let mut args = Vec::new();
    if let Some(secs) = timeout {
        args.push(Arg::Cancel(cancel_after(Duration::from_secs(secs))));
    }
    if params.is_empty() {
        args.push(Arg::Text(text));
    } else {
        let query = params
            .iter()
            .fold(Query::text(text), |query, param| query.bind(parse_param(param)));
        args.push(Arg::Fragments(query));
    }

    let rows = client.query(QueryInput::from_args(args)?).await?;
    for line in render::render_rows(&rows) {
        println!("{line}");
    }
    Ok(())
}

async fn handle_entities_command(
    client: &CatalogClient,
    entity_type: &str,
    conditions: &[String],
    params: &[String],
    order: &[String],
    includes: &[String],
    limit: Option<(u64, u64)>,
) -> Result<()> {
    let mut builder = client.query_builder(entity_type);
    if !conditions.is_empty() {
        builder = builder.where_(
            &conditions.join(" and "),
            params.iter().map(|param| parse_param(param)),
        );
    }
    for field in order {
        let (field, direction) = parse_order(field);
        builder = builder.order_by(field, direction);
    }
    for relation in includes {
        builder = builder.include(relation);
    }
    if let Some((offset, count)) = limit {
        builder = builder.limit(offset, count);
    }

    let rows = builder.run().await?;
    for line in render::render_rows(&rows) {
        println!("{line}");
    }
    Ok(())
}

async fn handle_write_command(client: &CatalogClient, file: &str) -> Result<()> {
    let contents = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {file}"))?
    };
    let entities = match serde_json::from_str::<Value>(&contents).context("invalid entities JSON")? {
        Value::Array(entities) => entities,
        single @ Value::Object(_) => vec![single],
        _ => anyhow::bail!("entities must be a JSON object or array"),
    };

    let ids = client
        .write(WriteInput::from_args(vec![Arg::Entities(entities)])?)
        .await
        .map_err(|e| {
            if e.is_conflict() {
                anyhow::anyhow!("{}", e.user_message())
            } else {
                anyhow::anyhow!(e).context("write failed")
            }
        })?;
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

async fn handle_downloads_command(client: &CatalogClient, restoring: bool) -> Result<()> {
    let (api, session) = download_context(client)?;
    let downloads = if restoring {
        api.my_restoring_smartclient_downloads(client.facility(), &session)
            .await?
    } else {
        api.my_downloads(client.facility(), &session).await?
    };
    for download in downloads.iter().filter(|d| !d.is_deleted) {
        println!("{}", render::render_download(download));
    }
    Ok(())
}

async fn handle_cart_command(client: &CatalogClient, command: CartCommands) -> Result<()> {
    let (api, session) = download_context(client)?;
    let facility = client.facility();
    match command {
        CartCommands::Show => {
            let cart = api.get_cart(facility, &session).await?;
            println!("{}", serde_json::to_string_pretty(&cart)?);
        }
        CartCommands::Clear => {
            api.remove_cart(facility, &session).await?;
            println!("Cart cleared");
        }
        CartCommands::Submit {
            file_name,
            transport,
            email,
            zip,
        } => {
            let request = SubmitCartRequest {
                facility_name: facility.name().to_string(),
                session_id: session.session_id.clone(),
                icat_url: facility.icat_url().to_string(),
                file_name,
                transport,
                email,
                zip,
            };
            let response = api.submit_cart(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn download_context(client: &CatalogClient) -> Result<(&DownloadApi, Session)> {
    let api = client
        .download_api()
        .ok_or_else(|| anyhow::anyhow!("download_api.url is not configured"))?;
    Ok((api, require_session(client)?))
}

fn require_session(client: &CatalogClient) -> Result<Session> {
    client.session().ok_or_else(|| {
        anyhow::anyhow!(
            "not logged in to {}; run `topcatctl login` first",
            client.facility().name()
        )
    })
}

/// Interpret a command-line bind parameter.
fn parse_param(raw: &str) -> Param {
    match raw {
        "null" => Param::Null,
        "true" => Param::Bool(true),
        "false" => Param::Bool(false),
        _ => {
            if let Ok(int) = raw.parse::<i64>() {
                Param::Int(int)
            } else if let Ok(float) = raw.parse::<f64>() {
                Param::Float(float)
            } else {
                Param::Str(raw.to_string())
            }
        }
    }
}

fn parse_order(raw: &str) -> (&str, Direction) {
    match raw.trim().rsplit_once(char::is_whitespace) {
        Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => (field.trim(), Direction::Desc),
        Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => (field.trim(), Direction::Asc),
        _ => (raw.trim(), Direction::Asc),
    }
}

fn cancel_after(timeout: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        trigger.cancel();
    });
    token
}

fn read_password(args: &PasswordArgs) -> Result<String> {
    if let Some(password) = &args.password {
        return Ok(password.clone());
    }
    if args.password_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let password = buf.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            anyhow::bail!("password read from stdin is empty");
        }
        return Ok(password);
    }
    anyhow::bail!("password required: use --password or --password-stdin");
}

fn config_base_dir() -> Result<PathBuf> {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => Ok(PathBuf::from(path)),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set TOPCAT_CONFIG"))?;
            Ok(PathBuf::from(home).join(".config"))
        }
    }
}

fn config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }
    Ok(config_base_dir()?.join("topcat").join("config.toml"))
}

fn default_session_path() -> Result<PathBuf> {
    Ok(config_base_dir()?.join("topcat").join("sessions.json"))
}

/// Load configuration from `path` (optional) overlaid with `TOPCAT_` env vars.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    figment
        .merge(
            Env::prefixed("TOPCAT_")
                .ignore(&["CONFIG", "FACILITY"])
                .split("__"),
        )
        .extract()
        .context("failed to load configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::future::Future;
    use std::sync::OnceLock;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    async fn with_env_lock<F, Fut, T>(action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().await;
        action().await
    }

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe { std::env::set_var(key, value) };
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe {
                if let Some(value) = self.prev.take() {
                    std::env::set_var(self.key, value);
                } else {
                    std::env::remove_var(self.key);
                }
            }
        }
    }

    #[test]
    fn parse_param_infers_types() {
        assert_eq!(parse_param("42"), Param::Int(42));
        assert_eq!(parse_param("-1"), Param::Int(-1));
        assert_eq!(parse_param("2.5"), Param::Float(2.5));
        assert_eq!(parse_param("true"), Param::Bool(true));
        assert_eq!(parse_param("null"), Param::Null);
        assert_eq!(parse_param("EXP-1"), Param::Str("EXP-1".to_string()));
    }

    #[test]
    fn parse_order_reads_direction() {
        assert!(matches!(
            parse_order("dataset.name"),
            ("dataset.name", Direction::Asc)
        ));
        assert!(matches!(
            parse_order("dataset.id DESC"),
            ("dataset.id", Direction::Desc)
        ));
        assert!(matches!(
            parse_order(" dataset.id asc "),
            ("dataset.id", Direction::Asc)
        ));
    }

    #[test]
    fn read_password_prefers_flag() {
        let args = PasswordArgs {
            password: Some("secret".to_string()),
            password_stdin: false,
        };
        assert_eq!(read_password(&args).unwrap(), "secret");

        let none = PasswordArgs {
            password: None,
            password_stdin: false,
        };
        assert!(read_password(&none).is_err());
    }

    #[tokio::test]
    async fn config_path_uses_xdg() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let _guard = EnvVarGuard::set("XDG_CONFIG_HOME", temp.path().to_str().unwrap());
            assert_eq!(
                config_path(None).unwrap(),
                temp.path().join("topcat").join("config.toml")
            );
            assert_eq!(
                default_session_path().unwrap(),
                temp.path().join("topcat").join("sessions.json")
            );
            assert_eq!(
                config_path(Some("/tmp/explicit.toml")).unwrap(),
                PathBuf::from("/tmp/explicit.toml")
            );
        })
        .await;
    }

    #[tokio::test]
    async fn load_config_merges_file_and_env() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let path = temp.path().join("config.toml");
            std::fs::write(
                &path,
                r#"
                [[facilities]]
                name = "LILS"
                icatUrl = "https://icat.example.org"
                "#,
            )
            .unwrap();

            let _ttl = EnvVarGuard::set("TOPCAT_CACHE__QUERY_TTL_SECS", "60");
            let _facility = EnvVarGuard::set("TOPCAT_FACILITY", "LILS");
            let config = load_config(&path).unwrap();
            assert_eq!(config.facilities.len(), 1);
            assert_eq!(config.cache.query_ttl(), Duration::from_secs(60));
            assert!(config.validate().is_ok());
        })
        .await;
    }

    #[tokio::test]
    async fn load_config_without_file_has_no_facilities() {
        with_env_lock(|| async {
            let temp = tempdir().unwrap();
            let config = load_config(&temp.path().join("missing.toml")).unwrap();
            assert!(config.facilities.is_empty());
            assert!(config.validate().is_err());
        })
        .await;
    }
}
