//! tapwire command-line driver
//!
//! Thin wrappers over the toolkit crates: an intercepting proxy with a
//! demonstration inspect hook, an authentication client for the database
//! variant, and a one-shot message sender for the message-relay variant.

mod config;
mod hs256;
mod inspect;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use tapwire_auth::{AuthMethod, Credentials, HandshakeSession};
use tapwire_protocol::variants::{dialog, msg, sql, standard_registry};
use tapwire_proxy::{ProxyConfig, ProxyServer};
use tapwire_transport::{ConnectConfig, Connection, RouteHint, TlsContext};

use config::CliConfig;
use hs256::Hs256Signer;
use inspect::InputFieldReporter;

#[derive(Parser, Debug)]
#[command(name = "tapwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Intercept screen-variant traffic between a client and a target
    Intercept {
        /// Local listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Target host:port
        #[arg(short, long)]
        target: String,
    },
    /// Authenticate against a database-variant server
    Login {
        /// Remote host:port
        #[arg(short, long)]
        addr: String,

        /// Authentication method
        #[arg(short, long, default_value = "SCRAMSHA256")]
        method: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// File holding a pre-signed token (JWT or SAML assertion)
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// File holding the HS256 secret to mint a token with
        #[arg(long)]
        signer_key_file: Option<PathBuf>,

        /// Issuer claim for minted tokens
        #[arg(long)]
        issuer: Option<String>,

        /// Claim name carrying the username in minted tokens
        #[arg(long, default_value = "user_name")]
        claim_name: String,

        #[arg(long)]
        session_cookie: Option<String>,

        /// Route string for traversal through an intermediate router
        #[arg(long)]
        route: Option<String>,

        /// First-hop router host:port for the route string
        #[arg(long)]
        router: Option<String>,

        /// Upgrade to TLS before speaking the protocol
        #[arg(long)]
        tls: bool,

        /// CA bundle (PEM) to trust for the TLS upgrade
        #[arg(long)]
        tls_ca: Option<PathBuf>,
    },
    /// Send one message through a message-relay server
    Message {
        /// Remote host:port
        #[arg(short, long)]
        addr: String,

        /// Client name to log in as
        #[arg(short, long, default_value = "tapwire-messager")]
        client: String,

        /// Target client name
        #[arg(short, long)]
        to: String,

        /// Message body
        #[arg(short, long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CliConfig::load(args.config.as_deref()).await?;

    match args.command {
        Commands::Intercept { listen, target } => {
            run_intercept(listen.unwrap_or_else(|| config.listen.clone()), target).await
        }
        Commands::Login {
            addr,
            method,
            username,
            password,
            token_file,
            signer_key_file,
            issuer,
            claim_name,
            session_cookie,
            route,
            router,
            tls,
            tls_ca,
        } => {
            run_login(LoginOptions {
                config: &config,
                addr,
                method,
                username,
                password,
                token_file,
                signer_key_file,
                issuer,
                claim_name,
                session_cookie,
                route,
                router,
                tls,
                tls_ca,
            })
            .await
        }
        Commands::Message {
            addr,
            client,
            to,
            message,
        } => run_message(&config, addr, client, to, message).await,
    }
}

async fn run_intercept(listen: String, target: String) -> Result<()> {
    let registry = Arc::new(standard_registry());
    let proxy_config = ProxyConfig::new(listen.clone(), target.clone(), dialog::DIALOG);
    let server = ProxyServer::new(proxy_config, registry, Arc::new(InputFieldReporter));

    info!(%listen, %target, "establishing intercepting proxy");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("canceled by the user");
            let _ = stop_tx.send(true);
        }
    });

    server.run(stop_rx).await?;
    Ok(())
}

struct LoginOptions<'a> {
    config: &'a CliConfig,
    addr: String,
    method: String,
    username: Option<String>,
    password: Option<String>,
    token_file: Option<PathBuf>,
    signer_key_file: Option<PathBuf>,
    issuer: Option<String>,
    claim_name: String,
    session_cookie: Option<String>,
    route: Option<String>,
    router: Option<String>,
    tls: bool,
    tls_ca: Option<PathBuf>,
}

async fn run_login(opts: LoginOptions<'_>) -> Result<()> {
    let token = match &opts.token_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading token file {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    let signer = match &opts.signer_key_file {
        Some(path) => {
            let secret = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading signer key {}", path.display()))?;
            Some(Arc::new(Hs256Signer::new(secret)) as Arc<dyn tapwire_auth::TokenSigner>)
        }
        None => None,
    };

    let claims = match (&opts.issuer, &opts.username) {
        (Some(issuer), Some(username)) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let mut claims = serde_json::Map::new();
            claims.insert(opts.claim_name.clone(), username.clone().into());
            claims.insert("iss".to_string(), issuer.clone().into());
            claims.insert("nbf".to_string(), now.saturating_sub(30).into());
            claims.insert("exp".to_string(), (now + 30).into());
            Some(serde_json::Value::Object(claims))
        }
        _ => None,
    };

    let method = AuthMethod::from_credentials(
        &opts.method,
        Credentials {
            username: opts.username,
            password: opts.password,
            token,
            claims,
            signer,
            cookie: opts.session_cookie,
        },
    )?;

    let mut connect = ConnectConfig::new(opts.addr.clone(), sql::SQL)
        .with_labels(
            opts.config.process_label.clone(),
            opts.config.hostname_label.clone(),
        )
        .with_read_timeout(Duration::from_secs(opts.config.read_timeout_secs));

    if let Some(path) = opts.route {
        let router = opts
            .router
            .context("a route string needs --router for the first hop")?;
        connect = connect.with_route(RouteHint { router, path });
    }

    if opts.tls {
        let ca = opts
            .tls_ca
            .context("--tls needs --tls-ca (certificate loading is not built in)")?;
        connect = connect.with_tls(load_tls_context(&ca, &opts.addr)?);
    }

    let registry = Arc::new(standard_registry());
    let mut session = HandshakeSession::new(method, registry);

    info!(addr = %opts.addr, method = %session.method.name(), "connecting");
    match session.authenticate(&connect).await {
        Ok(()) => {
            if let Some(caps) = &session.capabilities {
                info!(
                    product = %caps.product_version,
                    protocol = caps.protocol_version,
                    "authenticated against server"
                );
            }
            if let Some(cookie) = &session.session_cookie {
                info!(len = cookie.len(), "session cookie issued");
            }
            if let Some(mut conn) = session.take_connection() {
                conn.close().await.ok();
            }
            Ok(())
        }
        Err(e) => {
            let reason = session.failure.clone().unwrap_or_else(|| e.to_string());
            bail!("authentication failed: {reason}");
        }
    }
}

fn load_tls_context(ca_path: &PathBuf, addr: &str) -> Result<TlsContext> {
    let pem = std::fs::read(ca_path)
        .with_context(|| format!("reading CA bundle {}", ca_path.display()))?;

    let mut roots = rustls::RootCertStore::empty();
    let mut reader = pem.as_slice();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.context("parsing CA certificate")?)?;
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = addr.split(':').next().unwrap_or(addr);
    Ok(TlsContext::new(Arc::new(tls_config), server_name)?)
}

async fn run_message(
    config: &CliConfig,
    addr: String,
    client: String,
    to: String,
    message: String,
) -> Result<()> {
    let registry = Arc::new(standard_registry());
    let connect = ConnectConfig::new(addr.clone(), msg::MSG)
        .with_labels(config.process_label.clone(), config.hostname_label.clone())
        .with_read_timeout(Duration::from_secs(config.read_timeout_secs));

    let mut conn = Connection::connect(&connect).await?;
    info!(%addr, "connected to the message server");

    let login = msg::login(&client);
    let reply = conn.send_receive(&registry, &login, msg::MSG).await?;
    let server_name = reply.expect_str("fromname").unwrap_or_default().to_string();
    info!(server = %server_name, "login performed");

    let delivery = msg::deliver(&client, &to, message.as_bytes());
    conn.send(&registry, &delivery).await?;
    info!(target = %to, "message sent");

    conn.close().await?;
    Ok(())
}
