//! FastAuth CLI
//!
//! Runs the signature relay and exercises its building blocks from the
//! command line.

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fastauth_core::identity::build_identity_provider;
use fastauth_core::token::{IssuerRegistry, KeySet};
use fastauth_core::{
    FastAuthConfig, FastAuthProvider, PayloadKind, ProviderConfig, SigningGateway, TokenValidator,
    ValidToken, config::parse_token_algorithm, key_type,
};
use fastauth_relay::{FastAuthRelayService, HttpMpcNetwork, RelayServerConfig, WebhookConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fastauth")]
#[command(about = "OIDC-authenticated MPC signature relay", version)]
struct Cli {
    /// Log level or filter directive (e.g. `debug`, `fastauth_core=trace`)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay service
    Serve {
        #[command(flatten)]
        issuer: IssuerArgs,

        /// MPC signing network endpoint
        #[arg(long, env = "MPC_URL")]
        mpc_url: String,

        /// Address to listen on
        #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Public URL of this relay
        #[arg(long, env = "BASE_URL")]
        base_url: Option<String>,

        /// Seconds a signature request may stay pending
        #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
        request_timeout_secs: u64,

        /// Shared secret the MPC network signs callbacks with
        #[arg(long, env = "MPC_CALLBACK_SECRET")]
        mpc_callback_secret: Option<String>,

        /// Accept unsigned MPC callbacks when no callback secret is set
        #[arg(long, env = "INSECURE_MPC_CALLBACK", conflicts_with = "mpc_callback_secret")]
        insecure_mpc_callback: bool,

        /// Operator token enabling the webhook management routes
        #[arg(long, env = "ADMIN_TOKEN")]
        admin_token: Option<String>,

        /// Webhook notified of settled requests
        #[arg(long, env = "WEBHOOK_URL")]
        webhook_url: Option<String>,

        /// HMAC secret for webhook deliveries
        #[arg(long, env = "WEBHOOK_SECRET", requires = "webhook_url")]
        webhook_secret: Option<String>,
    },

    /// Map a signing algorithm identifier to its MPC key type
    ResolveKeyType {
        algorithm: String,
    },

    /// Validate an identity token and print its account path
    ValidateToken {
        #[command(flatten)]
        issuer: IssuerArgs,

        /// Token to validate
        #[arg(long)]
        token: String,

        /// Verify against an HMAC secret instead of the issuer's published keys
        #[arg(long, env = "TOKEN_HMAC_SECRET")]
        hmac_secret: Option<String>,
    },

    /// Print the issuer's discovery document and signing key ids
    Discover {
        /// Issuer URL
        #[arg(long, env = "ISSUER_URL")]
        issuer: String,
    },

    /// Log in through an identity provider and request one signature
    ///
    /// The MPC network must answer inline; callbacks need a running relay.
    Sign {
        #[command(flatten)]
        issuer: IssuerArgs,

        #[command(flatten)]
        provider: ProviderArgs,

        /// MPC signing network endpoint
        #[arg(long, env = "MPC_URL")]
        mpc_url: String,

        /// Base64 payload to sign
        #[arg(long)]
        payload: String,

        /// Signing algorithm (secp256k1, ecdsa, ed25519, eddsa)
        #[arg(long, default_value = "secp256k1")]
        algorithm: String,

        /// Sign a delegate action rather than a transaction
        #[arg(long)]
        delegate_action: bool,

        /// Seconds to wait for the MPC network
        #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
        request_timeout_secs: u64,
    },
}

#[derive(Args)]
struct IssuerArgs {
    /// Trusted token issuer
    #[arg(long, env = "ISSUER_URL")]
    issuer: String,

    /// Expected token audience
    #[arg(long, env = "AUDIENCE")]
    audience: String,

    /// Accepted token signing algorithm
    #[arg(long, env = "TOKEN_ALGORITHM", default_value = "RS256")]
    token_algorithm: String,

    /// Seconds between forced JWKS refreshes
    #[arg(long, env = "JWKS_REFRESH_COOLDOWN_SECS", default_value_t = 60)]
    jwks_refresh_cooldown_secs: u64,
}

impl IssuerArgs {
    fn config(&self) -> Result<FastAuthConfig> {
        let algorithm = parse_token_algorithm(&self.token_algorithm)?;
        Ok(FastAuthConfig::new(&self.issuer, &self.audience)
            .with_token_algorithm(algorithm)
            .with_jwks_refresh_cooldown(Duration::from_secs(self.jwks_refresh_cooldown_secs)))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Static,
    Auth0,
    Firebase,
    Google,
}

#[derive(Args)]
struct ProviderArgs {
    /// Identity provider to log in with
    #[arg(long, env = "IDENTITY_PROVIDER", value_enum, default_value = "static")]
    provider: ProviderKind,

    /// Identity token for the static provider
    #[arg(long, env = "ID_TOKEN")]
    id_token: Option<String>,

    #[arg(long, env = "AUTH0_DOMAIN")]
    auth0_domain: Option<String>,
    #[arg(long, env = "AUTH0_CLIENT_ID")]
    auth0_client_id: Option<String>,
    #[arg(long, env = "AUTH0_CLIENT_SECRET")]
    auth0_client_secret: Option<String>,

    #[arg(long, env = "FIREBASE_API_KEY")]
    firebase_api_key: Option<String>,
    #[arg(long, env = "FIREBASE_PROJECT_ID")]
    firebase_project_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    google_client_secret: Option<String>,
    #[arg(long, env = "GOOGLE_REDIRECT_URI")]
    google_redirect_uri: Option<String>,
    /// One-time authorization code, used when no refresh token is given
    #[arg(long, env = "GOOGLE_AUTHORIZATION_CODE")]
    google_authorization_code: Option<String>,

    /// Refresh token for the auth0, firebase and google providers
    #[arg(long, env = "REFRESH_TOKEN")]
    refresh_token: Option<String>,
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => bail!("--{} is required for this provider", name),
    }
}

impl ProviderArgs {
    fn config(&self) -> Result<ProviderConfig> {
        Ok(match self.provider {
            ProviderKind::Static => ProviderConfig::Static {
                token: required(&self.id_token, "id-token")?,
            },
            ProviderKind::Auth0 => ProviderConfig::Auth0 {
                domain: required(&self.auth0_domain, "auth0-domain")?,
                client_id: required(&self.auth0_client_id, "auth0-client-id")?,
                client_secret: self.auth0_client_secret.clone(),
                refresh_token: required(&self.refresh_token, "refresh-token")?,
            },
            ProviderKind::Firebase => ProviderConfig::Firebase {
                api_key: required(&self.firebase_api_key, "firebase-api-key")?,
                project_id: required(&self.firebase_project_id, "firebase-project-id")?,
                refresh_token: required(&self.refresh_token, "refresh-token")?,
            },
            ProviderKind::Google => {
                if self.refresh_token.is_none() && self.google_authorization_code.is_none() {
                    bail!("google provider needs --refresh-token or --google-authorization-code");
                }
                ProviderConfig::Google {
                    client_id: required(&self.google_client_id, "google-client-id")?,
                    client_secret: required(&self.google_client_secret, "google-client-secret")?,
                    redirect_uri: required(&self.google_redirect_uri, "google-redirect-uri")?,
                    refresh_token: self.refresh_token.clone(),
                    authorization_code: self.google_authorization_code.clone(),
                }
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .pretty()
        .init();

    match cli.command {
        Commands::Serve {
            issuer,
            mpc_url,
            listen,
            base_url,
            request_timeout_secs,
            mpc_callback_secret,
            insecure_mpc_callback,
            admin_token,
            webhook_url,
            webhook_secret,
        } => {
            let config = issuer
                .config()?
                .with_mpc_url(&mpc_url)
                .with_request_timeout(Duration::from_secs(request_timeout_secs));
            let server_config = relay_server_config(
                base_url.unwrap_or_else(|| format!("http://{}", listen)),
                mpc_callback_secret,
                insecure_mpc_callback,
                admin_token,
            );
            let webhook = webhook_url.map(|url| match webhook_secret {
                Some(secret) => WebhookConfig::new(url).with_secret(secret),
                None => WebhookConfig::new(url),
            });
            serve(config, server_config, webhook, listen).await?;
        }
        Commands::ResolveKeyType { algorithm } => {
            let key_type = key_type::resolve(&algorithm)?;
            println!("{}", key_type);
        }
        Commands::ValidateToken {
            issuer,
            token,
            hmac_secret,
        } => {
            validate_token(issuer.config()?, &token, hmac_secret.as_deref()).await?;
        }
        Commands::Discover { issuer } => {
            discover(&issuer).await?;
        }
        Commands::Sign {
            issuer,
            provider,
            mpc_url,
            payload,
            algorithm,
            delegate_action,
            request_timeout_secs,
        } => {
            let config = issuer
                .config()?
                .with_mpc_url(&mpc_url)
                .with_request_timeout(Duration::from_secs(request_timeout_secs))
                .with_provider(provider.config()?);
            let payload = STANDARD
                .decode(payload.trim())
                .context("payload is not valid base64")?;
            let kind = if delegate_action {
                PayloadKind::DelegateAction
            } else {
                PayloadKind::Transaction
            };
            sign(config, payload, &algorithm, kind).await?;
        }
    }

    Ok(())
}

/// Registry holding the configured issuer's published keys
async fn discovered_registry(config: &FastAuthConfig) -> Result<Arc<IssuerRegistry>> {
    let registry = IssuerRegistry::new().with_refresh_cooldown(config.jwks_refresh_cooldown);
    let document = registry
        .discover(&config.issuer)
        .await
        .with_context(|| format!("OIDC discovery failed for {}", config.issuer))?;
    info!(issuer = %document.issuer, jwks_uri = %document.jwks_uri, "Issuer discovered");
    Ok(Arc::new(registry))
}

/// Gateway whose MPC network delivers inline responses back to its coordinator
fn gateway(config: &FastAuthConfig, registry: Arc<IssuerRegistry>) -> Result<SigningGateway> {
    let mpc_url = config
        .mpc_url
        .as_deref()
        .context("MPC url is required")?;
    let network = HttpMpcNetwork::new(mpc_url);
    let gateway = SigningGateway::from_config(config, registry, Arc::new(network.clone()));
    network.connect(gateway.coordinator().response_sink());
    Ok(gateway)
}

fn relay_server_config(
    base_url: String,
    mpc_callback_secret: Option<String>,
    insecure_mpc_callback: bool,
    admin_token: Option<String>,
) -> RelayServerConfig {
    let mut config = RelayServerConfig::default().with_base_url(base_url);
    match mpc_callback_secret {
        Some(secret) => config = config.with_mpc_callback_secret(secret),
        None if insecure_mpc_callback => config = config.with_insecure_mpc_callback(),
        None => {}
    }
    if let Some(token) = admin_token.filter(|t| !t.is_empty()) {
        config = config.with_admin_token(token);
    }
    config
}

async fn serve(
    config: FastAuthConfig,
    server_config: RelayServerConfig,
    webhook: Option<WebhookConfig>,
    listen: SocketAddr,
) -> Result<()> {
    config.validate()?;
    let registry = discovered_registry(&config).await?;
    let gateway = gateway(&config, registry)?;

    let service = FastAuthRelayService::new(gateway, server_config);
    if let Some(webhook) = webhook {
        info!(url = %webhook.url, "Registering webhook");
        service.add_webhook(webhook).await;
    }

    info!(
        issuer = %config.issuer,
        audience = %config.audience,
        mpc_url = config.mpc_url.as_deref().unwrap_or_default(),
        "Starting FastAuth relay"
    );
    service.serve(listen).await
}

/// Validate `token` against a shared secret or the issuer's published keys
///
/// A shared secret always verifies as HS256, whatever `TOKEN_ALGORITHM` says.
async fn check_token(
    config: FastAuthConfig,
    token: &str,
    hmac_secret: Option<&str>,
) -> Result<ValidToken> {
    config.validate()?;
    let (registry, algorithms) = match hmac_secret {
        Some(secret) => {
            let registry = IssuerRegistry::new();
            registry.register_static(&config.issuer, KeySet::from_secret(None, secret.as_bytes()));
            (Arc::new(registry), vec![parse_token_algorithm("HS256")?])
        }
        None => (
            discovered_registry(&config).await?,
            config.token_algorithms.clone(),
        ),
    };

    let validator = TokenValidator::new(registry)
        .with_allowed_algorithms(algorithms)
        .with_clock_skew(config.clock_skew_secs);
    Ok(validator
        .validate(token, &config.issuer, &config.audience)
        .await?)
}

async fn validate_token(
    config: FastAuthConfig,
    token: &str,
    hmac_secret: Option<&str>,
) -> Result<()> {
    let valid = check_token(config, token, hmac_secret).await?;

    let report = serde_json::json!({
        "accountPath": valid.account_path(),
        "issuer": valid.issuer(),
        "subject": valid.subject(),
        "algorithm": format!("{:?}", valid.algorithm()),
        "expiresAt": valid.expires_at(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn discover(issuer: &str) -> Result<()> {
    let registry = IssuerRegistry::new();
    let document = registry
        .discover(issuer)
        .await
        .with_context(|| format!("OIDC discovery failed for {}", issuer))?;

    let key_ids: Vec<String> = registry
        .get(issuer)
        .map(|trusted| {
            trusted
                .keys()
                .key_ids()
                .into_iter()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let report = serde_json::json!({
        "configuration": serde_json::to_value(&document)?,
        "keyIds": key_ids,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn sign(
    config: FastAuthConfig,
    payload: Vec<u8>,
    algorithm: &str,
    kind: PayloadKind,
) -> Result<()> {
    config.validate()?;
    let Some(provider_config) = config.provider.as_ref() else {
        bail!("an identity provider is required");
    };

    let registry = discovered_registry(&config).await?;
    let provider = FastAuthProvider::new(
        build_identity_provider(provider_config),
        gateway(&config, registry)?,
    );

    let account_path = provider.login().await?;
    info!(account_path = %account_path, "Logged in");

    let handle = match kind {
        PayloadKind::Transaction => {
            provider
                .request_transaction_signature(payload, algorithm)
                .await?
        }
        PayloadKind::DelegateAction => {
            provider
                .request_delegate_action_signature(payload, algorithm)
                .await?
        }
    };
    let request_id = handle.id().to_string();
    info!(request_id = %request_id, "Waiting for MPC signature");

    let result = handle.wait().await;
    provider.logout();
    let signature = result?;

    let report = serde_json::json!({
        "requestId": request_id,
        "accountPath": account_path,
        "signature": signature.to_base64(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
