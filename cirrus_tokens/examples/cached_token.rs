use std::{path::PathBuf, time::Duration};

use clap::Parser;
use cirrus_tokens::{
    cache::{CacheConfig, EncryptedCache},
    sources::{
        AsyncTokenSource, ServiceAccount, ServicePrincipalCredentials, ServicePrincipalSource,
    },
    ClientId, ClientSecret,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// A service account credentials file; replaces the individual options below
    #[arg(long, env, conflicts_with_all = ["token_url", "client_id", "client_secret"])]
    service_account: Option<PathBuf>,

    /// The issuing authority's token request URL
    #[arg(short, long, env)]
    token_url: Option<reqwest::Url>,

    /// The client ID of the service principal
    #[arg(short, long, env)]
    client_id: Option<ClientId>,

    /// The client secret of the service principal
    #[arg(short = 's', long, env, hide_env_values = true)]
    client_secret: Option<ClientSecret>,

    /// The directory holding the encrypted token cache
    #[arg(long, env)]
    cache_dir: Option<PathBuf>,

    /// Seconds between token requests
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let source = match opts.service_account {
        Some(path) => ServiceAccount::from_file(path).await?.into_source(client)?,
        None => ServicePrincipalSource::new(
            client,
            opts.token_url
                .ok_or_else(|| color_eyre::eyre::eyre!("--token-url is required"))?,
            ServicePrincipalCredentials {
                client_id: opts
                    .client_id
                    .ok_or_else(|| color_eyre::eyre::eyre!("--client-id is required"))?,
                client_secret: opts
                    .client_secret
                    .ok_or_else(|| color_eyre::eyre::eyre!("--client-secret is required"))?,
                name: None,
            },
        ),
    };

    let mut config = CacheConfig::default();
    if let Some(dir) = opts.cache_dir {
        config = config.with_directory(dir);
    }
    let cached = EncryptedCache::for_source(source, config.with_env_overrides()?);

    tracing::info!(path = %cached.cache_path().display(), "using token cache");

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        match cached.request_token().await {
            Ok(token) => tracing::info!(
                token = format_args!("{:?}", token.access_token()),
                expiry = token.expiry().0,
                "pulled token"
            ),
            Err(error) => tracing::error!(
                error = &error as &dyn std::error::Error,
                "unable to obtain token"
            ),
        }
    }
}
