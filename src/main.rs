use anyhow::{anyhow, Result};
use certcrab::challenge::Http01Server;
use certcrab::registration::EabOptions;
use certcrab::{
    AccountKey, Certifier, Config, Core, KeyType, ObtainRequest, Registrar, SharedConfig,
    SolverManager,
};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("certcrab".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    if config.domains.is_empty() {
        return Err(anyhow!("no domains configured"));
    }

    let key = account_key_init(&config).await?;
    let core = Arc::new(Core::new(config.http_client()?, &config.ca_dir_url, key).await?);

    let registrar = Registrar::new(core.clone(), config.email.clone());
    let account = match &config.eab {
        Some(eab) => registrar.register_with_eab(true, &EabOptions::from(eab)).await?,
        None => match registrar.resolve_account_by_key().await {
            Ok(account) => account,
            Err(err) => {
                tracing::debug!("no existing account: {err}");
                registrar.register(true).await?
            }
        },
    };
    tracing::info!("using account {}", account.location);

    let mut solvers = SolverManager::new(core.clone());
    let Some(bind_addr) = config.http01_bind_addr else {
        return Err(anyhow!("no challenge solver configured: set http01_bind_addr"));
    };
    let http01 = Arc::new(Http01Server::spawn(bind_addr)?);
    solvers.set_http01_provider(http01.clone());

    let certifier = Certifier::new(core, Arc::new(solvers), config.key_type);
    let request = ObtainRequest {
        domains: config.domains.clone(),
        bundle: config.bundle,
        private_key: None,
        must_staple: config.must_staple,
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        res = certifier.obtain(request) => {
            let cert = res?;
            tracing::info!("[{}] certificate issued: {}", cert.domain, cert.cert_url);
            print!("{}", String::from_utf8_lossy(&cert.certificate));
            if let Some(key) = &cert.private_key {
                print!("{}", String::from_utf8_lossy(key));
            }
        }
    }
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certcrab=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            tracing::debug!("loaded config from {config_file}");
            let config = Config::try_from_file(&config_file)?;
            Ok(Arc::new(config))
        }
    }
}

async fn account_key_init(config: &Config) -> Result<AccountKey> {
    let Some(path) = &config.account_key_path else {
        tracing::info!("no account_key_path configured, using an ephemeral account key");
        return Ok(AccountKey::generate(KeyType::EC256)?);
    };

    match tokio::fs::read_to_string(path).await {
        Ok(pem) => {
            tracing::debug!("loaded account key from {}", path.display());
            Ok(AccountKey::from_pem(&pem)?)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let key = AccountKey::generate(KeyType::EC256)?;
            tokio::fs::write(path, key.to_pem()).await?;
            tracing::info!("generated account key at {}", path.display());
            Ok(key)
        }
        Err(err) => Err(err.into()),
    }
}
