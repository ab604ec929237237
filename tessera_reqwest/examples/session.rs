use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tessera_reqwest::{session_client, UserApi};
use tessera_tokens::{
    api::{dto, AuthApi, DEFAULT_API_BASE_URL},
    slots::{FileSlot, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY},
    Password, RefreshCoordinator, SessionStatus, TokenStore,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the service
    #[arg(long, env = "API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: reqwest::Url,

    /// The email address to sign in with if no session is stored
    #[arg(short, long, env = "TESSERA_EMAIL")]
    email: Option<String>,

    /// The password to sign in with if no session is stored
    #[arg(short, long, env = "TESSERA_PASSWORD", hide_env_values = true)]
    password: Option<Password>,

    /// The directory used to keep session tokens
    #[arg(short = 'd', long, env = "TESSERA_STATE_DIR", default_value = ".session")]
    state_dir: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    tokio::fs::create_dir_all(&opts.state_dir).await?;

    let store = TokenStore::restore(
        FileSlot::in_dir(&opts.state_dir, ACCESS_TOKEN_KEY),
        FileSlot::in_dir(&opts.state_dir, REFRESH_TOKEN_KEY),
    )
    .await;

    let http = reqwest::Client::new();
    let auth = AuthApi::new(http.clone(), opts.api_base_url.clone());
    let coordinator = RefreshCoordinator::new(Arc::new(store), auth.clone()).await;

    if !coordinator.is_logged_in().await {
        let (Some(email), Some(password)) = (opts.email, opts.password) else {
            color_eyre::eyre::bail!("no stored session; provide an email and password to sign in");
        };

        let resp = auth.login(&dto::LoginRequest { email, password }).await?;
        tracing::info!(user = resp.user.email, "signed in");
        coordinator.sign_in(&resp.token_pair()).await;
    }

    let mut status = coordinator.subscribe();
    let users = UserApi::new(session_client(http, coordinator), opts.api_base_url);

    let mut interval = time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => match users.current_user().await {
                Ok(user) => tracing::info!(id = user.id, email = user.email, "current user"),
                Err(error) => tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "unable to fetch current user"
                ),
            },
            changed = status.changed() => {
                changed?;
                if *status.borrow() == SessionStatus::Invalidated {
                    tracing::warn!("session ended, sign in again");
                    return Ok(());
                }
            }
        }
    }
}
