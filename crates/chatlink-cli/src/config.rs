//! Effective settings for one invocation.
//!
//! The environment is taken from `--env`, then `CHATLINK_ENV`, then the
//! config file, falling back to development. The local user comes from
//! `--user`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use chatlink_client::config::{ClientConfig, Endpoints, Environment, ENV_VAR};
use chatlink_core::Participant;

#[derive(Debug)]
pub struct Settings {
    pub environment: Environment,
    pub endpoints: Endpoints,
    pub client: ClientConfig,
    pub user: Participant,
}

impl Settings {
    pub fn resolve(config: Option<&str>, env: Option<&str>, user: Option<&str>) -> Result<Self> {
        let path = match config {
            Some(p) => PathBuf::from(p),
            None => ClientConfig::default_path().context("cannot determine home directory")?,
        };
        let client = ClientConfig::load(&path).map_err(anyhow::Error::new)?;

        let environment = select_environment(env, std::env::var(ENV_VAR).ok().as_deref(), &client)?;
        let endpoints = client
            .endpoints(environment)
            .map_err(anyhow::Error::new)
            .with_context(|| format!("invalid endpoints for {environment}"))?;

        let user = parse_user(user.context("--user is required (id[:name[:email]])")?)?;
        debug!(%environment, base_url = %endpoints.base_url, socket_url = %endpoints.socket_url, user_id = user.id, "resolved settings");

        Ok(Self {
            environment,
            endpoints,
            client,
            user,
        })
    }
}

fn select_environment(
    flag: Option<&str>,
    var: Option<&str>,
    client: &ClientConfig,
) -> Result<Environment> {
    let chosen = flag.or(var.filter(|v| !v.trim().is_empty()));
    match chosen {
        Some(name) => name.parse().map_err(anyhow::Error::new),
        None => Ok(client.environment.unwrap_or_default()),
    }
}

/// Parse `id[:name[:email]]` into the local participant.
pub fn parse_user(raw: &str) -> Result<Participant> {
    let mut parts = raw.splitn(3, ':');
    let id = parts.next().unwrap_or_default().trim();
    let id: i64 = id
        .parse()
        .with_context(|| format!("invalid user id in '{raw}'"))?;
    if id <= 0 {
        anyhow::bail!("user id must be positive, got {id}");
    }
    let name = parts.next().unwrap_or_default().trim();
    let email = parts.next().unwrap_or_default().trim();
    let name = if name.is_empty() {
        format!("user{id}")
    } else {
        name.to_string()
    };
    Ok(Participant::new(id, name, email))
}
