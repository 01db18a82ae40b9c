#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub discord_oauth: Option<DiscordOAuthConfig>,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials for the optional "Sign in with Discord" flow.
#[derive(Clone)]
pub struct DiscordOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let server = ServerConfig {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        };
        let discord_oauth = match (
            std::env::var("DISCORD_CLIENT_ID"),
            std::env::var("DISCORD_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(DiscordOAuthConfig {
                client_id,
                client_secret,
                callback_url: std::env::var("DISCORD_CALLBACK_URL")
                    .unwrap_or_else(|_| "/api/auth/discord/callback".to_string()),
            }),
            _ => None,
        };
        Ok(AppConfig {
            server,
            database_url,
            discord_oauth,
        })
    }
}
