use crate::{
    auth::TokenSource,
    error::{BadEnvVarSnafu, IntakeResult, ParseFlagSnafu, ParseNumberSnafu},
};
use dotenvy::var;
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;
use std::{path::PathBuf, sync::Arc};

pub const DEFAULT_TOKEN_PATH: &str = "private/api_token.txt";
pub const DEFAULT_EMAIL_DOMAIN: &str = "students.local";
pub const DEFAULT_MAX_CANVAS_ITERATIONS: u32 = 1000;

#[derive(Clone, Debug)]
pub struct RuntimeConfiguration {
    db_config: Arc<DbConfig>,
    api_config: Arc<ApiConfig>,
}

impl RuntimeConfiguration {
    pub fn new() -> IntakeResult<Self> {
        Ok(Self {
            db_config: Arc::new(DbConfig::new()?),
            api_config: Arc::new(ApiConfig::new()?),
        })
    }

    #[cfg(test)]
    pub fn for_tests(api_config: ApiConfig) -> Self {
        Self {
            db_config: Arc::new(DbConfig {
                user: "intake".into(),
                password: SecretString::from("intake"),
                path: "localhost".into(),
                port: 5432,
                database: "intake".into(),
            }),
            api_config: Arc::new(api_config),
        }
    }

    pub fn db_config(&self) -> Arc<DbConfig> {
        self.db_config.clone()
    }

    pub fn api_config(&self) -> Arc<ApiConfig> {
        self.api_config.clone()
    }
}

#[derive(Debug)]
pub struct DbConfig {
    user: String,
    password: SecretString,
    path: String,
    port: u16,
    database: String,
}

impl DbConfig {
    pub fn new() -> IntakeResult<Self> {
        let get_env_var = |name| var(name).context(BadEnvVarSnafu { name });

        Ok(Self {
            user: get_env_var("DB_USER")?,
            password: SecretString::from(get_env_var("DB_PASSWORD")?),
            path: get_env_var("DB_PATH")?,
            port: get_env_var("DB_PORT")?
                .parse()
                .context(ParseNumberSnafu { name: "DB_PORT" })?,
            database: get_env_var("DB_NAME")?,
        })
    }

    pub fn get_db_path(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            self.password.expose_secret(),
            self.path,
            self.port,
            self.database
        )
    }
}

#[derive(Debug)]
pub struct ApiConfig {
    pub token_source: TokenSource,
    pub student_email_domain: String,
    pub max_canvas_iterations: u32,
    pub run_migrations: bool,
}

impl ApiConfig {
    pub fn new() -> IntakeResult<Self> {
        // a token set directly in the environment wins over the token file
        let token_source = match var("API_TOKEN") {
            Ok(token) => TokenSource::Fixed(SecretString::from(token)),
            Err(_) => TokenSource::File(
                var("API_TOKEN_PATH").map_or_else(|_| PathBuf::from(DEFAULT_TOKEN_PATH), PathBuf::from),
            ),
        };

        let max_canvas_iterations = match var("CANVAS_MAX_ITERATIONS") {
            Ok(raw) => raw.trim().parse().context(ParseNumberSnafu {
                name: "CANVAS_MAX_ITERATIONS",
            })?,
            Err(_) => DEFAULT_MAX_CANVAS_ITERATIONS,
        };

        let run_migrations = match var("INTAKE_RUN_MIGRATIONS") {
            Ok(raw) => parse_flag("INTAKE_RUN_MIGRATIONS", &raw)?,
            Err(_) => true,
        };

        Ok(Self {
            token_source,
            student_email_domain: var("STUDENT_EMAIL_DOMAIN")
                .unwrap_or_else(|_| DEFAULT_EMAIL_DOMAIN.to_string()),
            max_canvas_iterations,
            run_migrations,
        })
    }
}

fn parse_flag(name: &'static str, raw: &str) -> IntakeResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => ParseFlagSnafu {
            name,
            found: raw.to_string(),
        }
        .fail(),
    }
}
