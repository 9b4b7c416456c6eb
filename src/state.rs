use crate::{
    config::RuntimeConfiguration,
    data::store::{IntakeStore, PgStore},
    error::{IntakeResult, MigrateSnafu, OpenDatabaseSnafu},
    provisioning::{StudentProvisioner, postgres::PgProvisioner},
};
use snafu::ResultExt;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::sync::Arc;

#[derive(Clone)]
pub struct IntakeState {
    store: Arc<dyn IntakeStore>,
    provisioner: Arc<dyn StudentProvisioner>,
    config: RuntimeConfiguration,
    pool: Option<Pool<Postgres>>,
}

impl IntakeState {
    pub async fn new(options: PgPoolOptions, config: RuntimeConfiguration) -> IntakeResult<Self> {
        let pool = options
            .connect(&config.db_config().get_db_path())
            .await
            .context(OpenDatabaseSnafu)?;

        if config.api_config().run_migrations {
            sqlx::migrate!().run(&pool).await.context(MigrateSnafu)?;
        } else {
            info!("Skipping migrations");
        }

        let provisioner = PgProvisioner::new(
            pool.clone(),
            config.api_config().student_email_domain.clone(),
        );

        Ok(Self {
            store: Arc::new(PgStore::new(pool.clone())),
            provisioner: Arc::new(provisioner),
            config,
            pool: Some(pool),
        })
    }

    #[cfg(test)]
    pub fn from_parts(
        store: Arc<dyn IntakeStore>,
        provisioner: Arc<dyn StudentProvisioner>,
        config: RuntimeConfiguration,
    ) -> Self {
        Self {
            store,
            provisioner,
            config,
            pool: None,
        }
    }

    pub fn store(&self) -> &dyn IntakeStore {
        self.store.as_ref()
    }

    pub fn provisioner(&self) -> &dyn StudentProvisioner {
        self.provisioner.as_ref()
    }

    pub const fn config(&self) -> &RuntimeConfiguration {
        &self.config
    }

    pub async fn sensible_shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Database pool closed");
        }
    }
}
