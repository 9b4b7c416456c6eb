use crate::{
    data::{Page, queue::QueueEntry},
    error::{IntakeResult, MakeQuerySnafu},
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use snafu::ResultExt;
use sqlx::{Pool, Postgres};

/// Columns of `auth_user` that are always safe to hand out.
pub const USER_FIELDS: [&str; 4] = ["id", "email", "first_name", "last_name"];
/// Safe columns that only some `auth_user` schemas carry.
pub const OPTIONAL_USER_FIELDS: [&str; 4] = ["is_active", "created_on", "modified_on", "last_login"];

#[async_trait]
pub trait IntakeStore: Send + Sync {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> IntakeResult<()>;
    /// Every column of `student_info`, ordered by id.
    async fn student_rows(&self, page: Page) -> IntakeResult<Vec<Value>>;
    /// Whitelisted `auth_user` columns only, ordered by id.
    async fn user_rows(&self, page: Page) -> IntakeResult<Vec<Value>>;
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn present_optional_user_fields(&self) -> IntakeResult<Vec<&'static str>> {
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = 'auth_user'",
        )
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)?;

        Ok(OPTIONAL_USER_FIELDS
            .into_iter()
            .filter(|field| present.iter().any(|column| column.as_str() == *field))
            .collect())
    }
}

/// Builds the `jsonb_build_object` projection for `auth_user`. Only names from
/// the whitelists above ever reach the SQL text.
pub fn user_projection(optional_present: &[&'static str]) -> String {
    USER_FIELDS
        .iter()
        .chain(optional_present)
        .map(|field| format!("'{field}', {field}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl IntakeStore for PgStore {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> IntakeResult<()> {
        sqlx::query(
            "INSERT INTO student_import_queue (user_id, student_name, student_password, import_classes, program, additional_fields, sheet_name, student_guid, account_enabled, account_added_on, account_updated_on) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)",
        )
        .bind(&entry.user_id)
        .bind(&entry.student_name)
        .bind(entry.student_password.as_ref().map(|password| password.expose_secret()))
        .bind(&entry.import_classes)
        .bind(&entry.program)
        .bind(&entry.additional_fields)
        .bind(&entry.sheet_name)
        .bind(&entry.student_guid)
        .bind(entry.account_enabled)
        .bind(entry.added_on)
        .execute(&self.pool)
        .await
        .context(MakeQuerySnafu)?;

        Ok(())
    }

    async fn student_rows(&self, page: Page) -> IntakeResult<Vec<Value>> {
        sqlx::query_scalar::<_, Value>("SELECT to_jsonb(s) FROM student_info s ORDER BY s.id LIMIT $1 OFFSET $2")
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .context(MakeQuerySnafu)
    }

    async fn user_rows(&self, page: Page) -> IntakeResult<Vec<Value>> {
        let optional = self.present_optional_user_fields().await?;
        let sql = format!(
            "SELECT jsonb_build_object({}) FROM auth_user ORDER BY id LIMIT $1 OFFSET $2",
            user_projection(&optional)
        );

        sqlx::query_scalar::<_, Value>(&sql)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .context(MakeQuerySnafu)
    }
}
