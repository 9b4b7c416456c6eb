use crate::{
    error::{
        BcryptSnafu, CommitTransactionSnafu, EmailSnafu, GetDatabaseConnectionSnafu,
        IntakeResult, JoinTaskSnafu, MakeQuerySnafu,
    },
    provisioning::{CanvasStep, ImportOptions, StudentProvisioner},
};
use async_trait::async_trait;
use bcrypt::DEFAULT_COST;
use email_address::EmailAddress;
use rand::{Rng, distr::Alphanumeric, rng};
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;
use sqlx::{PgConnection, Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

const GENERATED_PASSWORD_LEN: usize = 14;

/// Records provisioning work in Postgres: accounts land in `auth_user` and
/// `student_info`, directory and Canvas work lands in queue tables that the
/// AD and Canvas workers consume.
#[derive(Clone, Debug)]
pub struct PgProvisioner {
    pool: Pool<Postgres>,
    email_domain: String,
}

#[derive(sqlx::FromRow, Debug)]
struct QueuedStudent {
    id: i64,
    user_id: String,
    student_name: String,
    student_password: Option<String>,
    account_enabled: bool,
}

#[derive(sqlx::FromRow, Debug)]
struct ClaimedCanvasRow {
    id: i64,
    user_id: String,
    import_classes: String,
}

impl PgProvisioner {
    pub fn new(pool: Pool<Postgres>, email_domain: impl Into<String>) -> Self {
        Self {
            pool,
            email_domain: email_domain.into(),
        }
    }

    async fn provision_one(
        &self,
        student: QueuedStudent,
        options: ImportOptions,
        now: OffsetDateTime,
        conn: &mut PgConnection,
    ) -> IntakeResult<bool> {
        let email = EmailAddress::from_str(&format!(
            "{}@{}",
            student.user_id.to_lowercase(),
            self.email_domain
        ))
        .context(EmailSnafu {
            user_id: student.user_id.clone(),
        })?;
        let (first_name, last_name) = split_student_name(&student.student_name);

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM auth_user WHERE username = $1")
            .bind(&student.user_id)
            .fetch_optional(&mut *conn)
            .await
            .context(MakeQuerySnafu)?;

        let password_hash = if existing.is_none()
            || options.contains(ImportOptions::ERASE_CURRENT_PASSWORD)
        {
            let password = match student.student_password.clone() {
                Some(password) if !password.is_empty() => SecretString::from(password),
                _ => {
                    let generated = generate_password();
                    sqlx::query("UPDATE student_import_queue SET student_password = $2 WHERE id = $1")
                        .bind(student.id)
                        .bind(generated.expose_secret())
                        .execute(&mut *conn)
                        .await
                        .context(MakeQuerySnafu)?;
                    generated
                }
            };
            Some(hash_password(password).await?)
        } else {
            None
        };

        let (auth_user_id, created) = if let Some(id) = existing {
            sqlx::query(
                "UPDATE auth_user SET email = $2, first_name = $3, last_name = $4, password = COALESCE($5, password), is_active = $6, modified_on = $7 WHERE id = $1",
            )
            .bind(id)
            .bind(email.as_str())
            .bind(first_name)
            .bind(last_name)
            .bind(password_hash)
            .bind(student.account_enabled)
            .bind(now)
            .execute(&mut *conn)
            .await
            .context(MakeQuerySnafu)?;

            (id, false)
        } else {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO auth_user (username, email, first_name, last_name, password, is_active, created_on, modified_on) VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING id",
            )
            .bind(&student.user_id)
            .bind(email.as_str())
            .bind(first_name)
            .bind(last_name)
            .bind(password_hash)
            .bind(student.account_enabled)
            .bind(now)
            .fetch_one(&mut *conn)
            .await
            .context(MakeQuerySnafu)?;

            (id, true)
        };

        sqlx::query(
            "INSERT INTO student_info (user_id, auth_user_id, student_name, student_guid, import_classes, program, additional_fields, sheet_name, account_enabled, quota_reset_pending, account_added_on, account_updated_on) \
             SELECT user_id, $2, student_name, student_guid, import_classes, program, additional_fields, sheet_name, account_enabled, $3, $4, $4 FROM student_import_queue WHERE id = $1 \
             ON CONFLICT (user_id) DO UPDATE SET auth_user_id = EXCLUDED.auth_user_id, student_name = EXCLUDED.student_name, import_classes = EXCLUDED.import_classes, program = EXCLUDED.program, additional_fields = EXCLUDED.additional_fields, sheet_name = EXCLUDED.sheet_name, account_enabled = EXCLUDED.account_enabled, quota_reset_pending = student_info.quota_reset_pending OR EXCLUDED.quota_reset_pending, account_updated_on = EXCLUDED.account_updated_on",
        )
        .bind(student.id)
        .bind(auth_user_id)
        .bind(options.contains(ImportOptions::ERASE_CURRENT_QUOTA))
        .bind(now)
        .execute(&mut *conn)
        .await
        .context(MakeQuerySnafu)?;

        trace!(user_id = %student.user_id, created, "Provisioned student");

        Ok(created)
    }
}

#[async_trait]
impl StudentProvisioner for PgProvisioner {
    async fn close_directory(&self) -> IntakeResult<()> {
        debug!("No directory session is held between batches");
        Ok(())
    }

    async fn create_accounts(&self, sheet_name: &str, options: ImportOptions) -> IntakeResult<u64> {
        let students: Vec<QueuedStudent> = sqlx::query_as(
            "SELECT id, user_id, student_name, student_password, account_enabled FROM student_import_queue WHERE sheet_name = $1 ORDER BY id",
        )
        .bind(sheet_name)
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)?;

        let now = OffsetDateTime::now_utc();
        let mut created = 0;

        for student in students {
            let user_id = student.user_id.clone();
            let mut tx = self.pool.begin().await.context(GetDatabaseConnectionSnafu)?;

            match self.provision_one(student, options, now, &mut tx).await {
                Ok(was_created) => {
                    tx.commit().await.context(CommitTransactionSnafu)?;
                    if was_created {
                        created += 1;
                    }
                }
                Err(e) => {
                    // dropping the transaction rolls it back
                    warn!(?e, %user_id, sheet_name, "Unable to provision student");
                }
            }
        }

        info!(sheet_name, created, "Created accounts");
        Ok(created)
    }

    async fn queue_active_directory_imports(&self, sheet_name: &str) -> IntakeResult<u64> {
        Ok(sqlx::query(
            "INSERT INTO ad_import_queue (user_id, student_name, student_password, student_guid, program, sheet_name, account_enabled, queued_on) \
             SELECT user_id, student_name, student_password, student_guid, program, sheet_name, account_enabled, $2 FROM student_import_queue WHERE sheet_name = $1 ORDER BY id",
        )
        .bind(sheet_name)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .rows_affected())
    }

    async fn queue_canvas_imports(&self, sheet_name: &str) -> IntakeResult<u64> {
        Ok(sqlx::query(
            "INSERT INTO canvas_import_queue (user_id, student_guid, import_classes, sheet_name, queued_on) \
             SELECT user_id, student_guid, import_classes, sheet_name, $2 FROM student_import_queue WHERE sheet_name = $1 ORDER BY id",
        )
        .bind(sheet_name)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .rows_affected())
    }

    async fn process_canvas_student(&self) -> IntakeResult<CanvasStep> {
        let mut tx = self.pool.begin().await.context(GetDatabaseConnectionSnafu)?;

        let Some(claimed) = sqlx::query_as::<_, ClaimedCanvasRow>(
            "SELECT id, user_id, import_classes FROM canvas_import_queue WHERE processed_on IS NULL ORDER BY id LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await
        .context(MakeQuerySnafu)?
        else {
            return Ok(CanvasStep::Finished("Canvas queue empty".into()));
        };

        let now = OffsetDateTime::now_utc();
        let classes = split_class_codes(&claimed.import_classes);
        for course_code in &classes {
            sqlx::query(
                "INSERT INTO canvas_enrollments (user_id, course_code, enrolled_on) VALUES ($1, $2, $3) ON CONFLICT (user_id, course_code) DO NOTHING",
            )
            .bind(&claimed.user_id)
            .bind(course_code)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(MakeQuerySnafu)?;
        }

        sqlx::query("UPDATE canvas_import_queue SET processed_on = $2 WHERE id = $1")
            .bind(claimed.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(MakeQuerySnafu)?;

        tx.commit().await.context(CommitTransactionSnafu)?;

        Ok(CanvasStep::Progressed(format!(
            "Processed {} ({} classes)",
            claimed.user_id,
            classes.len()
        )))
    }
}

async fn hash_password(password: SecretString) -> IntakeResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret().as_bytes(), DEFAULT_COST))
        .await
        .context(JoinTaskSnafu)?
        .context(BcryptSnafu)
}

fn generate_password() -> SecretString {
    let generated: String = rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect();
    SecretString::from(generated)
}

/// Splits `"Last, First"` or `"First Last"` into `(first, last)`.
fn split_student_name(name: &str) -> (&str, &str) {
    let name = name.trim();

    if let Some((last, first)) = name.split_once(',') {
        (first.trim(), last.trim())
    } else if let Some((first, last)) = name.rsplit_once(char::is_whitespace) {
        (first.trim(), last.trim())
    } else {
        (name, "")
    }
}

fn split_class_codes(import_classes: &str) -> Vec<&str> {
    let mut codes: Vec<&str> = Vec::new();
    for code in import_classes
        .split([';', ','])
        .map(str::trim)
        .filter(|code| !code.is_empty())
    {
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}
