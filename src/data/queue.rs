use crate::json_conveniences::{first_truthy_text, text_of, truthy};
use secrecy::SecretString;
use serde_json::{Map, Value};
use snafu::{Snafu, ensure};
use time::OffsetDateTime;
use uuid::Uuid;

/// Why a single student entry could not be turned into a queue row.
#[derive(Debug, Snafu)]
pub enum StudentEntryError {
    #[snafu(display("student entry must be a JSON object"))]
    NotAnObject,
    #[snafu(display("user_id (or sam_account_name) is required"))]
    MissingUserId,
}

/// One row of `student_import_queue`, ready to insert.
#[derive(Debug)]
pub struct QueueEntry {
    pub user_id: String,
    pub student_name: String,
    pub student_password: Option<SecretString>,
    pub import_classes: String,
    pub program: String,
    pub additional_fields: String,
    pub sheet_name: String,
    pub student_guid: String,
    pub account_enabled: bool,
    pub added_on: OffsetDateTime,
}

impl QueueEntry {
    pub fn from_json(
        student: &Value,
        sheet_name: &str,
        now: OffsetDateTime,
    ) -> Result<Self, StudentEntryError> {
        let Value::Object(student) = student else {
            return NotAnObjectSnafu.fail();
        };

        let user_id = first_truthy_text(student, &["user_id", "sam_account_name"])
            .map(|id| id.trim().to_string())
            .unwrap_or_default();
        ensure!(!user_id.is_empty(), MissingUserIdSnafu);

        let student_name = first_truthy_text(student, &["student_name", "name"])
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user_id.clone());

        let student_password = student
            .get("student_password")
            .filter(|password| !password.is_null())
            .map(|password| SecretString::from(text_of(password)));

        // downstream consumers split this column, so it is never NULL
        let import_classes = student.get("import_classes").map(text_of).unwrap_or_default();

        let program = first_truthy_text(student, &["program"]).unwrap_or_default();

        let student_guid = first_truthy_text(student, &["student_guid"])
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Ok(Self {
            user_id,
            student_name,
            student_password,
            import_classes,
            program,
            additional_fields: additional_fields(student),
            sheet_name: sheet_name.to_string(),
            student_guid,
            account_enabled: true,
            added_on: now,
        })
    }
}

fn additional_fields(student: &Map<String, Value>) -> String {
    let mut fields = first_truthy_text(student, &["additional_fields"]).unwrap_or_default();

    if let Some(doc_number) = student.get("doc_number").filter(|doc| truthy(doc)) {
        if !fields.is_empty() {
            fields.push('\n');
        }
        fields.push_str("DOC_NUMBER=");
        fields.push_str(&text_of(doc_number));
    }

    fields
}
