use crate::{
    data::queue::QueueEntry,
    error::{FormatTimeSnafu, IntakeError, IntakeResult},
    json_conveniences::{flag, truthy},
    provisioning::ImportOptions,
    state::IntakeState,
};
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{ErrorCompat, ResultExt};
use time::{OffsetDateTime, UtcOffset, macros::format_description};

/// The two HTTP surfaces that accept student batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportRoute {
    /// `POST /api_student_import.json`
    Api,
    /// `POST /import/student_import_api`, kept for the spreadsheet macro that
    /// still posts there. It always queues Canvas and leaves the directory
    /// session alone.
    Legacy,
}

impl ImportRoute {
    const fn closes_directory(self) -> bool {
        matches!(self, Self::Api)
    }

    const fn honours_queue_canvas(self) -> bool {
        matches!(self, Self::Api)
    }
}

impl ImportOptions {
    pub fn from_body(body: &Map<String, Value>, route: ImportRoute) -> Self {
        let mut options = Self::empty();
        options.set(
            Self::ERASE_CURRENT_PASSWORD,
            flag(body, "erase_current_password", false),
        );
        options.set(Self::ERASE_CURRENT_QUOTA, flag(body, "erase_current_quota", false));
        options.set(
            Self::QUEUE_CANVAS,
            !route.honours_queue_canvas() || flag(body, "queue_canvas", true),
        );
        options.set(Self::PROCESS_CANVAS, flag(body, "process_canvas", true));
        options
    }
}

/// `students` may be a list or a single object; `student` is the fallback
/// when `students` is absent. Falsy values such as `false`, `""` or `0` mean
/// no students.
pub fn normalise_students(body: &Map<String, Value>) -> Vec<Value> {
    match body.get("students") {
        None | Some(Value::Null) => body
            .get("student")
            .filter(|single| !single.is_null())
            .map(|single| vec![single.clone()])
            .unwrap_or_default(),
        Some(Value::Array(students)) => students.clone(),
        Some(other) if !truthy(other) => vec![],
        Some(other) => vec![other.clone()],
    }
}

pub fn sheet_name_for(now: OffsetDateTime) -> IntakeResult<String> {
    let stamp = now
        .to_offset(UtcOffset::UTC)
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .context(FormatTimeSnafu)?;
    Ok(format!("API_{stamp}"))
}

/// The error and its causes on a single line, `outer: inner`.
fn one_line(error: &IntakeError) -> String {
    error
        .iter_chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

#[derive(Serialize, Debug)]
pub struct InsertError {
    pub student: Value,
    pub error: String,
}

#[derive(Serialize, Debug)]
pub struct ImportSummary {
    pub sheet_name: String,
    pub queued_students: u64,
    pub created_accounts: u64,
    pub queued_ad: u64,
    pub queued_canvas: u64,
    pub canvas_processed: u64,
    pub insert_errors: Vec<InsertError>,
    pub last_canvas_result: Option<String>,
}

#[derive(Debug)]
pub enum ImportOutcome {
    NoStudents,
    Imported(ImportSummary),
}

/// Queues every student in the batch, then runs account creation, directory
/// queueing and Canvas queueing for the batch's `sheet_name` in that order.
///
/// Row failures are collected rather than aborting the batch; accounts that
/// were already created for the other rows stay in place.
pub async fn run_import(
    state: &IntakeState,
    route: ImportRoute,
    body: &Map<String, Value>,
    now: OffsetDateTime,
) -> IntakeResult<ImportOutcome> {
    let options = ImportOptions::from_body(body, route);
    let students = normalise_students(body);
    if students.is_empty() {
        return Ok(ImportOutcome::NoStudents);
    }

    let sheet_name = sheet_name_for(now)?;
    info!(?route, %sheet_name, students = students.len(), ?options, "Starting student import");

    let mut queued_students = 0;
    let mut insert_errors = vec![];
    for student in students {
        let inserted = match QueueEntry::from_json(&student, &sheet_name, now) {
            Ok(entry) => state
                .store()
                .insert_queue_entry(&entry)
                .await
                .map_err(|e| one_line(&e)),
            Err(e) => Err(e.to_string()),
        };

        match inserted {
            Ok(()) => queued_students += 1,
            Err(error) => {
                warn!(%error, %sheet_name, "Unable to queue student");
                insert_errors.push(InsertError { student, error });
            }
        }
    }

    let provisioner = state.provisioner();

    if route.closes_directory() {
        provisioner.close_directory().await?;
    }

    let created_accounts = provisioner.create_accounts(&sheet_name, options).await?;
    let queued_ad = provisioner.queue_active_directory_imports(&sheet_name).await?;
    let queued_canvas = if options.contains(ImportOptions::QUEUE_CANVAS) {
        provisioner.queue_canvas_imports(&sheet_name).await?
    } else {
        0
    };

    let mut canvas_processed = 0;
    let mut last_canvas_result = None;
    if options.contains(ImportOptions::PROCESS_CANVAS) && queued_canvas > 0 {
        for _ in 0..state.config().api_config().max_canvas_iterations {
            let step = provisioner.process_canvas_student().await?;
            canvas_processed += 1;

            let finished = step.is_finished();
            last_canvas_result = Some(step.to_string());
            if finished {
                break;
            }
        }
    }

    info!(
        %sheet_name,
        queued_students,
        created_accounts,
        queued_ad,
        queued_canvas,
        canvas_processed,
        failed = insert_errors.len(),
        "Finished student import"
    );

    Ok(ImportOutcome::Imported(ImportSummary {
        sheet_name,
        queued_students,
        created_accounts,
        queued_ad,
        queued_canvas,
        canvas_processed,
        insert_errors,
        last_canvas_result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestHarness, body};
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-04 05:06:07 UTC);

    #[test]
    fn sheet_name_uses_utc() {
        assert_eq!(sheet_name_for(NOW).unwrap(), "API_20250304_050607");
        assert_eq!(
            sheet_name_for(datetime!(2025-03-04 07:06:07 +02:00)).unwrap(),
            "API_20250304_050607"
        );
    }

    #[test]
    fn students_are_normalised_into_a_list() {
        let one = json!({"user_id": "S1"});

        assert_eq!(normalise_students(&body(json!({"students": [one.clone()]}))), vec![one.clone()]);
        assert_eq!(normalise_students(&body(json!({"students": one.clone()}))), vec![one.clone()]);
        assert_eq!(normalise_students(&body(json!({"student": one.clone()}))), vec![one.clone()]);
        assert_eq!(
            normalise_students(&body(json!({"students": null, "student": one.clone()}))),
            vec![one]
        );
        assert!(normalise_students(&body(json!({}))).is_empty());
        assert!(normalise_students(&body(json!({"students": []}))).is_empty());
        for falsy in [json!(false), json!(""), json!(0)] {
            assert!(normalise_students(&body(json!({"students": falsy}))).is_empty());
        }
        assert_eq!(normalise_students(&body(json!({"students": "S1"}))), vec![json!("S1")]);
    }

    #[test]
    fn option_defaults() {
        let options = ImportOptions::from_body(&body(json!({})), ImportRoute::Api);
        assert_eq!(options, ImportOptions::QUEUE_CANVAS | ImportOptions::PROCESS_CANVAS);

        let options = ImportOptions::from_body(
            &body(json!({"queue_canvas": false, "erase_current_quota": 1})),
            ImportRoute::Api,
        );
        assert_eq!(options, ImportOptions::ERASE_CURRENT_QUOTA | ImportOptions::PROCESS_CANVAS);
    }

    #[test]
    fn legacy_route_always_queues_canvas() {
        let options =
            ImportOptions::from_body(&body(json!({"queue_canvas": false})), ImportRoute::Legacy);
        assert!(options.contains(ImportOptions::QUEUE_CANVAS));
    }

    #[tokio::test]
    async fn empty_batches_do_nothing() {
        for students in [json!([]), json!(false), json!(""), json!(0)] {
            let harness = TestHarness::new();
            let outcome = run_import(
                &harness.state,
                ImportRoute::Api,
                &body(json!({"students": students})),
                NOW,
            )
            .await
            .unwrap();

            assert!(matches!(outcome, ImportOutcome::NoStudents), "{students}");
            assert!(harness.provisioner.calls().is_empty(), "{students}");
        }
    }

    #[tokio::test]
    async fn side_effects_run_in_order() {
        let harness = TestHarness::new();
        let outcome = run_import(
            &harness.state,
            ImportRoute::Api,
            &body(json!({"students": [{"user_id": "S1"}, {"user_id": "S2"}]})),
            NOW,
        )
        .await
        .unwrap();

        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected an import");
        };
        assert_eq!(summary.queued_students, 2);
        assert_eq!(summary.queued_canvas, 2);
        assert_eq!(summary.canvas_processed, 3);
        assert_eq!(summary.last_canvas_result.as_deref(), Some("Canvas queue empty"));
        assert_eq!(
            harness.provisioner.calls(),
            vec![
                "close_directory",
                "create_accounts API_20250304_050607 QUEUE_CANVAS | PROCESS_CANVAS",
                "queue_active_directory_imports API_20250304_050607",
                "queue_canvas_imports API_20250304_050607",
                "process_canvas_student",
                "process_canvas_student",
                "process_canvas_student",
            ]
        );
    }

    #[tokio::test]
    async fn legacy_route_skips_closing_the_directory() {
        let harness = TestHarness::new();
        run_import(
            &harness.state,
            ImportRoute::Legacy,
            &body(json!({"student": {"user_id": "S1"}, "process_canvas": false})),
            NOW,
        )
        .await
        .unwrap();

        let calls = harness.provisioner.calls();
        assert!(!calls.contains(&"close_directory".to_string()));
        assert!(calls.contains(&"queue_canvas_imports API_20250304_050607".to_string()));
        assert!(!calls.contains(&"process_canvas_student".to_string()));
    }

    #[tokio::test]
    async fn row_failures_are_collected() {
        let harness = TestHarness::new().failing_insert_for("BROKEN");
        let outcome = run_import(
            &harness.state,
            ImportRoute::Api,
            &body(json!({"students": [
                {"user_id": "S1"},
                {"student_name": "No Id"},
                {"user_id": "BROKEN"},
                "not an object"
            ]})),
            NOW,
        )
        .await
        .unwrap();

        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected an import");
        };
        assert_eq!(summary.queued_students, 1);
        assert_eq!(summary.insert_errors.len(), 3);
        assert_eq!(summary.insert_errors[0].student, json!({"student_name": "No Id"}));
        assert_eq!(summary.insert_errors[0].error, "user_id (or sam_account_name) is required");
        assert_eq!(
            summary.insert_errors[1].error,
            "Error making SQL query: encountered unexpected or invalid data: duplicate key value"
        );
        assert!(!summary.insert_errors[1].error.contains('\n'));
        assert_eq!(summary.insert_errors[2].error, "student entry must be a JSON object");
        assert_eq!(harness.store.queued_user_ids(), vec!["S1"]);
    }

    #[tokio::test]
    async fn erase_flags_reach_account_creation() {
        let harness = TestHarness::new();
        run_import(
            &harness.state,
            ImportRoute::Api,
            &body(json!({
                "students": [{"user_id": "S1"}],
                "erase_current_password": true,
                "erase_current_quota": 1,
                "queue_canvas": false
            })),
            NOW,
        )
        .await
        .unwrap();

        assert_eq!(
            harness.provisioner.calls()[1],
            "create_accounts API_20250304_050607 ERASE_CURRENT_PASSWORD | ERASE_CURRENT_QUOTA | PROCESS_CANVAS"
        );
    }

    #[tokio::test]
    async fn canvas_polling_is_capped() {
        let harness = TestHarness::with_max_canvas_iterations(5).never_finishing_canvas();
        let outcome = run_import(
            &harness.state,
            ImportRoute::Api,
            &body(json!({"students": [{"user_id": "S1"}]})),
            NOW,
        )
        .await
        .unwrap();

        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected an import");
        };
        assert_eq!(summary.canvas_processed, 5);
        assert_eq!(
            summary.last_canvas_result.as_deref(),
            Some("Processed DONE1 (no more classes)")
        );
    }

    #[tokio::test]
    async fn nothing_queued_means_no_polling() {
        let harness = TestHarness::new();
        let outcome = run_import(
            &harness.state,
            ImportRoute::Api,
            &body(json!({"students": [{"user_id": "S1"}], "queue_canvas": false})),
            NOW,
        )
        .await
        .unwrap();

        let ImportOutcome::Imported(summary) = outcome else {
            panic!("expected an import");
        };
        assert_eq!(summary.queued_canvas, 0);
        assert_eq!(summary.canvas_processed, 0);
        assert!(summary.last_canvas_result.is_none());
    }
}
