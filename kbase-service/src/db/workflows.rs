//! Workflow, step and task persistence.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params};

use super::Database;
use super::models::{
    StepStatus, TaskStatus, Workflow, WorkflowStatus, WorkflowStep, WorkflowTask,
};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

const WORKFLOW_COLUMNS: &str =
    "id, space_id, resource_type, resource_id, status, current_step_id, created_by, created_at, updated_at";
const STEP_COLUMNS: &str =
    "id, workflow_id, name, step_order, approver_role, required, timeout_hours, status, created_at";
const TASK_COLUMNS: &str =
    "id, workflow_id, step_id, approver_id, status, comment, created_at, updated_at";

/// Everything one approve/reject decision writes, applied atomically by
/// [`Database::apply_task_decision`].
#[derive(Debug, Clone)]
pub struct TaskDecisionPlan {
    pub task_id: String,
    pub step_id: String,
    pub workflow_id: String,
    /// `Approved` or `Rejected`
    pub decision: TaskStatus,
    pub comment: Option<String>,
    /// Next step to activate and its fanned-out tasks (approval with a following step)
    pub next_step: Option<(String, Vec<WorkflowTask>)>,
    /// Terminal workflow status (last-step approval or any rejection)
    pub finish_workflow: Option<WorkflowStatus>,
}

impl Database {
    /// Insert a workflow together with its steps
    pub fn insert_workflow(&self, workflow: &Workflow, steps: &[WorkflowStep]) -> ServiceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            &format!(
                "INSERT INTO workflows ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                WORKFLOW_COLUMNS
            ),
            params![
                workflow.id,
                workflow.space_id,
                workflow.resource_type,
                workflow.resource_id,
                workflow.status.as_str(),
                workflow.current_step_id,
                workflow.created_by,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        for step in steps {
            tx.execute(
                &format!(
                    "INSERT INTO workflow_steps ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    STEP_COLUMNS
                ),
                params![
                    step.id,
                    step.workflow_id,
                    step.name,
                    step.step_order as i64,
                    step.approver_role,
                    step.required,
                    step.timeout_hours as i64,
                    step.status.as_str(),
                    step.created_at.to_rfc3339(),
                ],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub fn get_workflow(&self, id: &str) -> ServiceResult<Option<Workflow>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM workflows WHERE id = ?1", WORKFLOW_COLUMNS),
            params![id],
            Workflow::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// The still-open workflow for a resource, if any
    pub fn get_open_workflow_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> ServiceResult<Option<Workflow>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM workflows WHERE resource_type = ?1 AND resource_id = ?2 AND status = ?3 \
                 ORDER BY created_at DESC LIMIT 1",
                WORKFLOW_COLUMNS
            ),
            params![resource_type, resource_id, WorkflowStatus::Processing.as_str()],
            Workflow::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Workflows opened in a space, newest first, optionally narrowed to one status
    pub fn list_workflows_for_space(
        &self,
        space_id: &str,
        status: Option<WorkflowStatus>,
    ) -> ServiceResult<Vec<Workflow>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!("SELECT {} FROM workflows WHERE space_id = ?1", WORKFLOW_COLUMNS);
        if status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;
        let rows = match status {
            Some(status) => stmt.query_map(params![space_id, status.as_str()], Workflow::from_row),
            None => stmt.query_map(params![space_id], Workflow::from_row),
        };
        let workflows = rows
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(workflows)
    }

    /// Steps of a workflow in execution order
    pub fn get_workflow_steps(&self, workflow_id: &str) -> ServiceResult<Vec<WorkflowStep>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_steps WHERE workflow_id = ?1 ORDER BY step_order",
                STEP_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let steps = stmt
            .query_map(params![workflow_id], WorkflowStep::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(steps)
    }

    pub fn get_step(&self, id: &str) -> ServiceResult<Option<WorkflowStep>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM workflow_steps WHERE id = ?1", STEP_COLUMNS),
            params![id],
            WorkflowStep::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// The step that follows `after_order`, by order
    pub fn get_next_step(
        &self,
        workflow_id: &str,
        after_order: u32,
    ) -> ServiceResult<Option<WorkflowStep>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM workflow_steps WHERE workflow_id = ?1 AND step_order > ?2 \
                 ORDER BY step_order LIMIT 1",
                STEP_COLUMNS
            ),
            params![workflow_id, after_order as i64],
            WorkflowStep::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    pub fn get_task(&self, id: &str) -> ServiceResult<Option<WorkflowTask>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM workflow_tasks WHERE id = ?1", TASK_COLUMNS),
            params![id],
            WorkflowTask::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    pub fn get_step_tasks(&self, step_id: &str) -> ServiceResult<Vec<WorkflowTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM workflow_tasks WHERE step_id = ?1 ORDER BY created_at, approver_id",
                TASK_COLUMNS
            ),
            params![step_id],
        )
    }

    pub fn get_workflow_tasks(&self, workflow_id: &str) -> ServiceResult<Vec<WorkflowTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM workflow_tasks WHERE workflow_id = ?1 ORDER BY created_at, approver_id",
                TASK_COLUMNS
            ),
            params![workflow_id],
        )
    }

    /// Tasks assigned to an approver, optionally narrowed to one status
    pub fn list_tasks_for_approver(
        &self,
        approver_id: &str,
        status: Option<TaskStatus>,
    ) -> ServiceResult<Vec<WorkflowTask>> {
        match status {
            Some(status) => self.query_tasks(
                &format!(
                    "SELECT {} FROM workflow_tasks WHERE approver_id = ?1 AND status = ?2 \
                     ORDER BY created_at DESC",
                    TASK_COLUMNS
                ),
                params![approver_id, status.as_str()],
            ),
            None => self.query_tasks(
                &format!(
                    "SELECT {} FROM workflow_tasks WHERE approver_id = ?1 ORDER BY created_at DESC",
                    TASK_COLUMNS
                ),
                params![approver_id],
            ),
        }
    }

    fn query_tasks(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> ServiceResult<Vec<WorkflowTask>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
        let tasks = stmt
            .query_map(params, WorkflowTask::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(tasks)
    }

    /// Insert the fan-out tasks of a step, unless the step already has tasks.
    /// Returns the step's tasks either way.
    pub fn insert_step_tasks_once(
        &self,
        step_id: &str,
        tasks: &[WorkflowTask],
    ) -> ServiceResult<Vec<WorkflowTask>> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction().map_err(DatabaseError::Query)?;

            let existing: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM workflow_tasks WHERE step_id = ?1",
                    params![step_id],
                    |row| row.get(0),
                )
                .map_err(DatabaseError::Query)?;

            if existing == 0 {
                insert_tasks(&tx, tasks)?;
            }
            tx.commit().map_err(DatabaseError::Query)?;
        }

        self.get_step_tasks(step_id)
    }

    /// Move an open workflow to a terminal status. Tasks still waiting for a
    /// decision are closed as `cancelled` in the same transaction. Returns
    /// false if the workflow was already closed.
    pub fn finish_workflow(&self, id: &str, status: WorkflowStatus) -> ServiceResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = Utc::now().to_rfc3339();

        let rows = tx
            .execute(
                "UPDATE workflows SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    status.as_str(),
                    now,
                    id,
                    WorkflowStatus::Processing.as_str()
                ],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE workflow_tasks SET status = ?1, updated_at = ?2 WHERE workflow_id = ?3 AND status = ?4",
            params![
                TaskStatus::Cancelled.as_str(),
                now,
                id,
                TaskStatus::Processing.as_str()
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    /// Apply one task decision atomically.
    ///
    /// The task, the step and the workflow are each updated only while still
    /// `processing`; if any guard fails the whole decision is rolled back with
    /// `InvalidState`. This is what makes the first committed decision on a
    /// step win.
    pub fn apply_task_decision(&self, plan: &TaskDecisionPlan) -> ServiceResult<()> {
        let (step_status, sibling_status) = match plan.decision {
            TaskStatus::Approved => (StepStatus::Approved, TaskStatus::ApprovedByOthers),
            TaskStatus::Rejected => (StepStatus::Rejected, TaskStatus::RejectedByOthers),
            other => {
                return Err(ServiceError::InvalidRequest {
                    message: format!("'{}' is not a decision", other.as_str()),
                });
            }
        };

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = Utc::now().to_rfc3339();
        let processing = TaskStatus::Processing.as_str();

        let rows = tx
            .execute(
                "UPDATE workflow_tasks SET status = ?1, comment = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![plan.decision.as_str(), plan.comment, now, plan.task_id, processing],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Err(ServiceError::InvalidState {
                message: format!("Task {} is not in processing status", plan.task_id),
            });
        }

        let rows = tx
            .execute(
                "UPDATE workflow_steps SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![step_status.as_str(), plan.step_id, StepStatus::Processing.as_str()],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Err(ServiceError::InvalidState {
                message: format!("Step {} is no longer in processing status", plan.step_id),
            });
        }

        tx.execute(
            "UPDATE workflow_tasks SET status = ?1, updated_at = ?2 \
             WHERE step_id = ?3 AND id != ?4 AND status = ?5",
            params![sibling_status.as_str(), now, plan.step_id, plan.task_id, processing],
        )
        .map_err(DatabaseError::Query)?;

        let workflow_status = plan
            .finish_workflow
            .unwrap_or(WorkflowStatus::Processing);
        let current_step_id = plan
            .next_step
            .as_ref()
            .map(|(step_id, _)| step_id.as_str())
            .unwrap_or(plan.step_id.as_str());

        let rows = tx
            .execute(
                "UPDATE workflows SET status = ?1, current_step_id = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    workflow_status.as_str(),
                    current_step_id,
                    now,
                    plan.workflow_id,
                    WorkflowStatus::Processing.as_str()
                ],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Err(ServiceError::InvalidState {
                message: format!("Workflow {} is no longer in processing status", plan.workflow_id),
            });
        }

        if let Some((_, tasks)) = &plan.next_step {
            insert_tasks(&tx, tasks)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }
}

fn insert_tasks(tx: &Transaction<'_>, tasks: &[WorkflowTask]) -> ServiceResult<()> {
    let mut stmt = tx
        .prepare(&format!(
            "INSERT INTO workflow_tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            TASK_COLUMNS
        ))
        .map_err(DatabaseError::Query)?;

    for task in tasks {
        stmt.execute(params![
            task.id,
            task.workflow_id,
            task.step_id,
            task.approver_id,
            task.status.as_str(),
            task.comment,
            task.created_at.to_rfc3339(),
            task.updated_at.to_rfc3339(),
        ])
        .map_err(DatabaseError::Query)?;
    }

    Ok(())
}
