//! Multi-step approval workflows.
//!
//! A [`Workflow`] gates one resource (today always a document) behind an
//! ordered list of [`WorkflowStep`]s. Starting a step fans out one
//! [`WorkflowTask`] per space member holding the step's approver role; the
//! first decision committed on a step settles it for every sibling task.
//!
//! The engine knows nothing about documents. A decision that finishes the
//! workflow reports the status the resource should move to, and the caller
//! writes it back.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{SpaceMembership, with_timeout};
use crate::config::RuntimeConfig;
use crate::db::{
    Database, DocumentStatus, StepStatus, TaskDecisionPlan, TaskStatus, Workflow, WorkflowStatus,
    WorkflowStep, WorkflowTask,
};
use crate::error::{ServiceError, ServiceResult};

/// Resource type recorded on workflows that gate a document
pub const DOCUMENT_RESOURCE: &str = "document";

/// One step of a workflow being created
#[derive(Debug, Clone)]
pub struct NewStep {
    pub name: String,
    pub approver_role: String,
    pub required: bool,
    pub timeout_hours: u32,
}

/// Parameters for [`WorkflowEngine::create_workflow`]
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub space_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub created_by: String,
    /// Executed in the given order
    pub steps: Vec<NewStep>,
}

/// An approver's verdict on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDecision {
    Approved,
    Rejected,
}

impl TaskDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskDecision::Approved => "approved",
            TaskDecision::Rejected => "rejected",
        }
    }

    fn task_status(&self) -> TaskStatus {
        match self {
            TaskDecision::Approved => TaskStatus::Approved,
            TaskDecision::Rejected => TaskStatus::Rejected,
        }
    }
}

/// Result of a committed task decision
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub task: WorkflowTask,
    pub workflow: Workflow,
    /// Tasks created for the step that became current, if the workflow advanced
    pub next_step_tasks: Vec<WorkflowTask>,
    /// Status the gated resource should move to, set once the workflow is finished
    pub resource_status: Option<DocumentStatus>,
}

/// Workflow state machine over the relational store and the membership lookup
pub struct WorkflowEngine {
    db: Arc<Database>,
    membership: Arc<dyn SpaceMembership>,
    runtime_config: Arc<RuntimeConfig>,
}

impl WorkflowEngine {
    pub fn new(
        db: Arc<Database>,
        membership: Arc<dyn SpaceMembership>,
        runtime_config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            db,
            membership,
            runtime_config,
        }
    }

    /// Create a workflow with the given steps, pointing at the first one.
    /// Tasks are not created until [`start_workflow`](Self::start_workflow).
    pub fn create_workflow(&self, new: NewWorkflow) -> ServiceResult<Workflow> {
        if new.steps.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "A workflow needs at least one step".to_string(),
            });
        }

        let now = Utc::now();
        let workflow_id = Uuid::new_v4().to_string();

        let steps: Vec<WorkflowStep> = new
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| WorkflowStep {
                id: Uuid::new_v4().to_string(),
                workflow_id: workflow_id.clone(),
                name: step.name,
                step_order: i as u32 + 1,
                approver_role: step.approver_role,
                required: step.required,
                timeout_hours: step.timeout_hours,
                status: StepStatus::Processing,
                created_at: now,
            })
            .collect();

        let workflow = Workflow {
            id: workflow_id,
            space_id: new.space_id,
            resource_type: new.resource_type,
            resource_id: new.resource_id,
            status: WorkflowStatus::Processing,
            current_step_id: steps.first().map(|s| s.id.clone()),
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_workflow(&workflow, &steps)?;

        info!(
            workflow_id = %workflow.id,
            resource_type = %workflow.resource_type,
            resource_id = %workflow.resource_id,
            steps = steps.len(),
            "Workflow created"
        );

        Ok(workflow)
    }

    /// Single-step publish approval using the configured role, name and timeout.
    /// A workflow still open for the same resource is returned instead of
    /// creating a second one.
    pub fn create_workflow_with_step(
        &self,
        space_id: &str,
        resource_id: &str,
        resource_type: &str,
        created_by: &str,
    ) -> ServiceResult<Workflow> {
        if let Some(existing) = self
            .db
            .get_open_workflow_for_resource(resource_type, resource_id)?
        {
            debug!(
                workflow_id = %existing.id,
                resource_id = %resource_id,
                "Reusing open workflow"
            );
            return Ok(existing);
        }

        let config = self.runtime_config.dynamic();
        self.create_workflow(NewWorkflow {
            space_id: space_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            created_by: created_by.to_string(),
            steps: vec![NewStep {
                name: config.workflow.step_name.clone(),
                approver_role: config.workflow.approver_role.clone(),
                required: true,
                timeout_hours: config.workflow.step_timeout_hours,
            }],
        })
    }

    /// Fan out tasks for the workflow's current step.
    ///
    /// Calling this again for a step that already has tasks returns them
    /// without creating more.
    pub async fn start_workflow(&self, workflow_id: &str) -> ServiceResult<Vec<WorkflowTask>> {
        let workflow = self.require_workflow(workflow_id)?;
        if workflow.status != WorkflowStatus::Processing {
            return Err(ServiceError::InvalidState {
                message: format!(
                    "Workflow {} is {} and cannot be started",
                    workflow.id,
                    workflow.status.as_str()
                ),
            });
        }

        let step = match &workflow.current_step_id {
            Some(step_id) => self.db.get_step(step_id)?,
            None => self.db.get_workflow_steps(&workflow.id)?.into_iter().next(),
        }
        .ok_or_else(|| ServiceError::StepNotFound {
            step_id: workflow.current_step_id.clone().unwrap_or_default(),
        })?;

        let existing = self.db.get_step_tasks(&step.id)?;
        if !existing.is_empty() {
            debug!(workflow_id = %workflow.id, step_id = %step.id, "Workflow already started");
            return Ok(existing);
        }

        let tasks = self.fan_out(&workflow, &step).await?;
        let tasks = self.db.insert_step_tasks_once(&step.id, &tasks)?;

        info!(
            workflow_id = %workflow.id,
            step_id = %step.id,
            tasks = tasks.len(),
            "Workflow started"
        );

        Ok(tasks)
    }

    /// Record an approver's decision on a task.
    ///
    /// Approval settles the step and either activates the next step or
    /// completes the workflow. Rejection settles the step and cancels the
    /// workflow whatever step it is on. Either way every other task still
    /// open on the step is closed as decided by others, in the same
    /// transaction as the decision itself.
    pub async fn approve_task(
        &self,
        task_id: &str,
        approver_id: &str,
        comment: Option<String>,
        decision: TaskDecision,
    ) -> ServiceResult<DecisionOutcome> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if task.approver_id != approver_id {
            return Err(ServiceError::Forbidden {
                message: format!("Task {} is not assigned to {}", task_id, approver_id),
            });
        }
        if task.status != TaskStatus::Processing {
            return Err(ServiceError::InvalidState {
                message: format!("Task {} is not in processing status", task_id),
            });
        }

        let step = self
            .db
            .get_step(&task.step_id)?
            .ok_or_else(|| ServiceError::StepNotFound {
                step_id: task.step_id.clone(),
            })?;
        let workflow = self.require_workflow(&task.workflow_id)?;

        let mut plan = TaskDecisionPlan {
            task_id: task.id.clone(),
            step_id: step.id.clone(),
            workflow_id: workflow.id.clone(),
            decision: decision.task_status(),
            comment,
            next_step: None,
            finish_workflow: None,
        };
        let mut resource_status = None;

        match decision {
            TaskDecision::Approved => {
                match self.db.get_next_step(&workflow.id, step.step_order)? {
                    Some(next) => {
                        // Members are looked up before the decision transaction opens
                        let tasks = self.fan_out(&workflow, &next).await?;
                        plan.next_step = Some((next.id, tasks));
                    }
                    None => {
                        plan.finish_workflow = Some(WorkflowStatus::Completed);
                        resource_status = Some(DocumentStatus::PendingPublish);
                    }
                }
            }
            TaskDecision::Rejected => {
                plan.finish_workflow = Some(WorkflowStatus::Cancelled);
                resource_status = Some(DocumentStatus::Failed);
            }
        }

        self.db.apply_task_decision(&plan)?;

        metrics::counter!("kbase_workflow_decisions_total", "decision" => decision.as_str())
            .increment(1);
        info!(
            workflow_id = %workflow.id,
            step_id = %step.id,
            task_id = %task.id,
            approver_id = %approver_id,
            decision = decision.as_str(),
            finished = ?plan.finish_workflow,
            "Task decided"
        );

        let task = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let workflow = self.require_workflow(&workflow.id)?;
        let next_step_tasks = plan.next_step.map(|(_, tasks)| tasks).unwrap_or_default();

        Ok(DecisionOutcome {
            task,
            workflow,
            next_step_tasks,
            resource_status,
        })
    }

    /// Cancel an open workflow. Returns false if it had already finished.
    pub fn cancel_workflow(&self, workflow_id: &str) -> ServiceResult<bool> {
        self.require_workflow(workflow_id)?;
        let cancelled = self
            .db
            .finish_workflow(workflow_id, WorkflowStatus::Cancelled)?;
        if cancelled {
            info!(workflow_id = %workflow_id, "Workflow cancelled");
        }
        Ok(cancelled)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> ServiceResult<Workflow> {
        self.require_workflow(workflow_id)
    }

    pub fn get_workflow_steps(&self, workflow_id: &str) -> ServiceResult<Vec<WorkflowStep>> {
        self.require_workflow(workflow_id)?;
        self.db.get_workflow_steps(workflow_id)
    }

    pub fn get_workflow_tasks(&self, workflow_id: &str) -> ServiceResult<Vec<WorkflowTask>> {
        self.require_workflow(workflow_id)?;
        self.db.get_workflow_tasks(workflow_id)
    }

    pub fn list_tasks_for_approver(
        &self,
        approver_id: &str,
        status: Option<TaskStatus>,
    ) -> ServiceResult<Vec<WorkflowTask>> {
        self.db.list_tasks_for_approver(approver_id, status)
    }

    /// Workflows of a space, newest first
    pub fn list_workflows_for_space(
        &self,
        space_id: &str,
        status: Option<WorkflowStatus>,
    ) -> ServiceResult<Vec<Workflow>> {
        self.db.list_workflows_for_space(space_id, status)
    }

    /// The open workflow gating a resource, if any
    pub fn current_workflow_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> ServiceResult<Option<Workflow>> {
        self.db
            .get_open_workflow_for_resource(resource_type, resource_id)
    }

    fn require_workflow(&self, workflow_id: &str) -> ServiceResult<Workflow> {
        self.db
            .get_workflow(workflow_id)?
            .ok_or_else(|| ServiceError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    /// Build one task per space member holding the step's role
    async fn fan_out(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
    ) -> ServiceResult<Vec<WorkflowTask>> {
        let limit = self.runtime_config.dynamic().timeouts.membership();
        let members = with_timeout(
            "membership lookup",
            limit,
            self.membership.members_of(&workflow.space_id),
        )
        .await
        .map_err(ServiceError::Membership)?;

        let now = Utc::now();
        let tasks: Vec<WorkflowTask> = members
            .iter()
            .filter(|m| m.has_role(&step.approver_role))
            .map(|m| WorkflowTask {
                id: Uuid::new_v4().to_string(),
                workflow_id: workflow.id.clone(),
                step_id: step.id.clone(),
                approver_id: m.user_id.clone(),
                status: TaskStatus::Processing,
                comment: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        if tasks.is_empty() {
            warn!(
                workflow_id = %workflow.id,
                step_id = %step.id,
                space_id = %workflow.space_id,
                role = %step.approver_role,
                "No space member holds the approver role; step cannot be decided"
            );
        }

        Ok(tasks)
    }
}
