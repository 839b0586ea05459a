//! Tools rendered by the client.
//!
//! None of these do anything in the backend besides decoding and checking
//! their arguments. The client performs the UI action and answers with a
//! result string, which becomes the tool output verbatim.

use novus_core::tool::{Error as ToolError, FrontendTool};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task_steps::{TaskStep, TaskStepPolicy, check_task_steps};

macro_rules! frontend_tool {
    (
        $(#[$meta:meta])*
        $tool:ident($input:ty) => $name:literal,
        $description:literal
    ) => {
        $(#[$meta])*
        pub struct $tool {
            parameter_schema: Value,
        }

        impl $tool {
            /// Creates the tool.
            #[inline]
            pub fn new() -> Self {
                Self {
                    parameter_schema: schema_for!($input).to_value(),
                }
            }
        }

        impl Default for $tool {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl FrontendTool for $tool {
            type Input = $input;

            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $description
            }

            fn parameter_schema(&self) -> &Value {
                &self.parameter_schema
            }
        }
    };
}

/// Arguments of `set_theme_color`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetThemeColorInput {
    /// The color to set.
    #[schemars(description = "The color to set (e.g., \"#6366f1\" or \"indigo\").")]
    pub theme_color: String,
}

frontend_tool! {
    /// Changes the theme color of the chat UI.
    SetThemeColorTool(SetThemeColorInput) => "set_theme_color",
    "Change the theme color of the chat UI."
}

/// Arguments of `add_proverb`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddProverbInput {
    /// The proverb text.
    #[schemars(description = "The proverb text to add.")]
    pub proverb: String,
}

frontend_tool! {
    /// Adds a proverb to the list shown by the chat UI.
    AddProverbTool(AddProverbInput) => "add_proverb",
    "Add a proverb to the chat UI list."
}

/// Arguments of `render_meeting_card`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MeetingCardInput {
    /// Meeting title.
    #[schemars(description = "The meeting subject/title.")]
    pub subject: String,
    /// ISO 8601 start time.
    #[schemars(description = "ISO datetime string for meeting start.")]
    pub start_time: String,
    /// ISO 8601 end time.
    #[schemars(description = "ISO datetime string for meeting end.")]
    pub end_time: String,
    /// Attendee emails.
    #[schemars(description = "Optional list of attendee emails.")]
    #[serde(default)]
    pub attendees: Option<Vec<String>>,
    /// Notes shown on the card.
    #[schemars(description = "Optional meeting description/notes.")]
    #[serde(default)]
    pub description: Option<String>,
}

frontend_tool! {
    /// Renders a meeting confirmation card.
    MeetingCardTool(MeetingCardInput) => "render_meeting_card",
    "Render a meeting card on the frontend with the provided details."
}

/// Arguments of `open_support_form`, which takes none.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct OpenSupportFormInput {}

frontend_tool! {
    /// Opens a blank customer support form.
    OpenSupportFormTool(OpenSupportFormInput) => "open_support_form",
    "Open and reset the customer support form on the frontend."
}

/// Category of a support request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SupportCategory {
    Billing,
    Technical,
    Account,
    Other,
}

/// Urgency of a support request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SupportUrgency {
    Low,
    Medium,
    High,
}

/// How the user wants to be contacted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ContactMethod {
    Email,
    Phone,
    Chat,
}

/// Arguments of `fill_support_form`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SupportFormInput {
    /// The user's full name.
    #[schemars(description = "The user's full name.")]
    pub full_name: String,
    /// The user's email address.
    #[schemars(description = "The user's email address.")]
    pub email: String,
    /// Short subject of the request.
    #[schemars(description = "Short subject for the support request.")]
    pub subject: String,
    /// Detailed description of the issue.
    #[schemars(description = "Detailed description of the issue.")]
    pub description: String,
    /// Request category.
    #[schemars(description = "One of billing, technical, account, other.")]
    #[serde(default)]
    pub category: Option<SupportCategory>,
    /// Request urgency.
    #[schemars(description = "One of low, medium, high.")]
    #[serde(default)]
    pub urgency: Option<SupportUrgency>,
    /// Preferred contact method.
    #[schemars(description = "One of email, phone, chat.")]
    #[serde(default)]
    pub contact_method: Option<ContactMethod>,
}

frontend_tool! {
    /// Fills the customer support form with finalized values.
    FillSupportFormTool(SupportFormInput) => "fill_support_form",
    "Fill the customer support form fields on the frontend."
}

/// Arguments of `generate_task_steps`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TaskStepsInput {
    /// The proposed checklist.
    #[schemars(
        description = "Exactly 10 short imperative steps, each with status `enabled`."
    )]
    pub steps: Vec<TaskStep>,
}

/// Renders a "Select Steps" checklist and waits for the user's selection.
pub struct TaskStepsTool {
    policy: TaskStepPolicy,
    parameter_schema: Value,
}

impl TaskStepsTool {
    /// Creates the tool with the given checklist policy.
    #[inline]
    pub fn new(policy: TaskStepPolicy) -> Self {
        Self {
            policy,
            parameter_schema: schema_for!(TaskStepsInput).to_value(),
        }
    }
}

impl FrontendTool for TaskStepsTool {
    type Input = TaskStepsInput;

    fn name(&self) -> &str {
        "generate_task_steps"
    }

    fn description(&self) -> &str {
        r#"
Render a 'Select Steps' UI with checkboxes.
The model MUST pass 10 short imperative steps in steps=[{description, status='enabled'},...].
The UI will let the user enable/disable and then respond with the selected steps."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn check(&self, input: &TaskStepsInput) -> Result<(), ToolError> {
        let violations = check_task_steps(&input.steps);
        if violations.is_empty() {
            return Ok(());
        }

        let summary = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        match self.policy {
            TaskStepPolicy::Advisory => {
                warn!("task steps passed through with issues: {summary}");
                Ok(())
            }
            TaskStepPolicy::Enforced => Err(ToolError::invalid_argument()
                .with_reason(format!("task steps rejected: {summary}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use novus_core::tool::{
        DeferredExecutor, DispatchContext, ErrorKind, Executor, PendingCalls,
        Registry,
    };
    use serde_json::json;

    use super::*;

    fn registry(policy: TaskStepPolicy) -> Registry {
        let mut registry = Registry::default();
        registry
            .register_frontend(TaskStepsTool::new(policy))
            .unwrap();
        registry
            .register_frontend(FillSupportFormTool::new())
            .unwrap();
        registry
    }

    fn steps_args(count: usize) -> Value {
        let steps: Vec<_> = (0..count)
            .map(|i| json!({ "description": format!("Do thing {i}"), "status": "enabled" }))
            .collect();
        json!({ "steps": steps })
    }

    async fn decode_and_check<T: FrontendTool>(
        tool: T,
        arguments: Value,
    ) -> (Arc<PendingCalls>, Result<(), ErrorKind>) {
        let pending = Arc::new(PendingCalls::default());
        let ctx = DispatchContext::new(Arc::clone(&pending));
        let executor = Arc::new(DeferredExecutor::new(tool));
        let fut = executor.execute("call_1".to_owned(), arguments, &ctx);
        // A rejected call never reaches the pending table and fails at once.
        if pending.is_empty() {
            let err = fut.await.unwrap_err();
            return (pending, Err(err.kind()));
        }
        (pending, Ok(()))
    }

    #[test]
    fn test_schema_keeps_declaration_order() {
        let registry = registry(TaskStepPolicy::Advisory);
        let spec = registry.lookup("fill_support_form").unwrap();
        let properties: Vec<_> = spec.parameters["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(
            properties,
            [
                "fullName",
                "email",
                "subject",
                "description",
                "category",
                "urgency",
                "contactMethod"
            ]
        );
    }

    #[tokio::test]
    async fn test_advisory_policy_passes_through() {
        let (pending, outcome) = decode_and_check(
            TaskStepsTool::new(TaskStepPolicy::Advisory),
            steps_args(7),
        ).await;
        assert_eq!(outcome, Ok(()));
        let requests = pending.requests();
        assert_eq!(requests[0].arguments, steps_args(7));
    }

    #[tokio::test]
    async fn test_enforced_policy_rejects() {
        let (_, outcome) = decode_and_check(
            TaskStepsTool::new(TaskStepPolicy::Enforced),
            steps_args(7),
        ).await;
        assert_eq!(outcome, Err(ErrorKind::InvalidArgument));

        let (_, outcome) = decode_and_check(
            TaskStepsTool::new(TaskStepPolicy::Enforced),
            steps_args(10),
        ).await;
        assert_eq!(outcome, Ok(()));
    }

    #[tokio::test]
    async fn test_support_form_rejects_unknown_category() {
        let (_, outcome) = decode_and_check(
            FillSupportFormTool::new(),
            json!({
                "fullName": "Ada Lovelace",
                "email": "ada@example.com",
                "subject": "Refund",
                "description": "Charged twice.",
                "category": "urgent",
            }),
        ).await;
        assert_eq!(outcome, Err(ErrorKind::InvalidArgument));

        let (_, outcome) = decode_and_check(
            FillSupportFormTool::new(),
            json!({
                "fullName": "Ada Lovelace",
                "email": "ada@example.com",
                "subject": "Refund",
                "description": "Charged twice.",
                "category": "billing",
                "contactMethod": "phone",
            }),
        ).await;
        assert_eq!(outcome, Ok(()));
    }

    #[tokio::test]
    async fn test_open_support_form_takes_no_arguments() {
        let (_, outcome) =
            decode_and_check(OpenSupportFormTool::new(), json!({})).await;
        assert_eq!(outcome, Ok(()));
    }
}
