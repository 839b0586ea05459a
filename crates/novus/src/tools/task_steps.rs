//! The checklist payload of `generate_task_steps` and its structural check.

use std::fmt::{self, Display};
use std::ops::RangeInclusive;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Number of steps a checklist must have.
pub const REQUIRED_STEPS: usize = 10;

/// Allowed word count of a step description.
pub const STEP_WORDS: RangeInclusive<usize> = 2..=4;

/// The state of a step as shown by the client.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Selected for execution.
    Enabled,
    /// Deselected by the user.
    Disabled,
    /// Being carried out.
    Executing,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Enabled => write!(f, "enabled"),
            TaskStatus::Disabled => write!(f, "disabled"),
            TaskStatus::Executing => write!(f, "executing"),
        }
    }
}

/// One step of a multi-step task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskStep {
    /// Short imperative description, such as "Book flights".
    #[schemars(description = "Short imperative step, 2 to 4 words.")]
    pub description: String,
    /// Initial status, always `enabled` when generated.
    #[schemars(description = "Always `enabled` when generating steps.")]
    pub status: TaskStatus,
}

/// A way a checklist breaks the confirmation rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// The list does not have exactly [`REQUIRED_STEPS`] steps.
    StepCount(usize),
    /// The step at this 1-based position has no text.
    EmptyDescription(usize),
    /// The step at this 1-based position has too few or too many words.
    WordCount {
        /// 1-based position of the step.
        position: usize,
        /// Words found.
        words: usize,
    },
    /// The step at this 1-based position is not `enabled`.
    Status {
        /// 1-based position of the step.
        position: usize,
        /// Status found.
        status: TaskStatus,
    },
}

impl Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::StepCount(count) => {
                write!(f, "expected {REQUIRED_STEPS} steps, got {count}")
            }
            Violation::EmptyDescription(position) => {
                write!(f, "step {position} has an empty description")
            }
            Violation::WordCount { position, words } => write!(
                f,
                "step {position} has {words} word(s), expected {} to {}",
                STEP_WORDS.start(),
                STEP_WORDS.end()
            ),
            Violation::Status { position, status } => {
                write!(f, "step {position} is `{status}`, expected `enabled`")
            }
        }
    }
}

/// Returns every way `steps` breaks the checklist rules, in step order.
pub fn check_task_steps(steps: &[TaskStep]) -> Vec<Violation> {
    let mut violations = vec![];
    if steps.len() != REQUIRED_STEPS {
        violations.push(Violation::StepCount(steps.len()));
    }
    for (idx, step) in steps.iter().enumerate() {
        let position = idx + 1;
        let words = step.description.split_whitespace().count();
        if words == 0 {
            violations.push(Violation::EmptyDescription(position));
        } else if !STEP_WORDS.contains(&words) {
            violations.push(Violation::WordCount { position, words });
        }
        if step.status != TaskStatus::Enabled {
            violations.push(Violation::Status {
                position,
                status: step.status,
            });
        }
    }
    violations
}

/// What to do with a checklist that breaks the rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskStepPolicy {
    /// Log the violations and hand the list to the client unchanged.
    #[default]
    Advisory,
    /// Reject the call so the model has to regenerate the list.
    Enforced,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(descriptions: &[&str]) -> Vec<TaskStep> {
        descriptions
            .iter()
            .map(|description| TaskStep {
                description: (*description).to_owned(),
                status: TaskStatus::Enabled,
            })
            .collect()
    }

    const LISBON_TRIP: [&str; 10] = [
        "Choose travel dates",
        "Book flights",
        "Reserve hotel",
        "Plan daily itinerary",
        "Book museum tickets",
        "Reserve dinner spots",
        "Arrange airport transfer",
        "Buy travel insurance",
        "Pack luggage",
        "Check passport validity",
    ];

    #[test]
    fn test_valid_checklist() {
        assert!(check_task_steps(&steps(&LISBON_TRIP)).is_empty());
    }

    #[test]
    fn test_violations() {
        let mut list = steps(&LISBON_TRIP[..9]);
        list[0].description = "Go".to_owned();
        list[1].description = "  ".to_owned();
        list[2].status = TaskStatus::Disabled;
        list[3].description = "Plan the whole daily itinerary".to_owned();

        let violations = check_task_steps(&list);
        assert_eq!(
            violations,
            [
                Violation::StepCount(9),
                Violation::WordCount {
                    position: 1,
                    words: 1
                },
                Violation::EmptyDescription(2),
                Violation::Status {
                    position: 3,
                    status: TaskStatus::Disabled
                },
                Violation::WordCount {
                    position: 4,
                    words: 5
                },
            ]
        );
        assert_eq!(violations[0].to_string(), "expected 10 steps, got 9");
        assert_eq!(
            violations[3].to_string(),
            "step 3 is `disabled`, expected `enabled`"
        );
    }

    #[test]
    fn test_status_wire_format() {
        let step: TaskStep = serde_json::from_str(
            r#"{"description": "Book flights", "status": "executing"}"#,
        )
        .unwrap();
        assert_eq!(step.status, TaskStatus::Executing);
        assert!(
            serde_json::from_str::<TaskStep>(
                r#"{"description": "Book flights", "status": "done"}"#
            )
            .is_err()
        );
    }
}
