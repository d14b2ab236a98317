//! Policy gate

use async_trait::async_trait;

use super::{process::run_command, StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

/// Runs the configured policy binary against the step's target; a
/// nonzero exit is a policy violation and fails the step.
pub struct PolicyCheck;

#[async_trait]
impl StepExecutor for PolicyCheck {
    fn step_type(&self) -> &'static str {
        "policy-check"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let target = ctx
            .step
            .playbook
            .as_deref()
            .or(ctx.step.path.as_deref())
            .unwrap_or(".");

        run_command(
            &ctx.config.policy_bin,
            &["check", target],
            Some(&ctx.workspace),
            logs,
        )
        .await
    }
}
