//! No-op step used by tests and golden-path scaffolding

use async_trait::async_trait;

use super::{StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

pub struct Dummy;

#[async_trait]
impl StepExecutor for Dummy {
    fn step_type(&self) -> &'static str {
        "dummy"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        logs.write(&format!(
            "dummy step {} for {} ({})",
            ctx.step.name, ctx.app_name, ctx.env_type
        ))
        .await;
        for (key, value) in &ctx.step.variables {
            logs.write(&format!("  {key} = {value}")).await;
        }
        Ok(())
    }
}
