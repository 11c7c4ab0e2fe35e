//! Delegation to externally supplied custom logic.

use super::{StageOutcome, StageServices};
use crate::pipeline::context::DataProcessingContext;
use crate::pipeline::Record;

/// Runs the registered handler over the batch. A missing handler or a
/// handler error is a stage-level fatal error.
pub(crate) async fn run_custom_logic(
    input: Vec<Record>,
    handler_id: &str,
    services: &StageServices,
    ctx: &DataProcessingContext,
) -> StageOutcome {
    let Some(handler) = services.custom_handler(handler_id) else {
        return StageOutcome::fatal(format!("custom handler '{handler_id}' not registered"));
    };

    match handler.process(input, ctx).await {
        Ok(output) => StageOutcome::passthrough(output),
        Err(e) => StageOutcome::fatal(format!("custom handler '{handler_id}' failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::super::CustomLogic;
    use super::*;
    use crate::errors::RecordflowError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    struct Tagger;

    #[async_trait]
    impl CustomLogic for Tagger {
        async fn process(
            &self,
            mut records: Vec<Record>,
            ctx: &DataProcessingContext,
        ) -> Result<Vec<Record>, RecordflowError> {
            for r in &mut records {
                r.insert("tenant".to_string(), Value::String(ctx.tenant_id.clone()));
            }
            Ok(records)
        }
    }

    struct Exploder;

    #[async_trait]
    impl CustomLogic for Exploder {
        async fn process(
            &self,
            _records: Vec<Record>,
            _ctx: &DataProcessingContext,
        ) -> Result<Vec<Record>, RecordflowError> {
            Err(RecordflowError::Internal("handler blew up".to_string()))
        }
    }

    #[tokio::test]
    async fn test_handler_transforms_batch() {
        let services = StageServices::default();
        services.register_custom_handler("tag", Arc::new(Tagger));
        let ctx = DataProcessingContext::new("acme", "p", "src");

        let outcome = run_custom_logic(vec![record(json!({}))], "tag", &services, &ctx).await;
        assert!(outcome.fatal.is_none());
        assert_eq!(outcome.output[0].get("tenant"), Some(&json!("acme")));
    }

    #[tokio::test]
    async fn test_handler_error_is_fatal() {
        let services = StageServices::default();
        services.register_custom_handler("boom", Arc::new(Exploder));
        let ctx = DataProcessingContext::new("t", "p", "s");

        let outcome = run_custom_logic(vec![], "boom", &services, &ctx).await;
        assert!(outcome.fatal.as_deref().unwrap().contains("blew up"));
    }

    #[tokio::test]
    async fn test_missing_handler_is_fatal() {
        let services = StageServices::default();
        let ctx = DataProcessingContext::new("t", "p", "s");

        let outcome = run_custom_logic(vec![], "ghost", &services, &ctx).await;
        assert!(outcome.fatal.as_deref().unwrap().contains("not registered"));
    }
}
