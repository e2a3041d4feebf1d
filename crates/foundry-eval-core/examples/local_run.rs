use std::sync::Arc;
use std::time::Duration;

use foundry_eval_core::{
    from_async_fn, Category, DataSource, EvaluatorDescriptor, F1ScoreEvaluator, JsonlDataSource, LocalExecution,
    Orchestrator, RawScore, Record, Registry, SimilarityEvaluator, VecDataSource,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(
        EvaluatorDescriptor::new("similarity", Category::TextualSimilarity)
            .requires(&["response", "ground_truth"])
            .range(0.0, 1.0)
            .threshold(0.5),
        Arc::new(SimilarityEvaluator),
    )?;
    registry.register(
        EvaluatorDescriptor::new("f1_score", Category::TextualSimilarity)
            .requires(&["response", "ground_truth"])
            .range(0.0, 1.0)
            .threshold(0.5),
        Arc::new(F1ScoreEvaluator),
    )?;

    // A custom evaluator: counts polite markers, 1-5.
    registry.register(
        EvaluatorDescriptor::new("politeness", Category::GeneralPurpose).requires(&["response"]),
        from_async_fn("politeness", |record: &Record| {
            let text = record.get_str("response").unwrap_or_default().to_lowercase();
            async move {
                let hits = ["please", "sure", "thanks", "happy to"]
                    .iter()
                    .filter(|w| text.contains(*w))
                    .count();
                Ok(RawScore::new((1 + hits).min(5) as f64).with_reason(format!("{hits} polite markers")))
            }
        }),
    )?;

    // Inline records, or a JSONL file when a path is given.
    let source: Box<dyn DataSource> = match std::env::args().nth(1) {
        Some(path) => Box::new(JsonlDataSource::new(path)),
        None => Box::new(VecDataSource::new(vec![
            Record::from_value(json!({"response": "Sure, happy to help. Paris.", "ground_truth": "Paris"}))
                .unwrap_or_default(),
            Record::from_value(json!({"response": "No."})).unwrap_or_default(),
        ])),
    };
    let records = source.load().await?;

    let orchestrator = Orchestrator::builder()
        .registry(Arc::new(registry))
        .strategy(Arc::new(LocalExecution::new(Duration::from_secs(30))))
        .max_in_flight(4)
        .build()?;

    let result = orchestrator.evaluate(&records, &[]).await?;
    println!("{}", result.summary_table());
    Ok(())
}
