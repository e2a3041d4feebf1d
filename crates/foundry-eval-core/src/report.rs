use foundry_eval_types::{CategoryReport, EvaluationOutcome, OutcomeKind, RunResult};

pub fn generate_html_report(result: &RunResult) -> String {
    let mut sections = String::new();
    for report in &result.categories {
        sections.push_str(&category_section(report, result.metadata.dataset_size));
    }

    let stats: Vec<_> = result.evaluator_stats().collect();
    let attempted: usize = stats.iter().map(|s| s.attempted).sum();
    let succeeded: usize = stats.iter().map(|s| s.succeeded).sum();
    let failed: usize = stats.iter().map(|s| s.failed).sum();
    let skipped: usize = stats.iter().map(|s| s.skipped).sum();
    let cancelled = if result.metadata.cancelled {
        r#"<div class="banner">Run was cancelled; unfinished calls are recorded as cancelled failures.</div>"#
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Foundry Evaluation Report</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        h1 {{ margin: 0 0 10px 0; color: #333; }}
        h2 {{ margin: 36px 0 8px 0; color: #343a40; }}
        .summary {{
            display: flex;
            gap: 20px;
            margin: 20px 0 10px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{ flex: 1; }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 5px;
        }}
        .summary-value {{ font-size: 28px; font-weight: 600; color: #333; }}
        .summary-value.good {{ color: #28a745; }}
        .summary-value.bad {{ color: #dc3545; }}
        .banner {{
            padding: 10px 14px;
            background: #fff3cd;
            color: #856404;
            border-radius: 4px;
            margin: 10px 0;
        }}
        table {{ width: 100%; border-collapse: collapse; margin-top: 12px; }}
        th {{
            background: #343a40;
            color: white;
            padding: 10px;
            text-align: left;
            font-weight: 600;
            font-size: 12px;
            text-transform: uppercase;
            letter-spacing: 0.5px;
        }}
        td {{ padding: 10px; border-bottom: 1px solid #dee2e6; vertical-align: top; }}
        tr:hover {{ background: #e9ecef; }}
        .rate.good {{ color: #28a745; font-weight: 600; }}
        .rate.warn {{ color: #b38600; font-weight: 600; }}
        .rate.bad {{ color: #dc3545; font-weight: 600; }}
        .badge {{
            display: inline-block;
            padding: 4px 8px;
            border-radius: 4px;
            font-size: 11px;
            font-weight: 600;
            white-space: nowrap;
        }}
        .badge.pass {{ background: #d4edda; color: #155724; }}
        .badge.fail {{ background: #f8d7da; color: #721c24; }}
        .badge.skipped {{ background: #e2e3e5; color: #383d41; }}
        .badge.error {{ background: #343a40; color: #f8d7da; }}
        .badge.unscored {{ background: #d1ecf1; color: #0c5460; }}
        .timestamp {{ color: #6c757d; font-size: 14px; margin-bottom: 20px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Foundry Evaluation Report</h1>
        <div class="timestamp">Started: {} &middot; Finished: {} &middot; Mode: {}</div>
        {}
        <div class="summary">
            <div class="summary-item">
                <div class="summary-label">Records</div>
                <div class="summary-value">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Evaluators</div>
                <div class="summary-value">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Succeeded</div>
                <div class="summary-value good">{} / {}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Failed calls</div>
                <div class="summary-value bad">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Skipped</div>
                <div class="summary-value">{}</div>
            </div>
        </div>
        {}
    </div>
</body>
</html>"#,
        result.metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        result.metadata.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        result.metadata.execution_mode,
        cancelled,
        result.metadata.dataset_size,
        result.metadata.evaluator_count,
        succeeded,
        attempted,
        failed,
        skipped,
        sections
    )
}

fn category_section(report: &CategoryReport, dataset_size: usize) -> String {
    let mut stats_rows = String::new();
    for s in &report.stats {
        let rate_class = if s.pass_rate >= 0.8 {
            "good"
        } else if s.pass_rate >= 0.5 {
            "warn"
        } else {
            "bad"
        };
        stats_rows.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class="rate {}">{:.1}%</td></tr>"#,
            html_escape(&s.evaluator),
            s.attempted,
            s.succeeded,
            s.passed,
            s.failed,
            s.skipped,
            rate_class,
            s.pass_rate * 100.0
        ));
    }

    let header: String = report
        .evaluators
        .iter()
        .map(|e| format!("<th>{}</th>", html_escape(e)))
        .collect();
    let mut grid_rows = String::new();
    for idx in 0..dataset_size {
        let cells: String = report
            .evaluators
            .iter()
            .map(|e| {
                let cell = report
                    .outcomes_for(e)
                    .find(|o| o.record_index == idx)
                    .map(outcome_badge)
                    .unwrap_or_default();
                format!("<td>{cell}</td>")
            })
            .collect();
        grid_rows.push_str(&format!("<tr><td>#{idx}</td>{cells}</tr>"));
    }

    format!(
        r#"
        <h2>{}</h2>
        <table>
            <thead>
                <tr><th>Evaluator</th><th>Attempted</th><th>Succeeded</th><th>Passed</th><th>Failed</th><th>Skipped</th><th>Pass Rate</th></tr>
            </thead>
            <tbody>{}</tbody>
        </table>
        <table>
            <thead><tr><th>Record</th>{}</tr></thead>
            <tbody>{}</tbody>
        </table>
        "#,
        html_escape(report.category.label()),
        stats_rows,
        header,
        grid_rows
    )
}

fn outcome_badge(outcome: &EvaluationOutcome) -> String {
    let (class, text) = match outcome.kind {
        OutcomeKind::Success => {
            let class = if outcome.passed == Some(true) { "pass" } else { "fail" };
            let score = outcome.score.as_ref().map(|s| s.to_string()).unwrap_or_default();
            (class, score)
        }
        OutcomeKind::SuccessWithoutScore => ("unscored", "no score".to_string()),
        OutcomeKind::Skipped => ("skipped", "skipped".to_string()),
        OutcomeKind::Failure => (
            "error",
            outcome
                .failure
                .as_ref()
                .map(|f| f.kind.to_string())
                .unwrap_or_else(|| "failure".to_string()),
        ),
    };
    format!(
        r#"<span class="badge {}" title="{}">{}</span>"#,
        class,
        html_escape(&outcome.explanation()),
        html_escape(&text)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foundry_eval_types::{
        Category, EvaluatorStats, ExecutionMode, FailureKind, FailureReason, RunMetadata, ScoreValue,
    };

    #[test]
    fn renders_every_category_and_escapes_reasons() {
        let outcomes = vec![
            EvaluationOutcome::success("coherence", 0, Some(ScoreValue::Scalar(4.0)), Some("<ok>".into()), true),
            EvaluationOutcome::failure("coherence", 1, FailureReason::new(FailureKind::Timeout, "slow")),
        ];
        let result = RunResult {
            metadata: RunMetadata {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                dataset_size: 2,
                execution_mode: ExecutionMode::Local,
                evaluator_count: 1,
                cancelled: true,
            },
            categories: vec![CategoryReport {
                category: Category::GeneralPurpose,
                evaluators: vec!["coherence".into()],
                stats: vec![EvaluatorStats {
                    evaluator: "coherence".into(),
                    category: Category::GeneralPurpose,
                    attempted: 2,
                    succeeded: 1,
                    passed: 1,
                    failed: 1,
                    skipped: 0,
                    pass_rate: 1.0,
                }],
                outcomes,
            }],
        };
        let html = generate_html_report(&result);
        assert!(html.contains("General Purpose"));
        assert!(html.contains("&lt;ok&gt;"));
        assert!(html.contains("badge error"));
        assert!(html.contains("Run was cancelled"));
    }
}
