use std::sync::LazyLock;
use std::time::Duration;

use prometheus::*;

use crate::error::PipelineError;
use crate::model::{ModelId, QueryKind, QueryResult};

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "poi_search_count",
        "count of per-model search pipelines",
        &["model", "kind", "status"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "poi_search_duration",
        "duration of the per-model search pipeline in seconds",
        &["model", "kind"]
    )
    .unwrap()
});

static METRIC_SEARCH_TOP_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "poi_search_top_score",
        "raw similarity of the best hit per pipeline",
        &["model", "kind"],
        (-10..=10).map(|x| x as f64 / 10.0).collect()
    )
    .unwrap()
});

fn kind_label(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Text => "text",
        QueryKind::Image => "image",
    }
}

/// 记录一条管线的执行情况
pub fn observe_search(
    model: ModelId,
    kind: QueryKind,
    duration: Duration,
    result: &std::result::Result<Vec<QueryResult>, PipelineError>,
) {
    let kind = kind_label(kind);
    let status = if result.is_ok() { "ok" } else { "error" };

    METRIC_SEARCH_COUNT.with_label_values(&[model.as_str(), kind, status]).inc();
    METRIC_SEARCH_DURATION
        .with_label_values(&[model.as_str(), kind])
        .observe(duration.as_secs_f64());

    if let Ok(results) = result {
        if let Some(best) = results.first() {
            METRIC_SEARCH_TOP_SCORE
                .with_label_values(&[model.as_str(), kind])
                .observe(best.raw_score as f64);
        }
    }
}
