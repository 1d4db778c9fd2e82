//! Turns predicted gaps into an estimated next invocation time.

use invocation_structs::NextInvocation;

/// Estimates when `function_name` runs next.
///
/// Adds the first strictly positive predicted gap (seconds) to the time of the
/// most recent invocation. The estimate is `0` when there is no record or no
/// positive prediction.
#[must_use]
pub fn next_invocation(
    function_name: &str,
    last_invoked_at_ms: Option<i64>,
    predictions: &[f64],
) -> NextInvocation {
    let time_ms = last_invoked_at_ms
        .zip(predictions.iter().copied().find(|gap| gap.is_finite() && *gap > 0.0))
        .map_or(0, |(last, gap)| last.saturating_add((gap * 1000.0).round() as i64));

    NextInvocation {
        function_name: function_name.to_string(),
        time_ms,
    }
}
