//! Feature extractor crate for the invocation forecasting model.
//!
//! This crate turns raw invocation log records into model-ready samples. The
//! same stages run at training time (fitting the scaler and the function
//! encoding) and at inference time (applying the persisted ones):
//!
//! 1. decode the invocation time and fill missing init durations
//! 2. derive calendar features and per-function gaps between invocations
//! 3. drop rapid re-invocations
//! 4. one-hot encode the function and standardize the numeric columns
//!
//! Each stage takes its input by reference or value and returns a new value.

use std::borrow::Cow;

use chrono::{DateTime, Datelike, Timelike, Utc};
use config::PipelineConfig;
use invocation_structs::{ForecastError, InvocationRecord};
use serde::{Deserialize, Serialize};
use strum::{EnumCount, IntoEnumIterator};
use tracing::debug;

mod encoding;
mod scaler;
mod sequence;

pub use encoding::*;
pub use scaler::*;
pub use sequence::*;

/// Numeric columns standardized by the scaler, in scaler column order.
///
/// `TimeSinceLastInvocation` must stay first: it is the regression target and
/// inverse scaling of predictions reads column 0.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumIter,
    strum::EnumCount,
    strum::Display,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScaledFeature {
    TimeSinceLastInvocation,
    HourOfDay,
    DayOfWeek,
    InitDuration,
    Duration,
    MaxMemoryUsed,
    MemorySize,
}

/// Number of standardized columns.
pub const SCALED_FEATURE_COUNT: usize = ScaledFeature::COUNT;

/// Window inputs that are not standardized or one-hot: the weekend flag.
const UNSCALED_FEATURE_COUNT: usize = 1;

/// Names of the standardized columns, in scaler order.
#[must_use]
pub fn scaled_feature_names() -> Vec<String> {
    ScaledFeature::iter().map(|f| f.to_string()).collect()
}

/// An invocation with its time decoded and nullable measurements filled.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRecord {
    pub function_name: String,
    pub invoked_at: DateTime<Utc>,
    pub init_duration: f64,
    pub duration: f64,
    pub max_memory_used: f64,
    pub memory_size: f64,
}

/// A timed record with calendar features and the gap to its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    pub function_name: String,
    pub invoked_at: DateTime<Utc>,
    /// Seconds since the previous invocation of the same function.
    pub time_since_last_invocation: Option<f64>,
    pub hour_of_day: u32,
    /// Monday = 0 ... Sunday = 6.
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub init_duration: f64,
    pub duration: f64,
    pub max_memory_used: f64,
    pub memory_size: f64,
}

impl DerivedRow {
    /// Values of the standardized columns, in [`ScaledFeature`] order.
    #[must_use]
    pub fn scaled_values(&self) -> [Option<f64>; SCALED_FEATURE_COUNT] {
        [
            self.time_since_last_invocation,
            Some(f64::from(self.hour_of_day)),
            Some(f64::from(self.day_of_week)),
            Some(self.init_duration),
            Some(self.duration),
            Some(self.max_memory_used),
            Some(self.memory_size),
        ]
    }
}

/// One model-ready row.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredSample {
    pub function_name: String,
    pub invoked_at: DateTime<Utc>,
    /// Scaled `time_since_last_invocation`; the regression target proxy.
    pub target: Option<f32>,
    /// Window inputs, laid out as [`feature_column_names`].
    pub features: Vec<f32>,
}

/// Fitted state carried from training to inference.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Preprocessor {
    pub scaler: StandardScaler,
    pub encoding: FunctionEncoding,
}

impl Preprocessor {
    /// Fits the scaler and the function encoding on derived rows.
    ///
    /// # Errors
    ///
    /// Returns a schema error if there are no rows to fit on.
    pub fn fit(rows: &[DerivedRow]) -> Result<Self, ForecastError> {
        let values: Vec<[Option<f64>; SCALED_FEATURE_COUNT]> =
            rows.iter().map(DerivedRow::scaled_values).collect();
        let scaler = StandardScaler::fit(scaled_feature_names(), &values)?;
        let encoding = FunctionEncoding::fit(rows.iter().map(|r| r.function_name.as_str()));

        Ok(Self { scaler, encoding })
    }

    /// Reassembles a preprocessor from its persisted parts.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the scaler columns do not match [`ScaledFeature`].
    pub fn from_parts(
        scaler: StandardScaler,
        encoding: FunctionEncoding,
    ) -> Result<Self, ForecastError> {
        let expected = scaled_feature_names();
        if scaler.feature_names != expected {
            return Err(ForecastError::schema(format!(
                "scaler columns {:?} do not match {expected:?}",
                scaler.feature_names
            )));
        }
        Ok(Self { scaler, encoding })
    }

    /// Width of one window step.
    #[must_use]
    pub fn input_features(&self) -> usize {
        SCALED_FEATURE_COUNT - 1 + UNSCALED_FEATURE_COUNT + self.encoding.width()
    }

    /// Scales and encodes one derived row.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the scaler width does not match.
    pub fn transform_row(&self, row: &DerivedRow) -> Result<EngineeredSample, ForecastError> {
        let scaled = self.scaler.transform_row(&row.scaled_values())?;
        let value = |feature: ScaledFeature| scaled[feature as usize].unwrap_or(0.0) as f32;

        let mut features = Vec::with_capacity(self.input_features());
        features.push(value(ScaledFeature::HourOfDay));
        features.push(value(ScaledFeature::DayOfWeek));
        features.push(if row.is_weekend { 1.0 } else { 0.0 });
        features.push(value(ScaledFeature::InitDuration));
        features.push(value(ScaledFeature::Duration));
        features.push(value(ScaledFeature::MaxMemoryUsed));
        features.push(value(ScaledFeature::MemorySize));
        features.extend(self.encoding.encode(&row.function_name));

        Ok(EngineeredSample {
            function_name: row.function_name.clone(),
            invoked_at: row.invoked_at,
            target: scaled[ScaledFeature::TimeSinceLastInvocation as usize].map(|v| v as f32),
            features,
        })
    }

    /// Maps scaled predictions back to seconds.
    #[must_use]
    pub fn inverse_target(&self, predictions: &[f32]) -> Vec<f64> {
        let scaled: Vec<f64> = predictions.iter().copied().map(f64::from).collect();
        self.scaler.inverse_first_column(&scaled)
    }
}

/// Names of the window input columns, in order.
#[must_use]
pub fn feature_column_names(encoding: &FunctionEncoding) -> Vec<String> {
    let mut names: Vec<String> = [
        ScaledFeature::HourOfDay.as_ref(),
        ScaledFeature::DayOfWeek.as_ref(),
        "is_weekend",
        ScaledFeature::InitDuration.as_ref(),
        ScaledFeature::Duration.as_ref(),
        ScaledFeature::MaxMemoryUsed.as_ref(),
        ScaledFeature::MemorySize.as_ref(),
    ]
    .iter()
    .map(|name| (*name).to_string())
    .collect();
    names.extend(encoding.column_names());
    names
}

/// Decodes invocation times and fills missing init durations with zero.
///
/// # Errors
///
/// Returns a schema error if any record's invocation key cannot be decoded.
pub fn decode_records(records: &[InvocationRecord]) -> Result<Vec<TimedRecord>, ForecastError> {
    records
        .iter()
        .map(|record| {
            Ok(TimedRecord {
                function_name: record.function_name.clone(),
                invoked_at: record.invoked_at()?,
                init_duration: record.init_duration.unwrap_or(0.0),
                duration: record.duration,
                max_memory_used: record.max_memory_used,
                memory_size: record.memory_size,
            })
        })
        .collect()
}

/// Sorts by function and time, then derives calendar features and gaps.
///
/// The gap of the first invocation of each function is back-filled with the
/// next known gap of that function, and stays `None` for single-row functions.
#[must_use]
pub fn derive_features(mut records: Vec<TimedRecord>) -> Vec<DerivedRow> {
    records.sort_by(|a, b| {
        a.function_name
            .cmp(&b.function_name)
            .then(a.invoked_at.cmp(&b.invoked_at))
    });

    let mut rows = Vec::with_capacity(records.len());

    for group in records.chunk_by(|a, b| a.function_name == b.function_name) {
        let mut gaps: Vec<Option<f64>> = Vec::with_capacity(group.len());
        gaps.push(None);
        gaps.extend(
            group
                .windows(2)
                .map(|pair| Some(seconds_between(pair[0].invoked_at, pair[1].invoked_at))),
        );
        back_fill(&mut gaps);

        for (record, gap) in group.iter().zip(gaps) {
            let day_of_week = record.invoked_at.weekday().num_days_from_monday();
            rows.push(DerivedRow {
                function_name: record.function_name.clone(),
                invoked_at: record.invoked_at,
                time_since_last_invocation: gap,
                hour_of_day: record.invoked_at.hour(),
                day_of_week,
                is_weekend: day_of_week >= 5,
                init_duration: record.init_duration,
                duration: record.duration,
                max_memory_used: record.max_memory_used,
                memory_size: record.memory_size,
            });
        }
    }

    rows
}

/// Drops rows whose gap is below `min_gap_secs`; rows without a gap are kept.
#[must_use]
pub fn filter_rapid_invocations(rows: Vec<DerivedRow>, min_gap_secs: f64) -> Vec<DerivedRow> {
    let before = rows.len();
    let kept: Vec<DerivedRow> = rows
        .into_iter()
        .filter(|row| {
            row.time_since_last_invocation
                .is_none_or(|gap| gap >= min_gap_secs)
        })
        .collect();

    debug!(
        before,
        after = kept.len(),
        min_gap_secs,
        "Filtered rapid invocations"
    );
    kept
}

/// Runs decode, derivation and filtering.
///
/// # Errors
///
/// Returns a schema error if any record cannot be decoded.
pub fn prepare_rows(
    records: &[InvocationRecord],
    config: &PipelineConfig,
) -> Result<Vec<DerivedRow>, ForecastError> {
    let timed = decode_records(records)?;
    let derived = derive_features(timed);
    Ok(filter_rapid_invocations(
        derived,
        config.min_invocation_gap_secs,
    ))
}

/// Whether [`engineer`] fits new state or applies persisted state.
#[derive(Debug, Clone, Copy)]
pub enum EngineerMode<'a> {
    Fit,
    Transform(&'a Preprocessor),
}

/// Output of [`engineer`].
#[derive(Debug, Clone)]
pub struct Engineered<'a> {
    pub samples: Vec<EngineeredSample>,
    /// The fitted state (owned in fit mode, borrowed in transform mode).
    pub preprocessor: Cow<'a, Preprocessor>,
}

/// Runs the full feature pipeline.
///
/// Samples come out grouped by function and in time order.
///
/// # Errors
///
/// Returns a schema error if a record cannot be decoded, or if fit mode has
/// no rows left to fit on.
pub fn engineer<'a>(
    records: &[InvocationRecord],
    mode: EngineerMode<'a>,
    config: &PipelineConfig,
) -> Result<Engineered<'a>, ForecastError> {
    let rows = prepare_rows(records, config)?;

    let preprocessor = match mode {
        EngineerMode::Fit => Cow::Owned(Preprocessor::fit(&rows)?),
        EngineerMode::Transform(fitted) => Cow::Borrowed(fitted),
    };

    let samples = rows
        .iter()
        .map(|row| preprocessor.transform_row(row))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Engineered {
        samples,
        preprocessor,
    })
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

fn back_fill(values: &mut [Option<f64>]) {
    let mut next = None;
    for value in values.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => *value = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_MS: i64 = 1_700_000_000_000; // Tuesday 2023-11-14T22:13:20Z

    fn record(function_name: &str, offset_secs: i64) -> InvocationRecord {
        InvocationRecord {
            function_name: function_name.to_string(),
            last_invoked_at: format!("log-id#{}", BASE_MS + offset_secs * 1000),
            init_duration: Some(150.0),
            duration: 20.0 + offset_secs as f64 / 100.0,
            max_memory_used: 64.0,
            memory_size: 128.0,
            id: None,
            project_id: None,
            project_id_function_name: None,
            request_id: None,
            stream_name: None,
            function_arn: None,
            billed_duration: None,
            start_up_time: None,
        }
    }

    fn spaced(function_name: &str, count: usize, gap_secs: i64) -> Vec<InvocationRecord> {
        (0..count as i64)
            .map(|i| record(function_name, i * gap_secs))
            .collect()
    }

    #[test]
    fn test_scaled_feature_order() {
        assert_eq!(SCALED_FEATURE_COUNT, 7);
        assert_eq!(
            scaled_feature_names(),
            vec![
                "time_since_last_invocation",
                "hour_of_day",
                "day_of_week",
                "init_duration",
                "duration",
                "max_memory_used",
                "memory_size",
            ]
        );
    }

    #[test]
    fn test_missing_init_duration_becomes_zero() {
        let mut cold = record("a", 0);
        cold.init_duration = None;
        let timed = decode_records(&[cold]).expect("decode");
        assert!((timed[0].init_duration - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calendar_features() {
        let rows = derive_features(decode_records(&[record("a", 0)]).expect("decode"));
        assert_eq!(rows[0].hour_of_day, 22);
        assert_eq!(rows[0].day_of_week, 1);
        assert!(!rows[0].is_weekend);

        // Four days later is Saturday.
        let rows = derive_features(decode_records(&[record("a", 4 * 86_400)]).expect("decode"));
        assert_eq!(rows[0].day_of_week, 5);
        assert!(rows[0].is_weekend);
    }

    #[test]
    fn test_gaps_are_per_function_and_back_filled() {
        let mut records = vec![record("b", 0), record("a", 300), record("b", 120)];
        records.push(record("a", 100));
        records.push(record("b", 500));

        let rows = derive_features(decode_records(&records).expect("decode"));
        let a: Vec<_> = rows.iter().filter(|r| r.function_name == "a").collect();
        let b: Vec<_> = rows.iter().filter(|r| r.function_name == "b").collect();

        // First gap of each function equals its first real gap.
        assert_eq!(a[0].time_since_last_invocation, Some(200.0));
        assert_eq!(a[1].time_since_last_invocation, Some(200.0));
        assert_eq!(b[0].time_since_last_invocation, Some(120.0));
        assert_eq!(b[1].time_since_last_invocation, Some(120.0));
        assert_eq!(b[2].time_since_last_invocation, Some(380.0));

        // Output is grouped by function, ascending in time.
        assert_eq!(rows[0].function_name, "a");
        assert!(rows[0].invoked_at < rows[1].invoked_at);
    }

    #[test]
    fn test_single_row_gap_stays_missing() {
        let rows = derive_features(decode_records(&[record("solo", 0)]).expect("decode"));
        assert_eq!(rows[0].time_since_last_invocation, None);
    }

    #[test]
    fn test_filter_drops_short_gaps_keeps_missing() {
        let records = vec![
            record("a", 0),
            record("a", 30),
            record("a", 90),
            record("a", 150),
            record("solo", 0),
        ];
        let rows = derive_features(decode_records(&records).expect("decode"));
        let kept = filter_rapid_invocations(rows, 60.0);

        // a: gaps [30 (back-filled), 30, 60, 60] -> the two 30s are dropped.
        let gaps: Vec<_> = kept.iter().map(|r| r.time_since_last_invocation).collect();
        assert_eq!(gaps, vec![Some(60.0), Some(60.0), None]);
    }

    #[test]
    fn test_engineer_fit_shapes() {
        let mut records = spaced("a", 15, 120);
        records.extend(spaced("b", 15, 300));
        records.extend(spaced("c", 15, 90));

        let engineered =
            engineer(&records, EngineerMode::Fit, &PipelineConfig::default()).expect("engineer");

        assert_eq!(engineered.samples.len(), 45);
        assert_eq!(engineered.preprocessor.encoding.width(), 3);
        assert_eq!(engineered.preprocessor.input_features(), 10);
        assert_eq!(
            feature_column_names(&engineered.preprocessor.encoding).len(),
            engineered.preprocessor.input_features()
        );
        for sample in &engineered.samples {
            assert_eq!(sample.features.len(), 10);
            assert!(sample.target.is_some());
            assert!(sample.features.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_three_functions_fifteen_rows_make_fifteen_windows() {
        let mut records = spaced("a", 15, 120);
        records.extend(spaced("b", 15, 300));
        records.extend(spaced("c", 15, 90));

        let engineered =
            engineer(&records, EngineerMode::Fit, &PipelineConfig::default()).expect("engineer");
        let set = make_sequences(&engineered.samples, 10);

        assert_eq!(set.len(), 15);
        for function in ["a", "b", "c"] {
            let count = set
                .sequences
                .iter()
                .filter(|s| s.function_name == function)
                .count();
            assert_eq!(count, 5);
        }

        // Targets are the column-0 value of the row after each window.
        let a_samples: Vec<_> = engineered
            .samples
            .iter()
            .filter(|s| s.function_name == "a")
            .collect();
        let a_targets: Vec<f32> = set
            .sequences
            .iter()
            .filter(|s| s.function_name == "a")
            .map(|s| s.target)
            .collect();
        let expected: Vec<f32> = a_samples[10..]
            .iter()
            .map(|s| s.target.expect("present"))
            .collect();
        assert_eq!(a_targets, expected);
    }

    #[test]
    fn test_transform_applies_persisted_state() {
        let training = spaced("a", 20, 120);
        let fitted = engineer(&training, EngineerMode::Fit, &PipelineConfig::default())
            .expect("fit")
            .preprocessor
            .into_owned();

        let mut unseen = spaced("new", 12, 600);
        unseen[3].init_duration = None;
        let engineered = engineer(
            &unseen,
            EngineerMode::Transform(&fitted),
            &PipelineConfig::default(),
        )
        .expect("transform");

        assert!(matches!(engineered.preprocessor, Cow::Borrowed(_)));
        assert_eq!(engineered.samples.len(), 12);
        for sample in &engineered.samples {
            // Unseen function: the one-hot block is all zero.
            assert_eq!(sample.features[7..], [0.0]);
            assert!(sample.features.iter().all(|v| v.is_finite()));
        }

        // Transform reuses the training statistics instead of refitting.
        let seconds = fitted.inverse_target(&[engineered.samples[0].target.expect("present")]);
        assert!((seconds[0] - 600.0).abs() < 1e-2);
    }

    #[test]
    fn test_fit_on_empty_input_is_schema_error() {
        let result = engineer(&[], EngineerMode::Fit, &PipelineConfig::default());
        assert!(matches!(result, Err(ForecastError::Schema(_))));
    }

    #[test]
    fn test_bad_key_is_schema_error() {
        let mut bad = record("a", 0);
        bad.last_invoked_at = String::from("log-id#not-a-time");
        let result = engineer(&[bad], EngineerMode::Fit, &PipelineConfig::default());
        assert!(matches!(result, Err(ForecastError::Schema(_))));
    }

    #[test]
    fn test_from_parts_checks_scaler_columns() {
        let fitted = Preprocessor::fit(
            &derive_features(decode_records(&spaced("a", 3, 120)).expect("decode")),
        )
        .expect("fit");

        let mut wrong = fitted.scaler.clone();
        wrong.feature_names.reverse();
        assert!(Preprocessor::from_parts(wrong, fitted.encoding.clone()).is_err());
        assert!(Preprocessor::from_parts(fitted.scaler.clone(), fitted.encoding).is_ok());
    }
}
