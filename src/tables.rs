//! Static lookup tables
//!
//! Identifiers are matched after ASCII case folding. The tables are plain
//! immutable data and can be shared freely between concurrent jobs.

use crate::types::{metric, SleepStage};

/// Raw record type identifier (case-folded) to canonical metric name
static METRIC_NAMES: &[(&str, &str)] = &[
    ("hkquantitytypeidentifierstepcount", metric::STEP_COUNT),
    ("hkquantitytypeidentifierheartrate", metric::HEART_RATE),
    (
        "hkquantitytypeidentifierheartratevariabilitysdnn",
        metric::HEART_RATE_VARIABILITY,
    ),
    ("hkcategorytypeidentifiersleepanalysis", metric::SLEEP_ANALYSIS),
    ("hkquantitytypeidentifierrestingheartrate", "resting-heart-rate"),
    (
        "hkquantitytypeidentifierwalkingheartrateaverage",
        "walking-heart-rate-average",
    ),
    ("hkquantitytypeidentifieractiveenergyburned", "active-energy"),
    ("hkquantitytypeidentifierbasalenergyburned", "basal-energy-burned"),
    (
        "hkquantitytypeidentifierdistancewalkingrunning",
        "walking-running-distance",
    ),
    ("hkquantitytypeidentifierflightsclimbed", "flights-climbed"),
    ("hkquantitytypeidentifierrespiratoryrate", "respiratory-rate"),
    ("hkquantitytypeidentifieroxygensaturation", "blood-oxygen-saturation"),
    ("hkquantitytypeidentifierbodymass", "weight-body-mass"),
    ("hkquantitytypeidentifiervo2max", "vo2-max"),
    ("hkquantitytypeidentifierappleexercisetime", "apple-exercise-time"),
    ("hkquantitytypeidentifierapplestandtime", "apple-stand-time"),
];

/// Categorical sleep value (case-folded) to sleep stage
static SLEEP_STAGES: &[(&str, SleepStage)] = &[
    ("hkcategoryvaluesleepanalysisasleepdeep", SleepStage::Deep),
    ("hkcategoryvaluesleepanalysisasleeprem", SleepStage::Rem),
    ("hkcategoryvaluesleepanalysisasleepcore", SleepStage::Core),
    ("hkcategoryvaluesleepanalysisawake", SleepStage::Awake),
    ("hkcategoryvaluesleepanalysisinbed", SleepStage::InBed),
    ("hkcategoryvaluesleepanalysisasleep", SleepStage::Asleep),
    ("hkcategoryvaluesleepanalysisasleepunspecified", SleepStage::Asleep),
];

/// Canonical metric name for a raw type identifier.
///
/// Unknown identifiers are kept as their own case-folded form.
pub fn metric_name(raw_type: &str) -> String {
    let folded = raw_type.to_ascii_lowercase();
    METRIC_NAMES
        .iter()
        .find(|(raw, _)| *raw == folded)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or(folded)
}

/// Sleep stage for a categorical value; unknown or absent values map to
/// [`SleepStage::Unknown`].
pub fn sleep_stage(raw_value: Option<&str>) -> SleepStage {
    let Some(raw) = raw_value else {
        return SleepStage::Unknown;
    };
    let folded = raw.to_ascii_lowercase();
    SLEEP_STAGES
        .iter()
        .find(|(value, _)| *value == folded)
        .map(|(_, stage)| *stage)
        .unwrap_or(SleepStage::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_ignore_case() {
        assert_eq!(metric_name("HKQuantityTypeIdentifierStepCount"), "step-count");
        assert_eq!(metric_name("hkquantitytypeidentifierheartrate"), "heart-rate");
        assert_eq!(
            metric_name("HKCategoryTypeIdentifierSleepAnalysis"),
            "sleep-analysis"
        );
    }

    #[test]
    fn test_unknown_type_passes_through_folded() {
        assert_eq!(
            metric_name("HKQuantityTypeIdentifierDietaryCaffeine"),
            "hkquantitytypeidentifierdietarycaffeine"
        );
    }

    #[test]
    fn test_sleep_stage_lookup() {
        assert_eq!(
            sleep_stage(Some("HKCategoryValueSleepAnalysisAsleepREM")),
            SleepStage::Rem
        );
        assert_eq!(
            sleep_stage(Some("HKCategoryValueSleepAnalysisInBed")),
            SleepStage::InBed
        );
        assert_eq!(sleep_stage(Some("SomethingNew")), SleepStage::Unknown);
        assert_eq!(sleep_stage(None), SleepStage::Unknown);
    }
}
