//! Aggregates for the administrative dashboard.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConfidentialityAgreement;

/// Agreement counts grouped by status, creation day, device and browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementStatistics {
    pub since: Option<DateTime<Utc>>,
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_day: BTreeMap<NaiveDate, i64>,
    pub by_device: BTreeMap<String, i64>,
    pub by_browser: BTreeMap<String, i64>,
}

impl AgreementStatistics {
    /// Fold agreements into the grouped counts. Missing device/browser count as "unknown".
    pub fn tally<'a>(
        since: Option<DateTime<Utc>>,
        agreements: impl IntoIterator<Item = &'a ConfidentialityAgreement>,
    ) -> Self {
        let mut stats = Self {
            since,
            ..Self::default()
        };
        for agreement in agreements {
            stats.total += 1;
            *stats
                .by_status
                .entry(agreement.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_day
                .entry(agreement.created_utc.date_naive())
                .or_default() += 1;
            *stats
                .by_device
                .entry(agreement.device_type.clone().unwrap_or_else(|| "unknown".into()))
                .or_default() += 1;
            *stats
                .by_browser
                .entry(agreement.browser.clone().unwrap_or_else(|| "unknown".into()))
                .or_default() += 1;
        }
        stats
    }
}
