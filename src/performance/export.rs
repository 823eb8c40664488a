//! Metric export as JSON or CSV.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use super::error::PerformanceError;
use super::metric::PerformanceMetric;

pub const CSV_HEADER: &str = "timestamp,pageType,pageSlug,loadTime,cacheHit,brokerCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = PerformanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(PerformanceError::UnknownFormat(other.to_string())),
        }
    }
}

pub(crate) fn export(
    metrics: &[PerformanceMetric],
    format: ExportFormat,
) -> Result<String, PerformanceError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(metrics)?),
        ExportFormat::Csv => export_csv(metrics),
    }
}

fn export_csv(metrics: &[PerformanceMetric]) -> Result<String, PerformanceError> {
    let mut out = String::from(CSV_HEADER);
    for metric in metrics {
        out.push('\n');
        out.push_str(&format!(
            "{},{},{},{},{},{}",
            metric.timestamp.format(&Rfc3339)?,
            metric.page_type,
            metric.page_slug,
            metric.load_time,
            metric.cache_hit,
            metric.broker_count
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::page::PageType;

    fn sample() -> Vec<PerformanceMetric> {
        vec![
            PerformanceMetric {
                timestamp: datetime!(2026-03-01 12:00:00 UTC),
                page_type: PageType::Category,
                page_slug: "ecn-brokers".into(),
                load_time: 120.5,
                cache_hit: true,
                broker_count: 12,
                filters: Some(2),
                generation_time: None,
                is_preload: false,
                is_batch_preload: false,
            },
            PerformanceMetric {
                timestamp: datetime!(2026-03-01 12:00:01 UTC),
                page_type: PageType::Seo,
                page_slug: "best-brokers".into(),
                load_time: 800.0,
                cache_hit: false,
                broker_count: 30,
                filters: None,
                generation_time: Some(780.0),
                is_preload: true,
                is_batch_preload: true,
            },
        ]
    }

    #[test]
    fn json_export_parses_back_to_the_buffer() {
        let metrics = sample();
        let json = export(&metrics, ExportFormat::Json).unwrap();
        let parsed: Vec<PerformanceMetric> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metrics);
    }

    #[test]
    fn csv_export_has_header_and_one_row_per_metric() {
        let csv = export(&sample(), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "2026-03-01T12:00:00Z,category,ecn-brokers,120.5,true,12");
        assert_eq!(lines[2], "2026-03-01T12:00:01Z,seo,best-brokers,800,false,30");
    }

    #[test]
    fn empty_csv_is_just_the_header() {
        assert_eq!(export(&[], ExportFormat::Csv).unwrap(), CSV_HEADER);
        assert_eq!(export(&[], ExportFormat::Json).unwrap(), "[]");
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(PerformanceError::UnknownFormat(format)) if format == "xml"
        ));
    }
}
