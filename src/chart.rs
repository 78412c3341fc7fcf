use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::StatusSnapshot;
use crate::store::TrendChartRenderer;

/// Writes the snapshot series as a CSV data file that the dashboard plots.
pub struct CsvTrendChart {
    dir: PathBuf,
}

#[derive(Serialize)]
struct TrendRow {
    report_date: String,
    evaluated: u32,
    off_target: u32,
    off_target_percent: u32,
    minutes_target: u64,
    minutes_trained: u64,
}

impl CsvTrendChart {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, snapshots: &[StatusSnapshot]) -> anyhow::Result<PathBuf> {
        let latest = snapshots
            .iter()
            .map(|snapshot| snapshot.report_date)
            .max()
            .ok_or_else(|| anyhow::anyhow!("no snapshots to chart"))?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("trend-{latest}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;

        for snapshot in snapshots {
            writer.serialize(TrendRow {
                report_date: snapshot.report_date.to_string(),
                evaluated: snapshot.evaluated_count,
                off_target: snapshot.off_target_count,
                off_target_percent: snapshot.off_target_percent,
                minutes_target: snapshot.total_minutes_target,
                minutes_trained: snapshot.total_minutes_trained,
            })?;
        }
        writer.flush()?;

        Ok(std::fs::canonicalize(path)?)
    }
}

#[async_trait]
impl TrendChartRenderer for CsvTrendChart {
    async fn render_trend_chart(&self, snapshots: &[StatusSnapshot]) -> Result<String, StoreError> {
        let path = self
            .write(snapshots)
            .map_err(|err| StoreError::backend(format!("trend chart: {err:#}")))?;
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::date;

    fn point(day: u32, percent: u32) -> StatusSnapshot {
        StatusSnapshot {
            report_date: date(2018, 3, day),
            evaluated_count: 10,
            off_target_count: percent / 10,
            off_target_percent: percent,
            total_minutes_target: 400,
            total_minutes_trained: 250,
            off_target_participants: Vec::new(),
        }
    }

    #[tokio::test]
    async fn writes_one_row_per_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let chart = CsvTrendChart::new(dir.path().join("charts"));

        let url = chart
            .render_trend_chart(&[point(1, 40), point(8, 30)])
            .await
            .unwrap();

        assert!(url.starts_with("file://"));
        assert!(url.ends_with("trend-2018-03-08.csv"));
        let written =
            std::fs::read_to_string(dir.path().join("charts/trend-2018-03-08.csv")).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "report_date,evaluated,off_target,off_target_percent,minutes_target,minutes_trained"
        );
        assert_eq!(lines[2], "2018-03-08,10,3,30,400,250");
    }

    #[tokio::test]
    async fn empty_series_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let chart = CsvTrendChart::new(dir.path());
        let err = chart.render_trend_chart(&[]).await.unwrap_err();
        assert_eq!(err.status, 500);
    }
}
