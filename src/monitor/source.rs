//! Where utilization samples come from.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::Statistic;

/// One aggregate statistic over the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub statistic: Statistic,
    /// Pool name the statistic is aggregated over.
    pub dimension: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("invalid metric source url: {0}")]
    Url(#[from] url::ParseError),

    #[error("metric request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metric source returned status {0}")]
    Status(u16),
}

/// Produces the latest datapoint for a query. `Ok(None)` is a gap.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn sample(&self, query: &MetricQuery) -> Result<Option<f64>, MetricError>;
}

#[derive(Debug, Deserialize)]
struct Datapoint {
    value: Option<f64>,
}

/// Telemetry endpoint answering `GET {url}?namespace=..&metric=..&statistic=..&dimension=..`
/// with `{"value": <number|null>}`.
pub struct HttpMetricSource {
    base: Url,
    client: reqwest::Client,
}

impl HttpMetricSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MetricError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: Url::parse(url)?,
            client,
        })
    }

    fn query_url(&self, query: &MetricQuery) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("namespace", &query.namespace)
            .append_pair("metric", &query.metric_name)
            .append_pair("statistic", query.statistic.as_str())
            .append_pair("dimension", &query.dimension);
        url
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn sample(&self, query: &MetricQuery) -> Result<Option<f64>, MetricError> {
        let response = self.client.get(self.query_url(query)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetricError::Status(status.as_u16()));
        }
        let datapoint: Datapoint = response.json().await?;
        Ok(datapoint.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_carries_all_parameters() {
        let source = HttpMetricSource::new("http://telemetry.local/v1/stat", Duration::from_secs(1)).unwrap();
        let url = source.query_url(&MetricQuery {
            namespace: "AWS/EC2".into(),
            metric_name: "CPUUtilization".into(),
            statistic: Statistic::Average,
            dimension: "web-pool".into(),
        });
        assert_eq!(
            url.as_str(),
            "http://telemetry.local/v1/stat?namespace=AWS%2FEC2&metric=CPUUtilization&statistic=Average&dimension=web-pool"
        );
    }

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            HttpMetricSource::new("not a url", Duration::from_secs(1)),
            Err(MetricError::Url(_))
        ));
    }
}
