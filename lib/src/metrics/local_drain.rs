//! A local drain to accumulate metrics in the reactor thread
//!
//! The metrics are stored following this hierarchy (pseudo-rust):
//!
//! ```plain
//! LocalDrain {
//!     proxy_metrics: MetricsMap {
//!         map: BTreeMap<metric_name, AggregatedMetric>
//!     },
//!     leg_metrics: BTreeMap<leg, MetricsMap {
//!         map: BTreeMap<metric_name, AggregatedMetric>
//!     }>
//! }
//! ```
use std::{collections::BTreeMap, fmt, time::Instant};

use hdrhistogram::Histogram;

use crate::metrics::{MetricError, MetricValue, Subscriber};

/// metrics as stored in the local drain
#[derive(Debug, Clone)]
pub enum AggregatedMetric {
    Gauge(usize),
    Count(i64),
    Time(Histogram<u32>),
}

impl AggregatedMetric {
    fn new(metric: MetricValue) -> Result<AggregatedMetric, MetricError> {
        match metric {
            MetricValue::GaugeAdd(value) => Ok(AggregatedMetric::Gauge(value.max(0) as usize)),
            MetricValue::Count(value) => Ok(AggregatedMetric::Count(value)),
            MetricValue::Time(value) => {
                let mut histogram = ::hdrhistogram::Histogram::new(3).map_err(|error| {
                    MetricError::HistogramCreation {
                        time_metric: metric.clone(),
                        error: error.to_string(),
                    }
                })?;

                histogram.record(value as u64).map_err(|error| {
                    MetricError::TimeMetricRecordingError {
                        time_metric: metric.clone(),
                        error: error.to_string(),
                    }
                })?;

                Ok(AggregatedMetric::Time(histogram))
            }
        }
    }

    fn update(&mut self, key: &str, m: MetricValue) -> Result<(), MetricError> {
        match (self, m) {
            (&mut AggregatedMetric::Gauge(ref mut v1), MetricValue::GaugeAdd(v2)) => {
                *v1 = (*v1 as i64 + v2).max(0) as usize;
            }
            (&mut AggregatedMetric::Count(ref mut v1), MetricValue::Count(v2)) => {
                *v1 += v2;
            }
            (&mut AggregatedMetric::Time(ref mut v1), MetricValue::Time(v2)) => {
                if let Err(e) = (*v1).record(v2 as u64) {
                    error!("could not record time metric: {:?}", e.to_string());
                }
            }
            (s, m) => {
                return Err(MetricError::IncompatibleUpdate {
                    key: key.to_owned(),
                    stored: format!("{s:?}"),
                    received: m,
                })
            }
        }
        Ok(())
    }

    pub fn to_filtered(&self) -> FilteredMetric {
        match *self {
            AggregatedMetric::Gauge(i) => FilteredMetric::Gauge(i as u64),
            AggregatedMetric::Count(i) => FilteredMetric::Count(i),
            AggregatedMetric::Time(ref hist) => {
                FilteredMetric::Percentiles(histogram_to_percentiles(hist))
            }
        }
    }
}

/// a metric as it is handed out of the drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilteredMetric {
    Gauge(u64),
    Count(i64),
    Percentiles(Percentiles),
}

impl fmt::Display for FilteredMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilteredMetric::Gauge(value) => write!(f, "{value}"),
            FilteredMetric::Count(value) => write!(f, "{value}"),
            FilteredMetric::Percentiles(p) => write!(
                f,
                "samples={} p50={} p90={} p99={} p100={}",
                p.samples, p.p_50, p.p_90, p.p_99, p.p_100
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Percentiles {
    pub samples: u64,
    pub p_50: u64,
    pub p_90: u64,
    pub p_99: u64,
    pub p_99_9: u64,
    pub p_100: u64,
}

pub fn histogram_to_percentiles(hist: &Histogram<u32>) -> Percentiles {
    Percentiles {
        samples: hist.len(),
        p_50: hist.value_at_percentile(50.0),
        p_90: hist.value_at_percentile(90.0),
        p_99: hist.value_at_percentile(99.0),
        p_99_9: hist.value_at_percentile(99.9),
        p_100: hist.value_at_percentile(100.0),
    }
}

/// a map of metric_name -> metric value
#[derive(Debug, Clone, Default)]
pub struct MetricsMap {
    map: BTreeMap<String, AggregatedMetric>,
}

impl MetricsMap {
    fn receive_metric(&mut self, metric_name: &str, metric: MetricValue) -> Result<(), MetricError> {
        match self.map.get_mut(metric_name) {
            Some(stored_metric) => stored_metric.update(metric_name, metric),
            None => {
                let aggregated_metric = AggregatedMetric::new(metric)?;
                self.map.insert(metric_name.to_owned(), aggregated_metric);
                Ok(())
            }
        }
    }

    /// convert to filtered metrics, keeping only the given names if any
    fn to_filtered_metrics(&self, filter_by_names: &[String]) -> BTreeMap<String, FilteredMetric> {
        self.map
            .iter()
            .filter(|(name, _)| filter_by_names.is_empty() || filter_by_names.contains(name))
            .map(|(name, metric)| (name.to_owned(), metric.to_filtered()))
            .collect()
    }

    fn metric_names(&self) -> Vec<String> {
        self.map.keys().map(|k| k.to_owned()).collect()
    }
}

/// This gathers metrics locally, to be dumped in the logs or queried by tests
#[derive(Debug)]
pub struct LocalDrain {
    /// a prefix to metric keys, usually "relay"
    pub prefix: String,
    pub created: Instant,
    /// metrics of the whole reactor (metric_name -> metric value)
    pub proxy_metrics: MetricsMap,
    /// leg name -> metrics of that side of the relay
    leg_metrics: BTreeMap<String, MetricsMap>,
}

impl LocalDrain {
    pub fn new(prefix: String) -> Self {
        LocalDrain {
            prefix,
            created: Instant::now(),
            proxy_metrics: MetricsMap::default(),
            leg_metrics: BTreeMap::new(),
        }
    }

    pub fn dump_proxy_metrics(&self, metric_names: &[String]) -> BTreeMap<String, FilteredMetric> {
        self.proxy_metrics.to_filtered_metrics(metric_names)
    }

    pub fn metrics_of_one_leg(
        &self,
        leg: &str,
        metric_names: &[String],
    ) -> Result<BTreeMap<String, FilteredMetric>, MetricError> {
        self.leg_metrics
            .get(leg)
            .map(|metrics| metrics.to_filtered_metrics(metric_names))
            .ok_or_else(|| MetricError::NoMetrics(leg.to_owned()))
    }

    pub fn list_all_metric_names(&self) -> Vec<String> {
        let mut names = self.proxy_metrics.metric_names();
        for metrics in self.leg_metrics.values() {
            names.extend(metrics.metric_names());
        }
        names.sort();
        names.dedup();
        names
    }

    /// proxy-wide value of a counter, 0 when it was never incremented
    pub fn count(&self, metric_name: &str) -> i64 {
        match self.proxy_metrics.map.get(metric_name) {
            Some(AggregatedMetric::Count(value)) => *value,
            _ => 0,
        }
    }

    fn receive_leg_metric(
        &mut self,
        metric_name: &str,
        leg: &str,
        metric: MetricValue,
    ) -> Result<(), MetricError> {
        self.leg_metrics
            .entry(leg.to_owned())
            .or_default()
            .receive_metric(metric_name, metric)
    }
}

impl Subscriber for LocalDrain {
    fn receive_metric(&mut self, key: &'static str, leg: Option<&str>, metric: MetricValue) {
        trace!(
            "receiving metric with key {}, leg: {:?}, metric data: {:?}",
            key,
            leg,
            metric
        );

        let receive_result = match leg {
            Some(leg) => self
                .receive_leg_metric(key, leg, metric.clone())
                .and_then(|()| self.proxy_metrics.receive_metric(key, metric)),
            None => self.proxy_metrics.receive_metric(key, metric),
        };

        if let Err(e) = receive_result {
            error!("Could not receive metric: {}", e.to_string());
        }
    }
}

impl fmt::Display for LocalDrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} metrics after {:?}:",
            self.prefix,
            self.created.elapsed()
        )?;
        for (name, metric) in self.dump_proxy_metrics(&[]) {
            write!(f, " {name}={metric}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_and_yield_leg_metrics() {
        let mut local_drain = LocalDrain::new("prefix".to_string());

        local_drain.receive_metric("shutdowns", Some("origin"), MetricValue::Count(1));
        local_drain.receive_metric("shutdowns", Some("origin"), MetricValue::Count(1));
        local_drain.receive_metric("shutdowns", Some("client"), MetricValue::Count(1));

        let mut expected_metrics = BTreeMap::new();
        expected_metrics.insert("shutdowns".to_string(), FilteredMetric::Count(2));

        assert_eq!(
            expected_metrics,
            local_drain
                .metrics_of_one_leg("origin", &["shutdowns".to_string()])
                .expect("could not query metrics for this leg")
        );
        // leg metrics are also aggregated at the proxy level
        assert_eq!(local_drain.count("shutdowns"), 3);
    }

    #[test]
    fn receive_and_yield_proxy_metrics() {
        let mut local_drain = LocalDrain::new("prefix".to_string());
        local_drain.receive_metric("tasks", None, MetricValue::GaugeAdd(1));
        local_drain.receive_metric("tasks", None, MetricValue::GaugeAdd(1));
        local_drain.receive_metric("tasks", None, MetricValue::GaugeAdd(-1));
        local_drain.receive_metric("response_time", None, MetricValue::Time(10));
        local_drain.receive_metric("response_time", None, MetricValue::Time(30));

        let metrics = local_drain.dump_proxy_metrics(&[]);
        assert_eq!(metrics.get("tasks"), Some(&FilteredMetric::Gauge(1)));
        match metrics.get("response_time") {
            Some(FilteredMetric::Percentiles(p)) => assert_eq!(p.samples, 2),
            other => panic!("unexpected time metric {other:?}"),
        }
        assert!(local_drain.metrics_of_one_leg("client", &[]).is_err());
    }

    #[test]
    fn incompatible_update_is_refused() {
        let mut metrics = MetricsMap::default();
        metrics
            .receive_metric("bytes", MetricValue::Count(1))
            .expect("first metric");
        assert!(metrics
            .receive_metric("bytes", MetricValue::Time(1))
            .is_err());
    }
}
