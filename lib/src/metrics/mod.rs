pub mod local_drain;

use std::cell::RefCell;

use crate::metrics::local_drain::LocalDrain;

thread_local! {
  pub static METRICS: RefCell<LocalDrain> = RefCell::new(LocalDrain::new("relay".to_string()));
}

#[derive(thiserror::Error, Debug)]
pub enum MetricError {
    #[error("Could not create histogram for time metric {time_metric:?}: {error}")]
    HistogramCreation {
        time_metric: MetricValue,
        error: String,
    },
    #[error("could not record time metric {time_metric:?}: {error}")]
    TimeMetricRecordingError {
        time_metric: MetricValue,
        error: String,
    },
    #[error("metric {key} is stored as {stored}, it can not be updated with {received:?}")]
    IncompatibleUpdate {
        key: String,
        stored: String,
        received: MetricValue,
    },
    #[error("no metrics found for {0}")]
    NoMetrics(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricValue {
    GaugeAdd(i64),
    Count(i64),
    Time(usize),
}

pub trait Subscriber {
    fn receive_metric(&mut self, key: &'static str, leg: Option<&str>, metric: MetricValue);
}

/// run a closure on the metrics of the current thread
pub fn with_local_drain<F, R>(f: F) -> R
where
    F: FnOnce(&mut LocalDrain) -> R,
{
    METRICS.with(|metrics| f(&mut metrics.borrow_mut()))
}

#[macro_export]
macro_rules! count (
  ($key:expr, $value: expr) => ({
    let v = $value;
    $crate::metrics::METRICS.with(|metrics| {
      use $crate::metrics::Subscriber;
      (*metrics.borrow_mut()).receive_metric($key, None, $crate::metrics::MetricValue::Count(v));
    });
  });
  ($key:expr, $value: expr, $leg: expr) => ({
    let v = $value;
    $crate::metrics::METRICS.with(|metrics| {
      use $crate::metrics::Subscriber;
      (*metrics.borrow_mut()).receive_metric($key, Some($leg), $crate::metrics::MetricValue::Count(v));
    });
  })
);

#[macro_export]
macro_rules! incr (
  ($key:expr) => ($crate::count!($key, 1));
  ($key:expr, $leg: expr) => ($crate::count!($key, 1, $leg));
);

#[macro_export]
macro_rules! gauge_add (
  ($key:expr, $value: expr) => ({
    let v = $value;
    $crate::metrics::METRICS.with(|metrics| {
      use $crate::metrics::Subscriber;
      (*metrics.borrow_mut()).receive_metric($key, None, $crate::metrics::MetricValue::GaugeAdd(v));
    });
  });
);

#[macro_export]
macro_rules! time (
  ($key:expr, $value: expr) => ({
    let v = $value;
    $crate::metrics::METRICS.with(|metrics| {
      use $crate::metrics::Subscriber;
      (*metrics.borrow_mut()).receive_metric($key, None, $crate::metrics::MetricValue::Time(v as usize));
    });
  });
);
