use metrics::{counter, histogram};

/// statsd-style emitter the import path reports through. Tags are
/// `key:value` strings, `rate` is the client-side sample rate.
pub trait StatsClient {
    fn count(&self, name: &str, delta: u64, tags: &[&str], rate: f64);
    fn timing(&self, name: &str, value_ns: f64, tags: &[&str], rate: f64);
}

/// Forwards to the `metrics` facade, and thus to whatever recorder is
/// installed (prometheus in production, nothing in tests).
///
/// Every call is recorded, sampling rates below 1.0 are not applied.
#[derive(Clone, Default)]
pub struct MetricsFacade;

impl StatsClient for MetricsFacade {
    fn count(&self, name: &str, delta: u64, tags: &[&str], _rate: f64) {
        counter!(name.to_owned(), &labels(tags)).increment(delta);
    }

    fn timing(&self, name: &str, value_ns: f64, tags: &[&str], _rate: f64) {
        histogram!(name.to_owned(), &labels(tags)).record(value_ns);
    }
}

fn labels(tags: &[&str]) -> Vec<(String, String)> {
    tags.iter()
        .map(|tag| match tag.split_once(':') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (tag.to_string(), String::new()),
        })
        .collect()
}
