use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub(crate) fn prometheus_builder(addr: SocketAddr) -> Result<PrometheusBuilder, BuildError> {
    // Duration buckets
    let duration_matcher = Matcher::Suffix(String::from("duration"));
    let n_duration_buckets = 35;
    let mut duration_buckets = Vec::with_capacity(n_duration_buckets);
    // Minimum duration in seconds
    let mut value = 0.0001;
    for _ in 0..n_duration_buckets {
        // geometric sequence
        value *= 1.5;
        duration_buckets.push(value);
    }

    // Loss buckets, BCE is bounded by -ln(1e-7)
    let loss_matcher = Matcher::Suffix(String::from("loss"));
    let loss_buckets: Vec<f64> = (0..24).map(|x| 0.001 * 2.0_f64.powf(x as f64 / 2.0)).collect();

    // Prometheus handler
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(duration_matcher, &duration_buckets)?
        .set_buckets_for_metric(loss_matcher, &loss_buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_builder() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert!(prometheus_builder(addr).is_ok());
    }
}
