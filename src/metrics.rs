//! Prometheus counters, behind the `metrics` feature.
//!
//! Exposes delivered/acked/decode-failed record counts per stream so a
//! host process can register them on its own `/metrics` endpoint;
//! rendering and serving them is the host's job, not this crate's.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, opts, register_int_counter_vec};

lazy_static! {
    /// Records successfully decoded and dispatched to at least one handler.
    pub static ref RECORDS_DELIVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "eventbus_records_delivered_total",
            "Total number of stream records decoded and dispatched"
        ),
        &["stream"]
    )
    .expect("metric can be created");

    /// Records acked back to the store, regardless of decode outcome.
    pub static ref RECORDS_ACKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "eventbus_records_acked_total",
            "Total number of stream records acked"
        ),
        &["stream"]
    )
    .expect("metric can be created");

    /// Records that failed to decode and were dropped (still acked).
    pub static ref RECORDS_DECODE_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "eventbus_records_decode_failed_total",
            "Total number of stream records dropped due to decode failure"
        ),
        &["stream"]
    )
    .expect("metric can be created");
}

/// Renders every registered metric in Prometheus text exposition format.
pub fn render() -> Result<String, Box<dyn std::error::Error>> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
