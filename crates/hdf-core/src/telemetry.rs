// SPDX-License-Identifier: Apache-2.0

// JSONL diagnostics on stdout when the `telemetry` feature is enabled.
// Manually formats JSON to avoid a non-deterministic serde_json dependency.
// Best-effort: I/O errors are ignored and timestamps fall back to 0.

#![allow(missing_docs)]

#[cfg(feature = "telemetry")]
fn ts_micros() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}

#[cfg(feature = "telemetry")]
#[allow(clippy::print_stdout)]
fn emit(event: &str, signature_fp: u64) {
    use std::io::Write as _;
    let mut out = std::io::stdout().lock();
    let _ = write!(
        out,
        r#"{{"timestamp_micros":{},"event":"{}","signature":"{:016x}"}}"#,
        ts_micros(),
        event,
        signature_fp
    );
    let _ = out.write_all(b"\n");
}

#[cfg(feature = "telemetry")]
pub(crate) fn cache_fast_hit(signature_fp: u64) {
    emit("cache_fast_hit", signature_fp);
}

#[cfg(not(feature = "telemetry"))]
#[inline]
pub(crate) fn cache_fast_hit(_signature_fp: u64) {}

#[cfg(feature = "telemetry")]
pub(crate) fn cache_hit(signature_fp: u64) {
    emit("cache_hit", signature_fp);
}

#[cfg(not(feature = "telemetry"))]
#[inline]
pub(crate) fn cache_hit(_signature_fp: u64) {}

#[cfg(feature = "telemetry")]
pub(crate) fn cache_miss(signature_fp: u64) {
    emit("cache_miss", signature_fp);
}

#[cfg(not(feature = "telemetry"))]
#[inline]
pub(crate) fn cache_miss(_signature_fp: u64) {}

#[cfg(feature = "telemetry")]
pub(crate) fn cache_evict(signature_fp: u64) {
    emit("cache_evict", signature_fp);
}

#[cfg(not(feature = "telemetry"))]
#[inline]
pub(crate) fn cache_evict(_signature_fp: u64) {}

#[cfg(feature = "telemetry")]
#[allow(clippy::print_stdout)]
pub(crate) fn mode_switch(from: &str, to: &str) {
    use std::io::Write as _;
    let mut out = std::io::stdout().lock();
    let _ = write!(
        out,
        r#"{{"timestamp_micros":{},"event":"mode_switch","from":"{}","to":"{}"}}"#,
        ts_micros(),
        from,
        to
    );
    let _ = out.write_all(b"\n");
}

#[cfg(not(feature = "telemetry"))]
#[inline]
pub(crate) fn mode_switch(_from: &str, _to: &str) {}
