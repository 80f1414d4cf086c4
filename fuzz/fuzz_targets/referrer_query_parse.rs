#![no_main]

use libfuzzer_sys::fuzz_target;
use launch_startup::{
    build_tracking_url, parse_install_referrer, AttributionField, AttributionRecord,
    QueryKeyScheme, UTM_CONTENT_KEY,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let params = parse_install_referrer(&raw);
    assert!(!params.contains_key(""));

    let mut record = AttributionRecord::new();
    if let Some(content) = params.get(UTM_CONTENT_KEY) {
        record.set(AttributionField::UtmContent, content.as_str());
    }
    let url = build_tracking_url("https://track.test", &record, &QueryKeyScheme::default(), false);
    assert!(url.starts_with("https://track.test"));
    let pairs = url.split_once('?').map(|(_, query)| query.split('&').count()).unwrap_or(0);
    assert!(pairs <= 1);
});
