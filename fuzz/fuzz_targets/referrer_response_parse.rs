#![no_main]

use libfuzzer_sys::fuzz_target;
use launch_startup::{
    parse_facebook_credentials, parse_referrer_response, AttributionRecord,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Some(referrer) = parse_referrer_response(&raw) {
        let mut record = AttributionRecord::new();
        record.apply_referrer_data(&referrer);
        assert!(record.referrer_decoded());
        assert!(record.iter().all(|(_, value)| !value.is_empty()));
    }
    if let Some(credentials) = parse_facebook_credentials(&raw) {
        assert!(credentials.fid.is_some() || credentials.ftok.is_some());
    }
});
