use std::time::Duration;

use crate::attribution::{AttributionField, AttributionRecord};
use crate::capabilities::CapabilitySet;
use crate::config::SubsystemToggles;
use crate::startup_state::StartupStateLog;

/// Snapshot rendered into the test-mode diagnostics report.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsInput<'a> {
    pub log: &'a StartupStateLog,
    pub expected: CapabilitySet,
    pub completed: CapabilitySet,
    pub first_run: bool,
    pub open_game: bool,
    pub timed_out_after: Option<Duration>,
    pub domain: &'a str,
    pub final_url: Option<&'a str>,
    pub toggles: &'a SubsystemToggles,
    pub decode_referrer: bool,
    pub record: &'a AttributionRecord,
}

pub fn render_diagnostics(input: &DiagnosticsInput<'_>) -> String {
    let mut lines = vec![
        "==== [Startup Status] ====".to_string(),
        format!("Completed State: {}", input.log.summary()),
        format!("Expected Flags: {}", input.expected),
        format!("Completed Flags: {}", input.completed),
        format!("Open First Time: {}", input.first_run),
        format!("Opened Game: {}", input.open_game),
        format!("Services Timeout: {}", input.timed_out_after.is_some()),
    ];
    if let Some(elapsed) = input.timed_out_after {
        lines.push(format!("Time Timeout: {:.1}s", elapsed.as_secs_f64()));
    }

    lines.push(String::new());
    lines.push("==== [Tracking Info] ====".to_string());
    lines.push(format!("Domain: {}", input.domain));
    lines.push(format!("Final URL: {}", input.final_url.unwrap_or("(not built)")));

    let record = input.record;
    let toggles = input.toggles;
    if toggles.install_referrer {
        section(&mut lines, "Install Referrer");
        field(&mut lines, record, "Raw Referrer", AttributionField::ReferrerRaw);
        field(&mut lines, record, "UTM Content", AttributionField::UtmContent);
        if input.decode_referrer {
            field(&mut lines, record, "Server Response", AttributionField::ReferrerResponse);
        }
        field(&mut lines, record, "Referrer Error", AttributionField::ReferrerError);
    }
    if toggles.appsflyer {
        section(&mut lines, "AppsFlyer");
        field(&mut lines, record, "Campaign", AttributionField::Campaign);
        field(&mut lines, record, "Campaign Error", AttributionField::CampaignError);
        field(&mut lines, record, "Device ID", AttributionField::DeviceId);
    }
    if toggles.facebook_deep_link {
        section(&mut lines, "Facebook");
        field(
            &mut lines,
            record,
            "FB Data Response",
            AttributionField::FacebookCredentialsResponse,
        );
        field(
            &mut lines,
            record,
            "FB Data Error",
            AttributionField::FacebookCredentialsError,
        );
        field(&mut lines, record, "DeepLink", AttributionField::DeepLink);
        field(&mut lines, record, "DeepLink Error", AttributionField::DeepLinkError);
    }
    if toggles.advertising_id {
        section(&mut lines, "AD");
        field(&mut lines, record, "AD ID", AttributionField::AdvertisingId);
    }
    if toggles.push {
        section(&mut lines, "Firebase");
        field(&mut lines, record, "Push Token", AttributionField::PushToken);
        field(&mut lines, record, "Push Token Failed", AttributionField::PushTokenError);
    }
    lines.join("\n")
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push(String::new());
    lines.push(format!("==== [{title}] ===="));
}

fn field(lines: &mut Vec<String>, record: &AttributionRecord, label: &str, field: AttributionField) {
    if let Some(value) = record.get(field) {
        lines.push(format!("{label}: {value}"));
    }
}
