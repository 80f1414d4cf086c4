use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::attribution::{AttributionField, AttributionRecord};

const KEY_PREFIXES: [&str; 10] = [
    "neo", "tri", "vel", "syn", "gl", "pro", "ex", "hyper", "meta", "ultra",
];
const KEY_SYLLABLES: [&str; 20] = [
    "ra", "lo", "vi", "ka", "zu", "na", "mo", "ta", "ne", "ro", "li", "fa", "ze", "ki", "da",
    "so", "ma", "ti", "nu", "re",
];
const KEY_SUFFIXES: [&str; 10] = ["on", "ix", "ar", "us", "or", "ium", "ex", "os", "in", "en"];
const MIN_RANDOM_KEY_LEN: u64 = 4;
const MAX_RANDOM_KEY_LEN: u64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates tracking URL parameters in emission order.
pub enum TrackingParam {
    SubId1,
    AdId,
    PushToken,
    DeviceId,
    CampaignGroupNameRef,
    AdIdRef,
    AdObjectiveNameRef,
    AdgroupIdRef,
    AdgroupNameRef,
    CampaignIdRef,
    CampaignNameRef,
    CampaignGroupIdRef,
    AccountIdRef,
    IsInstagramRef,
    IsAnRef,
    PublisherPlatformRef,
    PlatformPositionRef,
    Naming,
}

impl TrackingParam {
    pub const ALL: [TrackingParam; 18] = [
        Self::SubId1,
        Self::AdId,
        Self::PushToken,
        Self::DeviceId,
        Self::CampaignGroupNameRef,
        Self::AdIdRef,
        Self::AdObjectiveNameRef,
        Self::AdgroupIdRef,
        Self::AdgroupNameRef,
        Self::CampaignIdRef,
        Self::CampaignNameRef,
        Self::CampaignGroupIdRef,
        Self::AccountIdRef,
        Self::IsInstagramRef,
        Self::IsAnRef,
        Self::PublisherPlatformRef,
        Self::PlatformPositionRef,
        Self::Naming,
    ];

    pub fn default_key(self) -> &'static str {
        match self {
            Self::SubId1 => "sub_id_1",
            Self::AdId => "ad_id",
            Self::PushToken => "push_token",
            Self::DeviceId => "deviceID",
            Self::CampaignGroupNameRef => "campaign_group_name_ref",
            Self::AdIdRef => "ad_id_ref",
            Self::AdObjectiveNameRef => "ad_objective_name_ref",
            Self::AdgroupIdRef => "adgroup_id_ref",
            Self::AdgroupNameRef => "adgroup_name_ref",
            Self::CampaignIdRef => "campaign_id_ref",
            Self::CampaignNameRef => "campaign_name_ref",
            Self::CampaignGroupIdRef => "campaign_group_id_ref",
            Self::AccountIdRef => "account_id_ref",
            Self::IsInstagramRef => "is_instagram_ref",
            Self::IsAnRef => "is_an_ref",
            Self::PublisherPlatformRef => "publisher_platform_ref",
            Self::PlatformPositionRef => "platform_position_ref",
            Self::Naming => "naming",
        }
    }
}

const REFERRER_PARAMS: [(TrackingParam, AttributionField); 12] = [
    (TrackingParam::AdIdRef, AttributionField::ReferrerAdId),
    (TrackingParam::AdObjectiveNameRef, AttributionField::ReferrerAdObjectiveName),
    (TrackingParam::AdgroupIdRef, AttributionField::ReferrerAdgroupId),
    (TrackingParam::AdgroupNameRef, AttributionField::ReferrerAdgroupName),
    (TrackingParam::CampaignIdRef, AttributionField::ReferrerCampaignId),
    (TrackingParam::CampaignNameRef, AttributionField::ReferrerCampaignName),
    (TrackingParam::CampaignGroupIdRef, AttributionField::ReferrerCampaignGroupId),
    (TrackingParam::AccountIdRef, AttributionField::ReferrerAccountId),
    (TrackingParam::IsInstagramRef, AttributionField::ReferrerIsInstagram),
    (TrackingParam::IsAnRef, AttributionField::ReferrerIsAn),
    (TrackingParam::PublisherPlatformRef, AttributionField::ReferrerPublisherPlatform),
    (TrackingParam::PlatformPositionRef, AttributionField::ReferrerPlatformPosition),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Literal query key used for each tracking parameter.
pub struct QueryKeyScheme {
    pub sub_id_1: String,
    pub ad_id: String,
    pub push_token: String,
    pub device_id: String,
    pub campaign_group_name_ref: String,
    pub ad_id_ref: String,
    pub ad_objective_name_ref: String,
    pub adgroup_id_ref: String,
    pub adgroup_name_ref: String,
    pub campaign_id_ref: String,
    pub campaign_name_ref: String,
    pub campaign_group_id_ref: String,
    pub account_id_ref: String,
    pub is_instagram_ref: String,
    pub is_an_ref: String,
    pub publisher_platform_ref: String,
    pub platform_position_ref: String,
    pub naming: String,
}

impl Default for QueryKeyScheme {
    fn default() -> Self {
        let mut scheme = Self {
            sub_id_1: String::new(),
            ad_id: String::new(),
            push_token: String::new(),
            device_id: String::new(),
            campaign_group_name_ref: String::new(),
            ad_id_ref: String::new(),
            ad_objective_name_ref: String::new(),
            adgroup_id_ref: String::new(),
            adgroup_name_ref: String::new(),
            campaign_id_ref: String::new(),
            campaign_name_ref: String::new(),
            campaign_group_id_ref: String::new(),
            account_id_ref: String::new(),
            is_instagram_ref: String::new(),
            is_an_ref: String::new(),
            publisher_platform_ref: String::new(),
            platform_position_ref: String::new(),
            naming: String::new(),
        };
        for param in TrackingParam::ALL {
            *scheme.key_mut(param) = param.default_key().to_string();
        }
        scheme
    }
}

impl QueryKeyScheme {
    pub fn key(&self, param: TrackingParam) -> &str {
        match param {
            TrackingParam::SubId1 => &self.sub_id_1,
            TrackingParam::AdId => &self.ad_id,
            TrackingParam::PushToken => &self.push_token,
            TrackingParam::DeviceId => &self.device_id,
            TrackingParam::CampaignGroupNameRef => &self.campaign_group_name_ref,
            TrackingParam::AdIdRef => &self.ad_id_ref,
            TrackingParam::AdObjectiveNameRef => &self.ad_objective_name_ref,
            TrackingParam::AdgroupIdRef => &self.adgroup_id_ref,
            TrackingParam::AdgroupNameRef => &self.adgroup_name_ref,
            TrackingParam::CampaignIdRef => &self.campaign_id_ref,
            TrackingParam::CampaignNameRef => &self.campaign_name_ref,
            TrackingParam::CampaignGroupIdRef => &self.campaign_group_id_ref,
            TrackingParam::AccountIdRef => &self.account_id_ref,
            TrackingParam::IsInstagramRef => &self.is_instagram_ref,
            TrackingParam::IsAnRef => &self.is_an_ref,
            TrackingParam::PublisherPlatformRef => &self.publisher_platform_ref,
            TrackingParam::PlatformPositionRef => &self.platform_position_ref,
            TrackingParam::Naming => &self.naming,
        }
    }

    fn key_mut(&mut self, param: TrackingParam) -> &mut String {
        match param {
            TrackingParam::SubId1 => &mut self.sub_id_1,
            TrackingParam::AdId => &mut self.ad_id,
            TrackingParam::PushToken => &mut self.push_token,
            TrackingParam::DeviceId => &mut self.device_id,
            TrackingParam::CampaignGroupNameRef => &mut self.campaign_group_name_ref,
            TrackingParam::AdIdRef => &mut self.ad_id_ref,
            TrackingParam::AdObjectiveNameRef => &mut self.ad_objective_name_ref,
            TrackingParam::AdgroupIdRef => &mut self.adgroup_id_ref,
            TrackingParam::AdgroupNameRef => &mut self.adgroup_name_ref,
            TrackingParam::CampaignIdRef => &mut self.campaign_id_ref,
            TrackingParam::CampaignNameRef => &mut self.campaign_name_ref,
            TrackingParam::CampaignGroupIdRef => &mut self.campaign_group_id_ref,
            TrackingParam::AccountIdRef => &mut self.account_id_ref,
            TrackingParam::IsInstagramRef => &mut self.is_instagram_ref,
            TrackingParam::IsAnRef => &mut self.is_an_ref,
            TrackingParam::PublisherPlatformRef => &mut self.publisher_platform_ref,
            TrackingParam::PlatformPositionRef => &mut self.platform_position_ref,
            TrackingParam::Naming => &mut self.naming,
        }
    }

    /// Generates unique syllable-based keys. The same seed yields the same scheme.
    pub fn randomized(seed: u64) -> Self {
        let mut mixer = KeyMixer::new(seed);
        let mut used = HashSet::new();
        let mut scheme = Self::default();
        for param in TrackingParam::ALL {
            let key = loop {
                let length = MIN_RANDOM_KEY_LEN + mixer.below(MAX_RANDOM_KEY_LEN - MIN_RANDOM_KEY_LEN + 1);
                let candidate = random_key(&mut mixer, length as usize);
                if used.insert(candidate.clone()) {
                    break candidate;
                }
            };
            *scheme.key_mut(param) = key;
        }
        scheme
    }

    /// One `default -> configured` line per parameter.
    pub fn describe(&self) -> String {
        TrackingParam::ALL
            .iter()
            .map(|param| format!("{} -> {}", param.default_key(), self.key(*param)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for param in TrackingParam::ALL {
            let key = self.key(param).trim();
            if key.is_empty() {
                return Err(format!("query key for '{}' cannot be empty", param.default_key()));
            }
            if !seen.insert(key) {
                return Err(format!("query key '{key}' is used more than once"));
            }
        }
        Ok(())
    }
}

/// Builds `domain?k1=v1&k2=v2…` from the record.
///
/// Parameters follow [`TrackingParam`] order and empty values are skipped. The
/// decoded referrer fields replace `naming` only when decoding is enabled and
/// the referrer was decoded. The campaign group name takes the `sub_id_1` key
/// when neither a deep link nor a campaign claimed it.
pub fn build_tracking_url(
    domain: &str,
    record: &AttributionRecord,
    keys: &QueryKeyScheme,
    decode_referrer: bool,
) -> String {
    let mut query = QueryBuilder::new(domain);
    let sub_id = record
        .get(AttributionField::DeepLink)
        .or_else(|| record.get(AttributionField::Campaign));
    query.push(keys.key(TrackingParam::SubId1), sub_id);
    query.push(
        keys.key(TrackingParam::AdId),
        record.get(AttributionField::AdvertisingId),
    );
    query.push(
        keys.key(TrackingParam::PushToken),
        record.get(AttributionField::PushToken),
    );
    query.push(
        keys.key(TrackingParam::DeviceId),
        record.get(AttributionField::DeviceId),
    );

    if decode_referrer && record.referrer_decoded() {
        let group_param = if sub_id.is_none() {
            TrackingParam::SubId1
        } else {
            TrackingParam::CampaignGroupNameRef
        };
        query.push(
            keys.key(group_param),
            record.get(AttributionField::ReferrerCampaignGroupName),
        );
        for (param, field) in REFERRER_PARAMS {
            query.push(keys.key(param), record.get(field));
        }
    } else {
        query.push(
            keys.key(TrackingParam::Naming),
            record.get(AttributionField::UtmContent),
        );
    }
    query.finish()
}

struct QueryBuilder {
    url: String,
    has_query: bool,
}

impl QueryBuilder {
    fn new(domain: &str) -> Self {
        let url = domain.trim().to_string();
        let has_query = url.contains('?');
        Self { url, has_query }
    }

    fn push(&mut self, key: &str, value: Option<&str>) {
        let Some(value) = value.filter(|value| !value.is_empty()) else {
            return;
        };
        if !self.has_query {
            self.url.push('?');
            self.has_query = true;
        } else if !self.url.ends_with('?') && !self.url.ends_with('&') {
            self.url.push('&');
        }
        self.url
            .extend(url::form_urlencoded::byte_serialize(key.as_bytes()));
        self.url.push('=');
        self.url
            .extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
    }

    fn finish(self) -> String {
        self.url
    }
}

struct KeyMixer(u64);

impl KeyMixer {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut mixed = self.0;
        mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        mixed ^ (mixed >> 31)
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }

    fn pick<'a>(&mut self, options: &[&'a str]) -> &'a str {
        options[self.below(options.len() as u64) as usize]
    }

    fn chance_percent(&mut self, percent: u64) -> bool {
        self.below(100) < percent
    }
}

fn random_key(mixer: &mut KeyMixer, length: usize) -> String {
    let mut key = String::new();
    if mixer.chance_percent(30) {
        key.push_str(mixer.pick(&KEY_PREFIXES));
    }
    while key.len() < length {
        let syllable = mixer.pick(&KEY_SYLLABLES);
        if key.len() + syllable.len() > length {
            break;
        }
        key.push_str(syllable);
    }
    if mixer.chance_percent(40) && key.len() < length + 4 {
        key.push_str(mixer.pick(&KEY_SUFFIXES));
    }
    while key.len() < length {
        key.push(char::from(b'a' + mixer.below(26) as u8));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::{build_tracking_url, QueryKeyScheme, TrackingParam};
    use crate::attribution::{AttributionField, AttributionRecord};
    use crate::referrer::ReferrerData;

    #[test]
    fn unit_no_fields_yields_bare_domain() {
        let url = build_tracking_url(
            "https://track.test",
            &AttributionRecord::new(),
            &QueryKeyScheme::default(),
            false,
        );
        assert_eq!(url, "https://track.test");
    }

    #[test]
    fn functional_parameters_follow_declared_order_and_skip_empty_values() {
        let mut record = AttributionRecord::new();
        record.set(AttributionField::DeviceId, "dev-9");
        record.set(AttributionField::PushToken, "abc");
        record.set(AttributionField::Campaign, "summer");
        record.set(AttributionField::UtmContent, "utm-1");

        let url = build_tracking_url(
            "https://track.test/go",
            &record,
            &QueryKeyScheme::default(),
            false,
        );
        assert_eq!(
            url,
            "https://track.test/go?sub_id_1=summer&push_token=abc&deviceID=dev-9&naming=utm-1"
        );
    }

    #[test]
    fn functional_deep_link_wins_over_campaign_for_sub_id() {
        let mut record = AttributionRecord::new();
        record.set(AttributionField::Campaign, "summer");
        record.set(AttributionField::DeepLink, "promo");
        let url = build_tracking_url("https://t.test", &record, &QueryKeyScheme::default(), false);
        assert_eq!(url, "https://t.test?sub_id_1=promo");
    }

    #[test]
    fn functional_decoded_referrer_replaces_naming() {
        let mut record = AttributionRecord::new();
        record.set(AttributionField::UtmContent, "utm-1");
        record.apply_referrer_data(&ReferrerData {
            campaign_group_name: Some("spring".to_string()),
            ad_id: Some("42".to_string()),
            is_an: Some("false".to_string()),
            ..ReferrerData::default()
        });

        let url = build_tracking_url("https://t.test", &record, &QueryKeyScheme::default(), true);
        assert_eq!(url, "https://t.test?sub_id_1=spring&ad_id_ref=42&is_an_ref=false");

        record.set(AttributionField::DeepLink, "promo");
        let url = build_tracking_url("https://t.test", &record, &QueryKeyScheme::default(), true);
        assert_eq!(
            url,
            "https://t.test?sub_id_1=promo&campaign_group_name_ref=spring&ad_id_ref=42&is_an_ref=false"
        );

        let url = build_tracking_url("https://t.test", &record, &QueryKeyScheme::default(), false);
        assert_eq!(url, "https://t.test?sub_id_1=promo&naming=utm-1");
    }

    #[test]
    fn regression_values_are_form_encoded_and_existing_query_is_extended() {
        let mut record = AttributionRecord::new();
        record.set(AttributionField::PushToken, "a b&c");
        let url = build_tracking_url(
            "https://t.test/?src=app",
            &record,
            &QueryKeyScheme::default(),
            false,
        );
        assert_eq!(url, "https://t.test/?src=app&push_token=a+b%26c");
    }

    #[test]
    fn functional_custom_keys_are_used_verbatim() {
        let mut keys = QueryKeyScheme::default();
        keys.push_token = "pt".to_string();
        let mut record = AttributionRecord::new();
        record.set(AttributionField::PushToken, "abc");
        let url = build_tracking_url("https://t.test", &record, &keys, false);
        assert_eq!(url, "https://t.test?pt=abc");
    }

    #[test]
    fn unit_randomized_scheme_is_deterministic_unique_and_valid() {
        let first = QueryKeyScheme::randomized(7);
        let second = QueryKeyScheme::randomized(7);
        assert_eq!(first, second);
        first.validate().expect("randomized keys are valid");
        for param in TrackingParam::ALL {
            let key = first.key(param);
            assert!(key.len() >= 4, "key '{key}' too short");
            assert!(key.chars().all(|c| c.is_ascii_lowercase()));
        }
        assert_ne!(first, QueryKeyScheme::randomized(8));
    }

    #[test]
    fn regression_duplicate_keys_fail_validation() {
        let mut keys = QueryKeyScheme::default();
        keys.naming = "ad_id".to_string();
        let error = keys.validate().expect_err("duplicate key");
        assert!(error.contains("ad_id"));
    }

    #[test]
    fn unit_describe_lists_every_parameter() {
        let description = QueryKeyScheme::default().describe();
        assert_eq!(description.lines().count(), TrackingParam::ALL.len());
        assert!(description.starts_with("sub_id_1 -> sub_id_1"));
    }
}
