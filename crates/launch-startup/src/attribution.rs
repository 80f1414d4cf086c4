use std::collections::BTreeMap;

use crate::referrer::ReferrerData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Enumerates attribution values collected during startup.
pub enum AttributionField {
    AdvertisingId,
    PushToken,
    PushTokenError,
    DeepLink,
    DeepLinkError,
    Campaign,
    CampaignError,
    DeviceId,
    ReferrerRaw,
    UtmContent,
    ReferrerResponse,
    ReferrerError,
    FacebookCredentialsResponse,
    FacebookCredentialsError,
    ReferrerAdId,
    ReferrerAdObjectiveName,
    ReferrerAdgroupId,
    ReferrerAdgroupName,
    ReferrerCampaignId,
    ReferrerCampaignName,
    ReferrerCampaignGroupId,
    ReferrerCampaignGroupName,
    ReferrerAccountId,
    ReferrerIsInstagram,
    ReferrerIsAn,
    ReferrerPublisherPlatform,
    ReferrerPlatformPosition,
}

impl AttributionField {
    pub fn label(self) -> &'static str {
        match self {
            Self::AdvertisingId => "AD ID",
            Self::PushToken => "Push Token",
            Self::PushTokenError => "Push Token Failed",
            Self::DeepLink => "DeepLink",
            Self::DeepLinkError => "DeepLink Error",
            Self::Campaign => "Campaign",
            Self::CampaignError => "Campaign Error",
            Self::DeviceId => "Device ID",
            Self::ReferrerRaw => "Referrer Raw",
            Self::UtmContent => "UTM Content",
            Self::ReferrerResponse => "Server Response",
            Self::ReferrerError => "Referrer Error",
            Self::FacebookCredentialsResponse => "FB Data Response",
            Self::FacebookCredentialsError => "FB Data Error",
            Self::ReferrerAdId => "ad_id",
            Self::ReferrerAdObjectiveName => "ad_objective_name",
            Self::ReferrerAdgroupId => "adgroup_id",
            Self::ReferrerAdgroupName => "adgroup_name",
            Self::ReferrerCampaignId => "campaign_id",
            Self::ReferrerCampaignName => "campaign_name",
            Self::ReferrerCampaignGroupId => "campaign_group_id",
            Self::ReferrerCampaignGroupName => "campaign_group_name",
            Self::ReferrerAccountId => "account_id",
            Self::ReferrerIsInstagram => "is_instagram",
            Self::ReferrerIsAn => "is_an",
            Self::ReferrerPublisherPlatform => "publisher_platform",
            Self::ReferrerPlatformPosition => "platform_position",
        }
    }
}

/// Bag of attribution values. Fields are only ever added or replaced with a
/// non-empty value; nothing is removed once set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionRecord {
    fields: BTreeMap<AttributionField, String>,
    referrer_decoded: bool,
}

impl AttributionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` unless it is empty. Returns true when the record changed.
    pub fn set(&mut self, field: AttributionField, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.trim().is_empty() {
            return false;
        }
        match self.fields.get(&field) {
            Some(current) if *current == value => false,
            _ => {
                self.fields.insert(field, value);
                true
            }
        }
    }

    pub fn get(&self, field: AttributionField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn has(&self, field: AttributionField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttributionField, &str)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_str()))
    }

    pub fn referrer_decoded(&self) -> bool {
        self.referrer_decoded
    }

    /// Copies decoded referrer values into their `Referrer*` fields.
    pub fn apply_referrer_data(&mut self, data: &ReferrerData) {
        let pairs = [
            (AttributionField::ReferrerAdId, &data.ad_id),
            (AttributionField::ReferrerAdObjectiveName, &data.ad_objective_name),
            (AttributionField::ReferrerAdgroupId, &data.adgroup_id),
            (AttributionField::ReferrerAdgroupName, &data.adgroup_name),
            (AttributionField::ReferrerCampaignId, &data.campaign_id),
            (AttributionField::ReferrerCampaignName, &data.campaign_name),
            (AttributionField::ReferrerCampaignGroupId, &data.campaign_group_id),
            (AttributionField::ReferrerCampaignGroupName, &data.campaign_group_name),
            (AttributionField::ReferrerAccountId, &data.account_id),
            (AttributionField::ReferrerIsInstagram, &data.is_instagram),
            (AttributionField::ReferrerIsAn, &data.is_an),
            (AttributionField::ReferrerPublisherPlatform, &data.publisher_platform),
            (AttributionField::ReferrerPlatformPosition, &data.platform_position),
        ];
        for (field, value) in pairs {
            if let Some(value) = value {
                self.set(field, value.as_str());
            }
        }
        self.referrer_decoded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributionField, AttributionRecord};
    use crate::referrer::ReferrerData;

    #[test]
    fn unit_empty_values_never_clear_a_field() {
        let mut record = AttributionRecord::new();
        assert!(record.set(AttributionField::PushToken, "abc"));
        assert!(!record.set(AttributionField::PushToken, ""));
        assert!(!record.set(AttributionField::PushToken, "abc"));
        assert_eq!(record.get(AttributionField::PushToken), Some("abc"));
    }

    #[test]
    fn functional_referrer_data_populates_referrer_fields() {
        let mut record = AttributionRecord::new();
        record.apply_referrer_data(&ReferrerData {
            ad_id: Some("ad-1".to_string()),
            campaign_group_name: Some("spring".to_string()),
            ..ReferrerData::default()
        });
        assert!(record.referrer_decoded());
        assert_eq!(record.get(AttributionField::ReferrerAdId), Some("ad-1"));
        assert_eq!(
            record.get(AttributionField::ReferrerCampaignGroupName),
            Some("spring")
        );
        assert!(!record.has(AttributionField::ReferrerIsAn));
    }
}
