use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Query key carrying the campaign naming payload in an install referrer.
pub const UTM_CONTENT_KEY: &str = "utm_content";

/// Splits a raw install-referrer string (`k=v&k2=v2`) into decoded pairs.
///
/// Segments without `=` are ignored. Only the first `=` separates key from
/// value; the first occurrence of a key wins.
pub fn parse_install_referrer(raw: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for segment in raw.trim().split('&') {
        if !segment.contains('=') {
            continue;
        }
        let Some((key, value)) = url::form_urlencoded::parse(segment.as_bytes()).next() else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
/// Decoded campaign metadata returned by the referrer decode endpoint.
pub struct ReferrerData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub ad_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ad_objective_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub adgroup_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub adgroup_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub campaign_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub campaign_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub campaign_group_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub campaign_group_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub account_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub is_instagram: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub is_an: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub publisher_platform: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub platform_position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReferrerDecodeResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
    #[serde(default)]
    data: Option<ReferrerData>,
}

/// Extracts `data` from a decode response; `None` when the body is not JSON or
/// carries no data object.
pub fn parse_referrer_response(raw: &str) -> Option<ReferrerData> {
    match serde_json::from_str::<ReferrerDecodeResponse>(raw) {
        Ok(response) => {
            if response.data.is_none() {
                tracing::warn!(
                    status = response.status.as_deref().unwrap_or_default(),
                    message = response.message.as_deref().unwrap_or_default(),
                    "referrer decode response carried no data"
                );
            }
            response.data
        }
        Err(error) => {
            tracing::warn!(error = %error, "failed to parse referrer decode response");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
/// Deep-link SDK credentials fetched before the deep-link adapter starts.
pub struct FacebookCredentials {
    #[serde(default, deserialize_with = "lenient_string")]
    pub fid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ftok: Option<String>,
}

/// Parses `{fid, ftok}`; `None` unless at least one field is non-empty.
pub fn parse_facebook_credentials(raw: &str) -> Option<FacebookCredentials> {
    let credentials = match serde_json::from_str::<FacebookCredentials>(raw) {
        Ok(credentials) => credentials,
        Err(error) => {
            tracing::warn!(error = %error, "failed to parse deep-link credentials");
            return None;
        }
    };
    if credentials.fid.is_none() && credentials.ftok.is_none() {
        tracing::warn!("deep-link credentials response had no fields");
        return None;
    }
    Some(credentials)
}

/// Removes `prefix` from a received deep link when present.
pub fn strip_deep_link_prefix(link: &str, prefix: &str) -> String {
    let link = link.trim();
    if prefix.is_empty() {
        return link.to_string();
    }
    link.strip_prefix(prefix).unwrap_or(link).to_string()
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}
