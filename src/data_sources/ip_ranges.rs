//! `datadog_ip_ranges`: Datadog's published IP prefixes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::provider::{DataSource, ProviderConfiguration};
use crate::schema::{Attribute, AttributeType, ResourceData, Schema};

const IP_RANGES_ID: &str = "datadog-ip-ranges";

const PRODUCTS: &[(&str, &str)] = &[
    ("agents", "Agent"),
    ("api", "API"),
    ("apm", "APM"),
    ("logs", "Logs"),
    ("process", "Process"),
    ("synthetics", "Synthetics"),
    ("webhooks", "Webhooks"),
];

/// Prefixes of one product.
#[derive(Debug, Default, Deserialize)]
struct ProductRanges {
    #[serde(default)]
    prefixes_ipv4: Vec<String>,
    #[serde(default)]
    prefixes_ipv6: Vec<String>,
    #[serde(default)]
    prefixes_ipv4_by_location: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    prefixes_ipv6_by_location: BTreeMap<String, Vec<String>>,
}

impl ProductRanges {
    fn is_empty(&self) -> bool {
        self.prefixes_ipv4.is_empty()
            && self.prefixes_ipv6.is_empty()
            && self.prefixes_ipv4_by_location.is_empty()
            && self.prefixes_ipv6_by_location.is_empty()
    }
}

/// Datadog IP ranges lookup.
#[derive(Debug, Default)]
pub struct IpRangesDataSource;

/// The ip-ranges endpoint for an API URL: `api.` becomes `ip-ranges.`.
///
/// Hosts without the `api.` prefix (mock servers) are used as they are.
///
/// # Errors
///
/// Returns a validation error when `api_url` does not parse.
pub fn ip_ranges_url(api_url: &str) -> Result<String> {
    let mut url = Url::parse(api_url)
        .map_err(|e| ConfigError::validation(format!("invalid API URL {api_url}: {e}"), "api_url"))?;
    if let Some(rest) = url.host_str().and_then(|h| h.strip_prefix("api.")).map(str::to_string) {
        url.set_host(Some(&format!("ip-ranges.{rest}")))
            .map_err(|e| ConfigError::validation(format!("invalid ip-ranges host: {e}"), "api_url"))?;
    }
    url.set_path("/");
    Ok(url.to_string())
}

fn joined_by_location(prefixes: &BTreeMap<String, Vec<String>>) -> Value {
    let map: Map<String, Value> = prefixes
        .iter()
        .map(|(location, ips)| (location.clone(), json!(ips.join(","))))
        .collect();
    Value::Object(map)
}

#[async_trait]
impl DataSource for IpRangesDataSource {
    fn type_name(&self) -> &'static str {
        "datadog_ip_ranges"
    }

    fn schema(&self) -> Schema {
        let mut schema = Schema::v0()
            .describe("Use this data source to retrieve information about Datadog's IP addresses.");
        for (product, label) in PRODUCTS {
            for (version, record) in [("ipv4", "A"), ("ipv6", "AAAA")] {
                schema = schema.with_attribute(
                    &format!("{product}_{version}"),
                    Attribute::computed(AttributeType::string_list()).describe(format!(
                        "An Array of {} addresses in CIDR format specifying the {record} records for the {label} endpoint.",
                        version.to_uppercase().replace("IPV", "IPv")
                    )),
                );
            }
        }
        schema
            .with_attribute(
                "synthetics_ipv4_by_location",
                Attribute::computed(AttributeType::string_map())
                    .describe("A map of IPv4 prefixes (string of concatenated IPs, delimited by ',') by location."),
            )
            .with_attribute(
                "synthetics_ipv6_by_location",
                Attribute::computed(AttributeType::string_map())
                    .describe("A map of IPv6 prefixes (string of concatenated IPs, delimited by ',') by location."),
            )
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let url = ip_ranges_url(meta.client.base_url())?;
        let ranges: BTreeMap<String, Value> = meta.client.get_json(&url).await?;

        let mut any = false;
        for (product, _) in PRODUCTS {
            let product_ranges: ProductRanges = ranges
                .get(*product)
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            any |= !product_ranges.is_empty();

            data.set(&format!("{product}_ipv4"), json!(product_ranges.prefixes_ipv4));
            data.set(&format!("{product}_ipv6"), json!(product_ranges.prefixes_ipv6));
            if *product == "synthetics" {
                data.set(
                    "synthetics_ipv4_by_location",
                    joined_by_location(&product_ranges.prefixes_ipv4_by_location),
                );
                data.set(
                    "synthetics_ipv6_by_location",
                    joined_by_location(&product_ranges.prefixes_ipv6_by_location),
                );
            }
        }

        if any {
            data.set_id(IP_RANGES_ID);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    #[test]
    fn test_ip_ranges_url() {
        assert_eq!(
            ip_ranges_url("https://api.datadoghq.eu").unwrap(),
            "https://ip-ranges.datadoghq.eu/"
        );
        assert_eq!(
            ip_ranges_url("http://127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080/"
        );
    }

    #[tokio::test]
    async fn test_read_sets_prefixes() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url == "https://ip-ranges.datadoghq.com/")
            .times(1)
            .returning(|_| {
                Ok(ApiResponse::new(
                    200,
                    r#"{
                        "version": 1,
                        "agents": {"prefixes_ipv4": ["1.2.3.4/32"], "prefixes_ipv6": []},
                        "synthetics": {
                            "prefixes_ipv4": ["5.6.7.8/32"],
                            "prefixes_ipv4_by_location": {"aws:eu-central-1": ["5.6.7.8/32", "9.9.9.9/32"]}
                        }
                    }"#,
                ))
            });
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let mut data = ResourceData::new(json!({}));
        IpRangesDataSource.read(&meta, &mut data).await.unwrap();

        assert_eq!(data.id(), IP_RANGES_ID);
        assert_eq!(data.get_strings("agents_ipv4"), vec!["1.2.3.4/32"]);
        assert!(data.get_strings("logs_ipv4").is_empty());
        assert_eq!(
            data.get_str("synthetics_ipv4_by_location.aws:eu-central-1"),
            Some("5.6.7.8/32,9.9.9.9/32")
        );
    }

    #[test]
    fn test_schema_has_every_product() {
        let schema = IpRangesDataSource.schema();
        assert_eq!(schema.attributes.len(), PRODUCTS.len() * 2 + 2);
        assert!(schema.attribute("webhooks_ipv6").is_some());
    }
}
