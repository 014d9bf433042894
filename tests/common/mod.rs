//! Common test utilities

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use nsrecruit::api::{NationStatesClient, RateLimitLedger};
use nsrecruit::config::{ApiConfig, DumpConfig, RateLimitConfig, RecruitmentConfig};
use wiremock::MockServer;

/// API path used by every mock server
pub const API_PATH: &str = "/cgi-bin/api.cgi";

/// API configuration with full telegram credentials
pub fn api_config() -> ApiConfig {
    ApiConfig {
        contact: "ops@example.org".to_string(),
        region_name: "Home Region".to_string(),
        client_key: Some("client-key".to_string()),
        telegram_id: Some("12345".to_string()),
        secret_key: Some("secret".to_string()),
        request_timeout_secs: 5,
        ..ApiConfig::default()
    }
}

/// Client pointed at the mock server with every interval disabled
#[allow(dead_code)]
pub fn test_client(server: &MockServer) -> NationStatesClient {
    NationStatesClient::new(&api_config(), &RateLimitConfig::default())
        .unwrap()
        .with_base_url(format!("{}{API_PATH}", server.uri()))
        .with_ledger(RateLimitLedger::unthrottled())
}

/// Dump configuration pointed at the mock server, without retries
#[allow(dead_code)]
pub fn dump_config(server: &MockServer) -> DumpConfig {
    DumpConfig {
        regions_url: format!("{}/pages/regions.xml.gz", server.uri()),
        nations_url: format!("{}/pages/nations.xml.gz", server.uri()),
        request_timeout_secs: 5,
        max_retries: 0,
        ..DumpConfig::default()
    }
}

/// Recruitment configuration: loops run one cycle per test, an idle send
/// loop retries every second
#[allow(dead_code)]
pub fn recruitment_config() -> RecruitmentConfig {
    RecruitmentConfig {
        enabled: true,
        criteria_check: true,
        min_pool_size: 5,
        batch_size: 2,
        ingestion_period_secs: 3_600,
        replenish_period_secs: 3_600,
        throttle_backoff_secs: 1,
        idle_retry_secs: 1,
        startup_timeout_secs: 5,
        shutdown_timeout_secs: 5,
        ..RecruitmentConfig::default()
    }
}

#[allow(dead_code)]
pub fn gzip(data: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Regions dump with `(name, members)` entries
#[allow(dead_code)]
pub fn regions_xml(regions: &[(&str, &[&str])]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<REGIONS>\n");
    for (name, members) in regions {
        xml.push_str(&format!(
            "<REGION><NAME>{name}</NAME><NUMNATIONS>{}</NUMNATIONS><NATIONS>{}</NATIONS><DELEGATE>0</DELEGATE></REGION>\n",
            members.len(),
            members.join(":")
        ));
    }
    xml.push_str("</REGIONS>\n");
    xml
}

/// Nations dump with `(name, region)` entries
#[allow(dead_code)]
pub fn nations_xml(nations: &[(&str, &str)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<NATIONS>\n");
    for (name, region) in nations {
        xml.push_str(&format!(
            "<NATION><NAME>{name}</NAME><TYPE>Republic</TYPE><REGION>{region}</REGION></NATION>\n"
        ));
    }
    xml.push_str("</NATIONS>\n");
    xml
}
