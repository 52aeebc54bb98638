//! PowerDNS API provider
//!
//! Speaks the PowerDNS authoritative server's HTTP API. The builder fetches
//! the zone once and keeps an in-memory mirror of its A/AAAA rrsets; every
//! registry operation updates the mirror and pushes the resulting rrset
//! state as a PATCH. Owner names inside the API are fully qualified with a
//! trailing dot.

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::blocking::Client;
use reqwest::header;
use serde_derive::{Deserialize, Serialize};

use crate::ddns::protocol::Record;
use crate::ddns::registry::{Registry, RegistryError};

type Result<T> = std::result::Result<T, RegistryError>;

const MANAGED_TYPES: [&str; 2] = ["A", "AAAA"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RrEntry {
    content: String,
    #[serde(default)]
    disabled: bool,
}

/// One resource record set, as the PowerDNS API represents it. `ttl` must
/// be absent when `changetype` is `DELETE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RrSet {
    name: String,
    #[serde(rename = "type")]
    type_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changetype: Option<String>,
    #[serde(default)]
    records: Vec<RrEntry>,
}

#[derive(Debug, Serialize)]
struct PatchZone {
    rrsets: Vec<RrSet>,
}

#[derive(Debug, Deserialize)]
struct ZoneView {
    #[serde(default)]
    rrsets: Vec<RrSet>,
}

fn fqdn(canonical_name: &str) -> String {
    if canonical_name.ends_with('.') {
        canonical_name.to_string()
    } else {
        format!("{}.", canonical_name)
    }
}

fn replace_rrset(name: &str, type_field: &str, ttl: u32, values: &[String]) -> RrSet {
    RrSet {
        name: name.to_string(),
        type_field: type_field.to_string(),
        ttl: Some(ttl),
        changetype: Some("REPLACE".to_string()),
        records: values
            .iter()
            .map(|value| RrEntry {
                content: value.clone(),
                disabled: false,
            })
            .collect(),
    }
}

fn delete_rrset(name: &str, type_field: &str) -> RrSet {
    RrSet {
        name: name.to_string(),
        type_field: type_field.to_string(),
        ttl: None,
        changetype: Some("DELETE".to_string()),
        records: Vec::new(),
    }
}

/// Reduce a fetched zone to the rrsets this control plane manages.
fn snapshot_rrsets(view: ZoneView) -> HashMap<(String, String), (u32, Vec<String>)> {
    let mut rrsets = HashMap::new();
    for rrset in view.rrsets {
        if !MANAGED_TYPES.contains(&rrset.type_field.as_str()) {
            continue;
        }
        let values = rrset
            .records
            .iter()
            .filter(|entry| !entry.disabled)
            .map(|entry| entry.content.clone())
            .collect();
        rrsets.insert(
            (rrset.name.clone(), rrset.type_field.clone()),
            (rrset.ttl.unwrap_or(0), values),
        );
    }
    rrsets
}

pub struct PowerDnsRegistry {
    http: Client,
    zone_url: String,
    rrsets: Mutex<HashMap<(String, String), (u32, Vec<String>)>>,
}

impl PowerDnsRegistry {
    fn patch(&self, rrsets: Vec<RrSet>) -> Result<()> {
        if rrsets.is_empty() {
            return Ok(());
        }
        let response = self
            .http
            .patch(&self.zone_url)
            .json(&PatchZone { rrsets })
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(RegistryError::Api(format!(
                "PATCH {} failed ({}): {}",
                self.zone_url, status, body
            )));
        }
        Ok(())
    }
}

impl Registry for PowerDnsRegistry {
    fn append_record(&self, record: &Record) -> Result<()> {
        let name = fqdn(&record.canonical_name);
        let type_field = record.record_type.as_str();

        let rrset = {
            let mut rrsets = self
                .rrsets
                .lock()
                .map_err(|_| RegistryError::Api("rrset mirror lock poisoned".to_string()))?;
            let entry = rrsets
                .entry((name.clone(), type_field.to_string()))
                .or_insert_with(|| (record.ttl, Vec::new()));
            entry.0 = record.ttl;
            if !entry.1.contains(&record.value) {
                entry.1.push(record.value.clone());
            }
            replace_rrset(&name, type_field, entry.0, &entry.1)
        };

        self.patch(vec![rrset])
    }

    fn delete_record(&self, record: &Record) -> Result<()> {
        let name = fqdn(&record.canonical_name);
        let type_field = record.record_type.as_str();

        let rrset = {
            let mut rrsets = self
                .rrsets
                .lock()
                .map_err(|_| RegistryError::Api("rrset mirror lock poisoned".to_string()))?;
            let key = (name.clone(), type_field.to_string());
            match rrsets.get_mut(&key) {
                Some((ttl, values)) => {
                    values.retain(|value| value != &record.value);
                    if values.is_empty() {
                        rrsets.remove(&key);
                        delete_rrset(&name, type_field)
                    } else {
                        replace_rrset(&name, type_field, *ttl, values)
                    }
                }
                // Deleting a value the zone does not hold is a no-op.
                None => return Ok(()),
            }
        };

        self.patch(vec![rrset])
    }

    fn delete_all_for_name(&self, canonical_name: &str) -> Result<()> {
        let name = fqdn(canonical_name);

        {
            let mut rrsets = self
                .rrsets
                .lock()
                .map_err(|_| RegistryError::Api("rrset mirror lock poisoned".to_string()))?;
            for type_field in MANAGED_TYPES.iter() {
                rrsets.remove(&(name.clone(), type_field.to_string()));
            }
        }

        self.patch(
            MANAGED_TYPES
                .iter()
                .map(|type_field| delete_rrset(&name, type_field))
                .collect(),
        )
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Construct a PowerDNS registry from builder parameters: `api_url`,
/// `api_key`, `zone`, and optionally `server_id` (defaults to `localhost`).
pub fn build(params: &HashMap<String, String>) -> Result<Box<dyn Registry>> {
    let api_url = require(params, "api_url")?;
    let api_key = require(params, "api_key")?;
    let zone = require(params, "zone")?;
    let server_id = params
        .get("server_id")
        .map(|s| s.as_str())
        .unwrap_or("localhost");

    let mut headers = header::HeaderMap::new();
    let mut auth_header = header::HeaderValue::from_str(api_key)
        .map_err(|_| RegistryError::Api("api_key is not a valid header value".to_string()))?;
    auth_header.set_sensitive(true);
    headers.insert("X-API-Key", auth_header);
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    let http = Client::builder()
        .user_agent(concat!("vane/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()?;

    let zone_url = format!(
        "{}/api/v1/servers/{}/zones/{}",
        api_url.trim_end_matches('/'),
        server_id,
        zone
    );

    let response = http.get(&zone_url).send()?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(RegistryError::Api(format!(
            "fetching zone {} failed ({}): {}",
            zone_url, status, body
        )));
    }
    let view: ZoneView = response.json()?;

    Ok(Box::new(PowerDnsRegistry {
        http,
        zone_url,
        rrsets: Mutex::new(snapshot_rrsets(view)),
    }))
}

fn require<'a>(params: &'a HashMap<String, String>, key: &'static str) -> Result<&'a str> {
    match params.get(key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RegistryError::MissingParam("powerdns", key.to_string())),
    }
}
