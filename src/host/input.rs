// src/host/input.rs
//! Input definition the host streams to stdin at startup.
//!
//! ```xml
//! <input>
//!   <server_host>idx01</server_host>
//!   <checkpoint_dir>/opt/host/var/lib/modinputs/socrata_feed</checkpoint_dir>
//!   <configuration>
//!     <stanza name="socrata_feed://traffic">
//!       <param name="url">https://data.example.gov/resource/traffic.json</param>
//!       <param name="date_field">incident_date</param>
//!       <param name="default_checkpoint_date">2016-01-01T00:00:00.000</param>
//!       <param name="limit">1000</param>
//!     </stanza>
//!   </configuration>
//! </input>
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::config::validate_sources;
use crate::ingest::types::{ConfigSource, NaiveTz, Source};

#[derive(Debug, Deserialize)]
struct InputXml {
    #[serde(default)]
    server_host: Option<String>,
    checkpoint_dir: String,
    #[serde(default)]
    configuration: ConfigurationXml,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigurationXml {
    #[serde(default, rename = "stanza")]
    stanzas: Vec<StanzaXml>,
}

#[derive(Debug, Deserialize)]
struct StanzaXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default, rename = "param")]
    params: Vec<ParamXml>,
}

#[derive(Debug, Deserialize)]
struct ParamXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text", default)]
    value: String,
}

impl StanzaXml {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.trim())
            .filter(|v| !v.is_empty())
    }

    fn into_source(self) -> Result<Source, String> {
        let required = |key: &str| {
            self.param(key)
                .map(str::to_string)
                .ok_or_else(|| format!("missing required param `{key}`"))
        };
        Ok(Source {
            url: required("url")?,
            order_field: required("date_field")?,
            default_checkpoint: required("default_checkpoint_date")?,
            limit: self.param("limit").and_then(|v| v.parse::<i64>().ok()),
            naive_tz: NaiveTz::Local,
            name: self.name,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HostInput {
    pub server_host: Option<String>,
    pub checkpoint_dir: PathBuf,
    pub sources: Vec<Source>,
}

impl ConfigSource for HostInput {
    fn list_sources(&self) -> Result<Vec<Source>> {
        validate_sources(self.sources.clone())
    }
}

/// Parse the input definition. Stanzas lacking a required param are logged
/// and dropped; the rest still run.
pub fn parse_input(xml: &str) -> Result<HostInput> {
    let doc: InputXml = from_str(xml).context("parsing host input definition")?;

    let mut sources = Vec::with_capacity(doc.configuration.stanzas.len());
    for stanza in doc.configuration.stanzas {
        let name = stanza.name.clone();
        match stanza.into_source() {
            Ok(s) => sources.push(s),
            Err(reason) => tracing::error!(stanza = %name, %reason, "skipping input stanza"),
        }
    }

    Ok(HostInput {
        server_host: doc.server_host,
        checkpoint_dir: PathBuf::from(doc.checkpoint_dir.trim()),
        sources,
    })
}

pub fn read_input<R: Read>(mut reader: R) -> Result<HostInput> {
    let mut buf = String::new();
    reader
        .read_to_string(&mut buf)
        .context("reading host input definition from stdin")?;
    parse_input(&buf)
}
