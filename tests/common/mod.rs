//! Common test utilities for tentacle integration tests

#![allow(dead_code)]

use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tentacle::{Invoker, UploadPart};
use tokio_util::sync::CancellationToken;

/// Deterministic pseudo-random content
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rngs::StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Hex SHA-256 digest
pub fn sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Mock origin: `HEAD` reports the size, `GET` answers ranges with `206`
pub struct RangeResponder {
    pub data: Vec<u8>,
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let total = self.data.len();
        if request.method.as_str() == "HEAD" {
            return wiremock::ResponseTemplate::new(200)
                .insert_header("Content-Length", total.to_string().as_str());
        }

        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

        match range {
            Some((start, end)) => wiremock::ResponseTemplate::new(206)
                .insert_header(
                    "Content-Range",
                    format!("bytes {start}-{end}/{total}").as_str(),
                )
                .set_body_bytes(self.data[start..=end].to_vec())
                // slow enough for readers to overtake the download
                .set_delay(std::time::Duration::from_millis(5)),
            None => wiremock::ResponseTemplate::new(200).set_body_bytes(self.data.clone()),
        }
    }
}

/// RPC sink that keeps every part it accepts
#[derive(Default)]
pub struct CollectingSink {
    pub parts: Mutex<Vec<UploadPart>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.parts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Invoker<UploadPart, ()> for CollectingSink {
    async fn invoke(
        &self,
        request: &UploadPart,
        _cancel: &CancellationToken,
    ) -> tentacle::Result<()> {
        self.parts.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Reassemble uploaded parts from several sinks by part index
pub fn reassemble(sinks: &[Arc<CollectingSink>]) -> (Vec<u8>, Vec<UploadPart>) {
    let mut parts: Vec<UploadPart> = sinks
        .iter()
        .flat_map(|s| s.parts.lock().unwrap().clone())
        .collect();
    parts.sort_by_key(|p| p.part_index);
    let bytes = parts.iter().flat_map(|p| p.bytes.clone()).collect();
    (bytes, parts)
}
