//! HTTP vision service client.
//!
//! Posts the crop as a JPEG body and decodes the `objects` response. The
//! request carries a bounded timeout so a stalled service cannot hold results
//! back indefinitely.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

use super::{decode_response, Connectivity, RemoteAnalyzer};
use crate::detect::Detection;
use crate::frame::CropImage;

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;
const JPEG_QUALITY: u8 = 100;
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct HttpVisionService {
    agent: ureq::Agent,
    endpoint: Url,
    api_key: String,
}

impl HttpVisionService {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse remote endpoint url")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported remote scheme '{}'; expected http(s)",
                endpoint.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl RemoteAnalyzer for HttpVisionService {
    fn analyze(&self, image: &CropImage) -> Result<Vec<Detection>> {
        let body = encode_jpeg(image)?;
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Accept", "application/json")
            .set("Content-Type", "application/octet-stream")
            .set(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .send_bytes(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    anyhow!("remote service returned HTTP {}", code)
                }
                other => anyhow!("remote request failed: {}", other),
            })?;

        let mut raw = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
            .context("read analysis response")?;
        decode_response(&raw)
    }
}

/// Encode a crop as a JPEG request body.
pub fn encode_jpeg(image: &CropImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode(
            image.pixels(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .context("encode crop as jpeg")?;
    Ok(bytes)
}

/// Connectivity check that opens a TCP connection to the service host.
///
/// The answer is reused for `recheck` so an unreachable host costs at most one
/// resolve-and-connect per window on the detection worker.
pub struct EndpointProbe {
    host: String,
    port: u16,
    timeout: Duration,
    recheck: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl EndpointProbe {
    pub fn new(endpoint: &str, timeout: Duration, recheck: Duration) -> Result<Self> {
        let url = Url::parse(endpoint).context("parse remote endpoint url")?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("remote endpoint missing host"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("remote endpoint missing port"))?;
        Ok(Self {
            host,
            port,
            timeout,
            recheck,
            last: Mutex::new(None),
        })
    }

    fn connect(&self) -> bool {
        let Ok(mut addrs) = (self.host.as_str(), self.port).to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

impl Connectivity for EndpointProbe {
    fn is_available(&self) -> bool {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((checked_at, available)) = *last {
            if now.saturating_duration_since(checked_at) < self.recheck {
                return available;
            }
        }
        let available = self.connect();
        if !available {
            log::debug!("remote endpoint {}:{} unreachable", self.host, self.port);
        }
        *last = Some((now, available));
        available
    }
}
