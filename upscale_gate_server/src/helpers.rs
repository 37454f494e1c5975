use std::{net::IpAddr, str::FromStr, sync::OnceLock};

use actix_web::{http::header::AUTHORIZATION, HttpRequest};
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, trace};
use rand::Rng;
use regex::Regex;

pub const INSTALL_ID_HEADER: &str = "X-Install-Id";
pub const INSTALL_ID_COOKIE: &str = "install_id";
const UNKNOWN_ADDRESS: &str = "unknown";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// The address a request came from, used as part of the rate-limit identity.
///
/// When `trust_proxy_headers` is set, the sources are, in decreasing order of preference:
/// 1. The first entry of the `X-Forwarded-For` header.
/// 2. The `X-Real-IP` header.
/// 3. The peer address from the connection info.
///
/// Otherwise only the peer address is used. If nothing usable is found, the literal `unknown` is returned, so all
/// such callers share one bucket.
pub fn client_address(req: &HttpRequest, trust_proxy_headers: bool) -> String {
    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok())
    };
    if trust_proxy_headers {
        trace!("Checking X-Forwarded-For and X-Real-IP headers");
        if let Some(ip) = header_ip("X-Forwarded-For").or_else(|| header_ip("X-Real-IP")) {
            debug!("Using proxy header for remote address: {ip}");
            return ip.to_string();
        }
    }
    req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn install_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").expect("install id pattern is valid"))
}

/// Installation ids are opaque, but they end up in storage keys and rate-limit identities, so only a conservative
/// character set is accepted.
pub fn is_valid_install_id(install_id: &str) -> bool {
    install_id_pattern().is_match(install_id)
}

/// The trimmed value of the installation id header, if present and non-blank.
pub fn install_id_from_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(INSTALL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn install_id_from_cookie(req: &HttpRequest) -> Option<String> {
    req.cookie(INSTALL_ID_COOKIE).map(|c| c.value().trim().to_string()).filter(|s| !s.is_empty())
}

pub fn new_install_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    format!("{id:032x}")
}

/// The token in an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Width and height from a PNG `IHDR` chunk.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || !bytes.starts_with(PNG_MAGIC) || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    (width > 0 && height > 0).then_some((width, height))
}

/// A decoded `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.trim().strip_prefix("data:")?;
        let (meta, payload) = rest.split_once(',')?;
        let mime = meta.strip_suffix(";base64")?.trim().to_ascii_lowercase();
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        Some(Self { mime, bytes })
    }

    pub fn encode(mime: &str, bytes: &[u8]) -> String {
        format!("data:{mime};base64,{}", STANDARD.encode(bytes))
    }
}
