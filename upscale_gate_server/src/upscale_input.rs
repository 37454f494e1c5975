//! Reading an upscale request out of the three body formats the endpoint accepts:
//!
//! * `application/json`: [`UpscaleParams`], with the image as a URL or a base64 `data:` URI.
//! * `multipart/form-data`: an `image` part (a file, or a text URL) plus optional `scale`, `faceEnhance`, `width` and
//!   `height` text parts.
//! * A raw `image/png`, `image/jpeg` or `image/webp` body, with parameters in the query string.
//!
//! Bodies are read incrementally and refused with a 413 as soon as they exceed the configured ceiling.
use actix_multipart::{Field, Multipart};
use actix_web::{
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
    web,
    HttpRequest,
};
use futures::{StreamExt, TryStreamExt};
use log::*;

use crate::{
    data_objects::{UpscaleParams, UpscaleQuery, ALLOWED_SCALES, DEFAULT_SCALE},
    errors::ServerError,
    helpers::{png_dimensions, DataUri},
};

pub const ACCEPTED_IMAGE_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// What the client sent, before authorization decides whether it may have it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleInput {
    /// A URL or `data:` URI, ready to hand to the image provider.
    pub image: String,
    pub scale: u32,
    pub face_enhance: bool,
    /// Source dimensions, declared by the client or read from a PNG header.
    pub dimensions: Option<(u32, u32)>,
}

impl UpscaleInput {
    /// The output dimensions, if the source dimensions are known.
    pub fn output_dimensions(&self) -> Option<(u64, u64)> {
        self.dimensions.map(|(w, h)| (u64::from(w) * u64::from(self.scale), u64::from(h) * u64::from(self.scale)))
    }
}

/// The media type of the request without parameters, lower-cased.
pub fn media_type(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

pub fn is_accepted_image_type(mime: &str) -> bool {
    ACCEPTED_IMAGE_TYPES.contains(&mime)
}

pub async fn read_upscale_input(
    req: &HttpRequest,
    payload: web::Payload,
    max_bytes: usize,
) -> Result<UpscaleInput, ServerError> {
    check_declared_length(req, max_bytes)?;
    let media_type = media_type(req).unwrap_or_default();
    match media_type.as_str() {
        "application/json" => {
            let body = read_body(payload, max_bytes).await?;
            let params = serde_json::from_slice::<UpscaleParams>(&body)
                .map_err(|e| ServerError::CouldNotDeserializePayload(e.to_string()))?;
            from_params(params)
        },
        "multipart/form-data" => {
            let multipart = Multipart::new(req.headers(), payload);
            from_multipart(multipart, max_bytes).await
        },
        mime if is_accepted_image_type(mime) => {
            let query = web::Query::<UpscaleQuery>::from_query(req.query_string())
                .map_err(|e| ServerError::InvalidParameter(e.to_string()))?
                .into_inner();
            let body = read_body(payload, max_bytes).await?;
            if body.is_empty() {
                return Err(ServerError::MissingImage);
            }
            let dimensions = declared(query.width, query.height).or_else(|| png_dimensions(&body));
            Ok(UpscaleInput {
                image: DataUri::encode(mime, &body),
                scale: validate_scale(query.scale)?,
                face_enhance: query.face_enhance.unwrap_or(false),
                dimensions,
            })
        },
        "" => Err(ServerError::UnsupportedMediaType("no content type".into())),
        other => Err(ServerError::UnsupportedMediaType(other.to_string())),
    }
}

fn check_declared_length(req: &HttpRequest, max_bytes: usize) -> Result<(), ServerError> {
    let declared =
        req.headers().get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|s| s.trim().parse::<usize>().ok());
    match declared {
        Some(len) if len > max_bytes => {
            debug!("💻️ Refusing a {len} byte upscale request");
            Err(ServerError::PayloadTooLarge(max_bytes))
        },
        _ => Ok(()),
    }
}

async fn read_body(mut payload: web::Payload, max_bytes: usize) -> Result<web::Bytes, ServerError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
        if body.len() + chunk.len() > max_bytes {
            return Err(ServerError::PayloadTooLarge(max_bytes));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

async fn read_field(field: &mut Field, max_bytes: usize, used: &mut usize) -> Result<Vec<u8>, ServerError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
        *used += chunk.len();
        if *used > max_bytes {
            return Err(ServerError::PayloadTooLarge(max_bytes));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn field_text(data: Vec<u8>, name: &str) -> Result<String, ServerError> {
    String::from_utf8(data)
        .map(|s| s.trim().to_string())
        .map_err(|_| ServerError::InvalidParameter(format!("'{name}' is not valid text")))
}

fn parse_field<T: std::str::FromStr>(data: Vec<u8>, name: &str) -> Result<Option<T>, ServerError> {
    let text = field_text(data, name)?;
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<T>().map(Some).map_err(|_| ServerError::InvalidParameter(format!("'{name}' has an invalid value")))
}

async fn from_multipart(mut multipart: Multipart, max_bytes: usize) -> Result<UpscaleInput, ServerError> {
    let mut params = UpscaleParams::default();
    let mut image_bytes: Option<(String, Vec<u8>)> = None;
    let mut used = 0usize;
    while let Some(mut field) =
        multipart.try_next().await.map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let mime = field.content_type().map(|m| m.essence_str().to_ascii_lowercase());
        let data = read_field(&mut field, max_bytes, &mut used).await?;
        match name.as_str() {
            "image" => match mime {
                Some(m) if m.starts_with("image/") => {
                    if !is_accepted_image_type(&m) {
                        return Err(ServerError::UnsupportedMediaType(m));
                    }
                    image_bytes = Some((m, data));
                },
                _ => params.image = Some(field_text(data, "image")?),
            },
            "scale" => params.scale = parse_field(data, "scale")?,
            "faceEnhance" | "face_enhance" => params.face_enhance = parse_field(data, "faceEnhance")?,
            "width" => params.width = parse_field(data, "width")?,
            "height" => params.height = parse_field(data, "height")?,
            other => trace!("💻️ Ignoring multipart field '{other}'"),
        }
    }
    match image_bytes {
        Some((mime, bytes)) if !bytes.is_empty() => {
            let dimensions = declared(params.width, params.height).or_else(|| png_dimensions(&bytes));
            Ok(UpscaleInput {
                image: DataUri::encode(&mime, &bytes),
                scale: validate_scale(params.scale)?,
                face_enhance: params.face_enhance.unwrap_or(false),
                dimensions,
            })
        },
        _ => from_params(params),
    }
}

fn from_params(params: UpscaleParams) -> Result<UpscaleInput, ServerError> {
    let image = params.image.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).ok_or(ServerError::MissingImage)?;
    let scale = validate_scale(params.scale)?;
    let mut dimensions = declared(params.width, params.height);
    if image.starts_with("data:") {
        let uri = DataUri::parse(&image)
            .ok_or_else(|| ServerError::InvalidParameter("'image' is not a valid base64 data URI".into()))?;
        if !is_accepted_image_type(&uri.mime) {
            return Err(ServerError::UnsupportedMediaType(uri.mime));
        }
        dimensions = dimensions.or_else(|| png_dimensions(&uri.bytes));
    } else if !(image.starts_with("https://") || image.starts_with("http://")) {
        return Err(ServerError::InvalidParameter("'image' must be an http(s) URL or a data URI".into()));
    }
    Ok(UpscaleInput { image, scale, face_enhance: params.face_enhance.unwrap_or(false), dimensions })
}

fn declared(width: Option<u32>, height: Option<u32>) -> Option<(u32, u32)> {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    }
}

fn validate_scale(scale: Option<u32>) -> Result<u32, ServerError> {
    let scale = scale.unwrap_or(DEFAULT_SCALE);
    if ALLOWED_SCALES.contains(&scale) {
        Ok(scale)
    } else {
        Err(ServerError::InvalidParameter(format!("scale must be one of {ALLOWED_SCALES:?}, not {scale}")))
    }
}
