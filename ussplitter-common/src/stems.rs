//! Two-stem result codec
//!
//! `GET /jobs/{id}/result` answers with a `multipart/mixed` body holding exactly
//! two parts, vocals first, instrumental second. Every part carries a
//! `Content-Length` header and the decoder slices by that length, so payload
//! bytes that happen to contain the boundary text cannot split a part.
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: attachment; name="vocals"; filename="vocals.mp3"\r\n
//! Content-Type: audio/mpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes>\r\n
//! --<boundary>\r\n
//! ... instrumental part ...
//! --<boundary>--\r\n
//! ```

use bytes::Bytes;
use std::path::Path;

use crate::job::JobId;
use crate::{Error, Result};

pub const STEMS_MEDIA_TYPE: &str = "multipart/mixed";
pub const VOCALS_PART: &str = "vocals";
pub const INSTRUMENTAL_PART: &str = "instrumental";

/// One separated track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemPart {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl StemPart {
    /// Build a part, deriving the content type from the filename extension
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let filename = filename.into();
        let content_type = content_type_for(&filename).to_string();
        Self {
            filename,
            content_type,
            data: data.into(),
        }
    }

    /// File extension of the served filename, if any
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.filename).extension().and_then(|e| e.to_str())
    }
}

/// Vocals and instrumental, always in that order on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemBundle {
    pub vocals: StemPart,
    pub instrumental: StemPart,
}

/// Deterministic boundary for a job's result response
pub fn boundary_for(job_id: &JobId) -> String {
    format!("ussplitter-stems-{}", job_id.as_uuid().simple())
}

/// Map a file extension to a media type
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

impl StemBundle {
    /// `Content-Type` header value for an encoded bundle
    pub fn content_type(boundary: &str) -> String {
        format!("{}; boundary={}", STEMS_MEDIA_TYPE, boundary)
    }

    pub fn encode(&self, boundary: &str) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(self.vocals.data.len() + self.instrumental.data.len() + 512);

        for (name, part) in [
            (VOCALS_PART, &self.vocals),
            (INSTRUMENTAL_PART, &self.instrumental),
        ] {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: attachment; name=\"{}\"; filename=\"{}\"\r\n",
                    name, part.filename
                )
                .as_bytes(),
            );
            out.extend_from_slice(format!("Content-Type: {}\r\n", part.content_type).as_bytes());
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", part.data.len()).as_bytes());
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        out
    }

    /// Split a result body back into its two parts.
    ///
    /// Fails with [`Error::Protocol`] if the boundary is missing, a part is
    /// truncated, or the parts are not exactly vocals then instrumental.
    pub fn decode(content_type: &str, body: Bytes) -> Result<Self> {
        let boundary = parse_boundary(content_type)?;
        let delimiter = format!("--{}", boundary);

        let mut cursor = 0;
        let mut parts = Vec::with_capacity(2);

        for expected in [VOCALS_PART, INSTRUMENTAL_PART] {
            cursor = expect(&body, cursor, delimiter.as_bytes())?;
            cursor = expect(&body, cursor, b"\r\n")?;

            let (headers, after_headers) = read_headers(&body, cursor)?;
            if headers.name.as_deref() != Some(expected) {
                return Err(Error::Protocol(format!(
                    "expected part '{}', found {:?}",
                    expected, headers.name
                )));
            }

            let length = headers.content_length.ok_or_else(|| {
                Error::Protocol(format!("part '{}' has no Content-Length", expected))
            })?;
            let end = after_headers
                .checked_add(length)
                .filter(|end| *end <= body.len())
                .ok_or_else(|| Error::Protocol(format!("part '{}' is truncated", expected)))?;

            let data = body.slice(after_headers..end);
            cursor = expect(&body, end, b"\r\n")?;

            let filename = headers.filename.unwrap_or_else(|| expected.to_string());
            let content_type = headers
                .content_type
                .unwrap_or_else(|| content_type_for(&filename).to_string());
            parts.push(StemPart {
                filename,
                content_type,
                data,
            });
        }

        cursor = expect(&body, cursor, delimiter.as_bytes())?;
        expect(&body, cursor, b"--")?;

        let instrumental = parts.pop();
        let vocals = parts.pop();
        match (vocals, instrumental) {
            (Some(vocals), Some(instrumental)) => Ok(Self {
                vocals,
                instrumental,
            }),
            _ => Err(Error::Protocol("stems response is incomplete".to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    content_length: Option<usize>,
}

fn parse_boundary(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';').map(str::trim);

    let media_type = params.next().unwrap_or_default();
    if !media_type.eq_ignore_ascii_case(STEMS_MEDIA_TYPE) {
        return Err(Error::Protocol(format!(
            "unexpected content type '{}'",
            content_type
        )));
    }

    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|boundary| !boundary.is_empty())
        .ok_or_else(|| Error::Protocol("content type has no boundary".to_string()))
}

fn expect(body: &[u8], at: usize, token: &[u8]) -> Result<usize> {
    let end = at + token.len();
    if body.get(at..end) == Some(token) {
        Ok(end)
    } else {
        Err(Error::Protocol(format!(
            "malformed stems body at byte {}",
            at
        )))
    }
}

fn read_headers(body: &[u8], mut cursor: usize) -> Result<(PartHeaders, usize)> {
    let mut headers = PartHeaders::default();

    loop {
        let rest = body
            .get(cursor..)
            .ok_or_else(|| Error::Protocol("unterminated part headers".to_string()))?;
        let line_len = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::Protocol("unterminated part headers".to_string()))?;
        let line = std::str::from_utf8(&rest[..line_len])
            .map_err(|_| Error::Protocol("part header is not UTF-8".to_string()))?;
        cursor += line_len + 2;

        if line.is_empty() {
            return Ok((headers, cursor));
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("bad part header '{}'", line)))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((key, val)) = param.trim().split_once('=') {
                    let val = val.trim().trim_matches('"').to_string();
                    match key.trim() {
                        "name" => headers.name = Some(val),
                        "filename" => headers.filename = Some(val),
                        _ => {}
                    }
                }
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .parse()
                .map_err(|_| Error::Protocol(format!("bad Content-Length '{}'", value)))?;
            headers.content_length = Some(length);
        }
    }
}
