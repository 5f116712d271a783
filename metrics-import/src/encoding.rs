use std::io::{self, Read};

use axum::http::HeaderMap;
use flate2::read::ZlibDecoder;

use crate::api::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    /// zlib-wrapped deflate, as produced by the forwarding collectors
    Deflate,
}

impl ContentEncoding {
    /// Picks the decoding strategy from the `Content-Encoding` header.
    /// Tokens are matched exactly (the HTTP parser already strips
    /// surrounding whitespace). Anything but an empty value or `deflate`
    /// is rejected before any of the body is read.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ImportError> {
        let token = match headers.get("content-encoding") {
            None => return Ok(ContentEncoding::Identity),
            Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
        };

        match token.as_str() {
            "" => Ok(ContentEncoding::Identity),
            "deflate" => Ok(ContentEncoding::Deflate),
            _ => Err(ImportError::UnsupportedEncoding(token)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Deflate => "deflate",
        }
    }

    /// Wraps the body in the matching reader. The zlib header is checked
    /// up front so that a bogus stream fails here and not in the decoder.
    pub fn reader<'a>(&self, body: &'a [u8]) -> Result<BodyReader<'a>, ImportError> {
        match self {
            ContentEncoding::Identity => Ok(BodyReader::Identity(body)),
            ContentEncoding::Deflate => {
                check_zlib_header(body)?;
                Ok(BodyReader::Deflate(ZlibDecoder::new(body)))
            }
        }
    }
}

pub enum BodyReader<'a> {
    Identity(&'a [u8]),
    Deflate(ZlibDecoder<&'a [u8]>),
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyReader::Identity(body) => body.read(buf),
            BodyReader::Deflate(decoder) => decoder.read(buf),
        }
    }
}

// RFC 1950 section 2.2
fn check_zlib_header(body: &[u8]) -> Result<(), ImportError> {
    let (cmf, flg) = match body {
        [cmf, flg, ..] => (*cmf, *flg),
        _ => {
            return Err(ImportError::CompressionError(
                "unexpected end of stream".to_string(),
            ))
        }
    };

    let method = cmf & 0x0f;
    let window_bits = cmf >> 4;
    let checksum = (u16::from(cmf) << 8) | u16::from(flg);
    if method != 8 || window_bits > 7 || checksum % 31 != 0 {
        return Err(ImportError::CompressionError("invalid header".to_string()));
    }

    if flg & 0x20 != 0 {
        return Err(ImportError::CompressionError(
            "preset dictionaries are not supported".to_string(),
        ));
    }

    Ok(())
}
