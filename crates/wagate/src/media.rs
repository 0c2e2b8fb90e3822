//! Content sniffing and outgoing media message construction.

use crate::protocol::{OutgoingMessage, UploadedMedia};
use serde::Serialize;
use std::path::Path;

/// Fallback MIME type when nothing matches.
pub const OCTET_STREAM: &str = "application/octet-stream";

const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/avif",
    "image/apng",
    "image/svg+xml",
];

const VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/ogg",
    "video/webm",
    "video/avi",
    "video/quicktime",
    "video/x-ms-wmv",
];

const AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
    "audio/aac",
    "audio/mp4",
];

/// How an upload is classified on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        if IMAGE_TYPES.contains(&mime) {
            MediaKind::Image
        } else if VIDEO_TYPES.contains(&mime) {
            MediaKind::Video
        } else if AUDIO_TYPES.contains(&mime) {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

/// Guess a MIME type from the leading bytes of `data`.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(512)];

    if head.starts_with(b"\xFF\xD8\xFF") {
        return "image/jpeg";
    }
    if head.starts_with(b"\x89PNG\r\n\x1A\n") {
        return "image/png";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        match &head[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wav",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }
    if let Some(brand) = ftyp_brand(head) {
        return match brand {
            b"avif" | b"avis" => "image/avif",
            b"qt  " => "video/quicktime",
            b"M4A " | b"M4B " => "audio/mp4",
            _ => "video/mp4",
        };
    }
    if head.starts_with(b"\x1A\x45\xDF\xA3") {
        // Matroska and WebM share the EBML header; only WebM is accepted upstream.
        return if contains(head, b"webm") {
            "video/webm"
        } else {
            OCTET_STREAM
        };
    }
    if head.starts_with(b"OggS\x00") {
        return if contains(head, b"theora") {
            "video/ogg"
        } else {
            "audio/ogg"
        };
    }
    if head.starts_with(b"ID3") {
        return "audio/mpeg";
    }
    if head.len() >= 2 && head[0] == 0xFF {
        match head[1] & 0xF6 {
            0xF0 => return "audio/aac",
            0xF2 => return "audio/mpeg",
            _ => {}
        }
    }
    if head.starts_with(b"\x00\x00\x01\xBA") || head.starts_with(b"\x00\x00\x01\xB3") {
        return "video/mpeg";
    }
    if head.starts_with(b"\x30\x26\xB2\x75\x8E\x66\xCF\x11") {
        return "video/x-ms-wmv";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if looks_like_svg(head) {
        return "image/svg+xml";
    }
    if !head.is_empty() && std::str::from_utf8(head).is_ok() && !head.contains(&0) {
        return "text/plain; charset=utf-8";
    }
    OCTET_STREAM
}

fn ftyp_brand(head: &[u8]) -> Option<&[u8]> {
    if head.len() < 12 || &head[4..8] != b"ftyp" {
        return None;
    }
    Some(&head[8..12])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn looks_like_svg(head: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let text = text.trim_start();
    (text.starts_with("<svg") || text.starts_with("<?xml")) && text.contains("<svg")
}

/// One media upload to be sent to every recipient of a dispatch.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mimetype: String,
    pub kind: MediaKind,
    pub file_name: Option<String>,
    pub caption: String,
}

impl MediaPayload {
    /// Classify `data` by content and wrap it for dispatch.
    pub fn new(data: Vec<u8>, file_name: Option<String>, caption: impl Into<String>) -> Self {
        let mimetype = sniff_content_type(&data).to_string();
        let kind = MediaKind::from_mime(&mimetype);
        Self {
            data,
            mimetype,
            kind,
            file_name,
            caption: caption.into(),
        }
    }

    /// Build the outgoing message for one uploaded copy of this payload.
    pub fn build_message(&self, media: UploadedMedia) -> OutgoingMessage {
        let mimetype = self.mimetype.clone();
        let caption = self.caption.clone();
        match self.kind {
            MediaKind::Image => OutgoingMessage::Image {
                media,
                mimetype,
                caption,
            },
            MediaKind::Video => OutgoingMessage::Video {
                media,
                mimetype,
                caption,
            },
            MediaKind::Audio => OutgoingMessage::Audio { media, mimetype },
            MediaKind::Document => {
                let title = match Path::new(&media.url).extension() {
                    Some(ext) => format!("document.{}", ext.to_string_lossy()),
                    None => "document".to_string(),
                };
                OutgoingMessage::Document {
                    file_name: self.file_name.clone().unwrap_or_else(|| title.clone()),
                    title,
                    media,
                    mimetype,
                    caption,
                }
            }
        }
    }
}
