use std::io::{Error as IoError, ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;
use symphonia_core::meta::{MetadataBuilder, MetadataRevision, StandardTagKey, Tag, Value};

fn std_key(key: &str) -> Option<StandardTagKey> {
    let key = match key.to_ascii_uppercase().as_str() {
        "ALBUM" => StandardTagKey::Album,
        "ARTIST" => StandardTagKey::Artist,
        "COMMENT" => StandardTagKey::Comment,
        "DATE" => StandardTagKey::Date,
        "ENCODER" => StandardTagKey::Encoder,
        "GENRE" => StandardTagKey::Genre,
        "TITLE" => StandardTagKey::TrackTitle,
        _ => return None,
    };
    Some(key)
}

fn read_string(data: &mut &[u8]) -> std::io::Result<String> {
    let len = data.read_u32::<LittleEndian>()? as usize;
    if len > data.len() {
        return Err(IoError::new(
            ErrorKind::UnexpectedEof,
            format!("comment of {} bytes, {} remain", len, data.len()),
        ));
    }
    let mut buf = vec![0; len];
    data.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_comments(mut data: &[u8], builder: &mut MetadataBuilder) -> std::io::Result<()> {
    let vendor = read_string(&mut data)?;
    builder.add_tag(Tag::new(None, "VENDOR", Value::String(vendor)));

    let count = data.read_u32::<LittleEndian>()?;
    for _ in 0..count {
        let comment = read_string(&mut data)?;
        match comment.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                builder.add_tag(Tag::new(std_key(key), key, Value::String(value.to_string())));
            }
            _ => warn!("ignoring comment without a key: {:?}", comment),
        }
    }
    Ok(())
}

/// Parse the comment block that follows the stream header.
///
/// Malformed blocks never fail: whatever was read before the problem is
/// kept, along with a `Mode` tag describing the stream.
pub fn parse_comments(data: &[u8], mode_name: &str, vbr: bool) -> MetadataRevision {
    let mut builder = MetadataBuilder::new();
    let mode = format!("{}{}", mode_name, if vbr { " VBR" } else { "" });
    builder.add_tag(Tag::new(None, "Mode", Value::String(mode)));

    if let Err(e) = read_comments(data, &mut builder) {
        warn!("comment block is malformed, metadata is incomplete: {}", e);
    }
    builder.metadata()
}

/// Build a comment block with `vendor` and `KEY=value` comments.
pub fn build_comments(vendor: &str, comments: &[(&str, &str)]) -> Vec<u8> {
    let mut out = vec![];
    out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    out.extend_from_slice(vendor.as_bytes());
    out.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for (key, value) in comments {
        let comment = format!("{}={}", key, value);
        out.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        out.extend_from_slice(comment.as_bytes());
    }
    out
}
