//! Original capture time from embedded image metadata.
//!
//! Upload time is ignored on purpose: re-sending an old photo must not make
//! it count for today.

use chrono::NaiveDateTime;

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Read `DateTimeOriginal` from an image's EXIF block.
///
/// Returns `None` when the image carries no EXIF data, no capture time, or a
/// malformed one. The value is camera-local wall time.
pub fn capture_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    let mut cursor = std::io::Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!("No readable EXIF block: {}", e);
            return None;
        }
    };

    let field = exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .or_else(|| exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY))?;

    let raw = match field.value {
        exif::Value::Ascii(ref parts) => parts.first()?,
        _ => return None,
    };
    let text = std::str::from_utf8(raw).ok()?.trim_end_matches('\0').trim();

    match NaiveDateTime::parse_from_str(text, EXIF_DATETIME_FORMAT) {
        Ok(dt) => Some(dt),
        Err(e) => {
            tracing::debug!(value = %text, "Malformed EXIF capture time: {}", e);
            None
        }
    }
}

/// Minimal JPEG whose EXIF block holds `DateTimeOriginal = stamp`
/// (`YYYY:MM:DD HH:MM:SS`), followed by `tail` so images stay distinguishable.
#[cfg(test)]
pub(crate) fn jpeg_with_capture_time(stamp: &str, tail: &[u8]) -> Vec<u8> {
    assert_eq!(stamp.len(), 19);

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2a");
    tiff.extend_from_slice(&8u32.to_be_bytes());
    // IFD0: one entry pointing at the Exif sub-IFD
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x8769u16.to_be_bytes());
    tiff.extend_from_slice(&4u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&26u32.to_be_bytes());
    tiff.extend_from_slice(&0u32.to_be_bytes());
    // Exif IFD: DateTimeOriginal, ASCII, 20 bytes at offset 44
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x9003u16.to_be_bytes());
    tiff.extend_from_slice(&2u16.to_be_bytes());
    tiff.extend_from_slice(&20u32.to_be_bytes());
    tiff.extend_from_slice(&44u32.to_be_bytes());
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(stamp.as_bytes());
    tiff.push(0);

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    let segment_len = (2 + 6 + tiff.len()) as u16;
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\x00\x00");
    jpeg.extend_from_slice(&tiff);
    // Comment segment carrying the tail
    jpeg.extend_from_slice(&[0xFF, 0xFE]);
    jpeg.extend_from_slice(&((2 + tail.len()) as u16).to_be_bytes());
    jpeg.extend_from_slice(tail);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn reads_date_time_original() {
        let jpeg = jpeg_with_capture_time("2025:05:21 07:15:00", b"a");
        let dt = capture_time(&jpeg).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2025, 5, 21).unwrap());
        assert_eq!(dt.format("%H:%M:%S").to_string(), "07:15:00");
    }

    #[test]
    fn missing_metadata_is_none() {
        assert!(capture_time(&[0xFF, 0xD8, 0xFF, 0xD9]).is_none());
        assert!(capture_time(b"not an image").is_none());
    }

    #[test]
    fn malformed_stamp_is_none() {
        let jpeg = jpeg_with_capture_time("2025-05-21T07:15:00", b"a");
        assert!(capture_time(&jpeg).is_none());
    }
}
