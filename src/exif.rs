//! Just enough JPEG/TIFF walking to pull a GPS fix out of EXIF metadata.

use crate::types::{now_epoch_ms, GeoLocation};
use chrono::{NaiveDate, TimeZone, Utc};
use log::debug;

const TAG_GPS_IFD: u16 = 0x8825;
const GPS_LATITUDE_REF: u16 = 0x0001;
const GPS_LATITUDE: u16 = 0x0002;
const GPS_LONGITUDE_REF: u16 = 0x0003;
const GPS_LONGITUDE: u16 = 0x0004;
const GPS_TIME_STAMP: u16 = 0x0007;
const GPS_DATE_STAMP: u16 = 0x001D;
const GPS_H_POSITIONING_ERROR: u16 = 0x001F;

const TYPE_ASCII: u16 = 2;
const TYPE_RATIONAL: u16 = 5;
const TYPE_SRATIONAL: u16 = 10;

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug)]
struct IfdEntry {
    tag: u16,
    kind: u16,
    count: u32,
    value_at: usize,
}

struct Tiff<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Tiff<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let order = match data.get(0..2)? {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return None,
        };
        let tiff = Tiff { data, order };
        if tiff.u16_at(2)? != 42 {
            return None;
        }
        Some(tiff)
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let b = self.data.get(offset..offset.checked_add(2)?)?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.data.get(offset..offset.checked_add(4)?)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Some(match self.order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn entries(&self, ifd_offset: usize) -> Option<Vec<IfdEntry>> {
        let count = self.u16_at(ifd_offset)? as usize;
        let mut entries = Vec::with_capacity(count.min(64));
        for i in 0..count {
            let at = ifd_offset.checked_add(2 + i * 12)?;
            entries.push(IfdEntry {
                tag: self.u16_at(at)?,
                kind: self.u16_at(at + 2)?,
                count: self.u32_at(at + 4)?,
                value_at: at + 8,
            });
        }
        Some(entries)
    }

    // Values up to four bytes are stored inline in the entry.
    fn payload(&self, entry: &IfdEntry) -> Option<&'a [u8]> {
        let unit = match entry.kind {
            TYPE_ASCII => 1,
            TYPE_RATIONAL | TYPE_SRATIONAL => 8,
            _ => return None,
        };
        let size = unit * entry.count as usize;
        let start = if size <= 4 {
            entry.value_at
        } else {
            self.u32_at(entry.value_at)? as usize
        };
        self.data.get(start..start.checked_add(size)?)
    }

    fn ascii(&self, entry: &IfdEntry) -> Option<String> {
        if entry.kind != TYPE_ASCII {
            return None;
        }
        let raw = self.payload(entry)?;
        let text = raw.split(|b| *b == 0).next().unwrap_or(raw);
        Some(String::from_utf8_lossy(text).trim().to_string())
    }

    fn rationals(&self, entry: &IfdEntry) -> Option<Vec<f64>> {
        let raw = self.payload(entry)?;
        let sub = Tiff {
            data: raw,
            order: self.order,
        };
        let mut values = Vec::with_capacity(entry.count as usize);
        for i in 0..entry.count as usize {
            let num = sub.u32_at(i * 8)?;
            let den = sub.u32_at(i * 8 + 4)?;
            if den == 0 {
                return None;
            }
            let value = if entry.kind == TYPE_SRATIONAL {
                f64::from(num as i32) / f64::from(den as i32)
            } else {
                f64::from(num) / f64::from(den)
            };
            values.push(value);
        }
        Some(values)
    }
}

/// Locates the TIFF block of an EXIF APP1 segment. Raw TIFF input is returned as is.
fn find_tiff(data: &[u8]) -> Option<&[u8]> {
    if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        return Some(data);
    }
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            // EOI or start of scan: metadata segments come before these.
            0xD9 | 0xDA => return None,
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 {
            return None;
        }
        let end = (pos + 2 + length).min(data.len());
        if marker == 0xE1 {
            let segment = &data[pos + 4..end];
            if segment.starts_with(b"Exif\0\0") {
                return Some(&segment[6..]);
            }
        }
        pos += 2 + length;
    }
    None
}

fn degrees(dms: &[f64]) -> Option<f64> {
    let deg = *dms.get(0)?;
    let min = dms.get(1).copied().unwrap_or(0.0);
    let sec = dms.get(2).copied().unwrap_or(0.0);
    Some(deg + min / 60.0 + sec / 3600.0)
}

fn gps_timestamp(date: &str, hms: &[f64]) -> Option<i64> {
    let mut parts = date.split(':');
    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    let seconds = hms.get(0)? * 3600.0 + hms.get(1)? * 60.0 + hms.get(2)?;
    if !(0.0..86_400.0).contains(&seconds) {
        return None;
    }
    Some(Utc.from_utc_datetime(&midnight).timestamp_millis() + (seconds * 1000.0).round() as i64)
}

/// Reads the GPS position embedded in a JPEG (or bare TIFF) image.
///
/// Returns `None` when there is no GPS block, when it is malformed, or when it
/// records the (0,0) "unknown" position.
pub fn gps_location(image: &[u8]) -> Option<GeoLocation> {
    let tiff = Tiff::parse(find_tiff(image)?)?;
    let ifd0 = tiff.u32_at(4)? as usize;
    let gps_pointer = tiff
        .entries(ifd0)?
        .into_iter()
        .find(|e| e.tag == TAG_GPS_IFD)?;
    let gps = tiff.entries(tiff.u32_at(gps_pointer.value_at)? as usize)?;
    let find = |tag: u16| gps.iter().find(|e| e.tag == tag);

    let mut latitude = degrees(&tiff.rationals(find(GPS_LATITUDE)?)?)?;
    let mut longitude = degrees(&tiff.rationals(find(GPS_LONGITUDE)?)?)?;
    if let Some(r) = find(GPS_LATITUDE_REF).and_then(|e| tiff.ascii(e)) {
        if r.starts_with('S') {
            latitude = -latitude;
        }
    }
    if let Some(r) = find(GPS_LONGITUDE_REF).and_then(|e| tiff.ascii(e)) {
        if r.starts_with('W') {
            longitude = -longitude;
        }
    }

    let accuracy_meters = find(GPS_H_POSITIONING_ERROR)
        .and_then(|e| tiff.rationals(e))
        .and_then(|v| v.first().copied());
    let captured_at_epoch_ms = match (find(GPS_DATE_STAMP), find(GPS_TIME_STAMP)) {
        (Some(date), Some(time)) => tiff
            .ascii(date)
            .zip(tiff.rationals(time))
            .and_then(|(d, t)| gps_timestamp(&d, &t)),
        _ => None,
    }
    .unwrap_or_else(now_epoch_ms);

    let location = GeoLocation {
        latitude,
        longitude,
        accuracy_meters,
        captured_at_epoch_ms,
    };
    if !location.is_usable() {
        debug!("Ignoring unusable EXIF position {:?}", location);
        return None;
    }
    Some(location)
}
