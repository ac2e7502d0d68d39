//! UTC time fields carried by ICD frames
//!
//! A 9-byte field: year (u16 LE), month, day, hour, minute, second (u8
//! each) and millisecond (u16 LE). Firmware reports whatever its clock
//! holds, so decoding never validates the calendar; conversion back to
//! [`DateTime<Utc>`] is fallible instead.

use bytes::{Buf, BufMut};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::Serialize;

/// UTC timestamp as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IcdTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl IcdTime {
    /// Encoded size in bytes
    pub const WIRE_SIZE: usize = 9;

    /// Build from a UTC datetime, truncating to millisecond resolution.
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            // chrono reports leap seconds as nanosecond >= 1e9
            millisecond: (dt.nanosecond() / 1_000_000).min(999) as u16,
        }
    }

    /// Current UTC time.
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Convert to a UTC datetime, or `None` if the fields are not a valid date.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(
            self.year as i32,
            self.month as u32,
            self.day as u32,
        )?;
        let naive = date.and_hms_milli_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
            self.millisecond as u32,
        )?;
        Some(Utc.from_utc_datetime(&naive))
    }

    pub(crate) fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.year);
        buf.put_u8(self.month);
        buf.put_u8(self.day);
        buf.put_u8(self.hour);
        buf.put_u8(self.minute);
        buf.put_u8(self.second);
        buf.put_u16_le(self.millisecond);
    }

    /// Caller guarantees at least [`WIRE_SIZE`](Self::WIRE_SIZE) bytes remain.
    pub(crate) fn read_from<B: Buf>(buf: &mut B) -> Self {
        Self {
            year: buf.get_u16_le(),
            month: buf.get_u8(),
            day: buf.get_u8(),
            hour: buf.get_u8(),
            minute: buf.get_u8(),
            second: buf.get_u8(),
            millisecond: buf.get_u16_le(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 15, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        let t = IcdTime::from_datetime(&dt);
        assert_eq!(t.year, 2024);
        assert_eq!(t.month, 3);
        assert_eq!(t.day, 15);
        assert_eq!(t.hour, 12);
        assert_eq!(t.minute, 34);
        assert_eq!(t.second, 56);
        assert_eq!(t.millisecond, 789);
        assert_eq!(t.to_datetime(), Some(dt));
    }

    #[test]
    fn test_wire_layout() {
        let t = IcdTime {
            year: 0x07E8,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
            millisecond: 0x0102,
        };
        let mut buf = Vec::new();
        t.write_to(&mut buf);
        assert_eq!(buf, vec![0xE8, 0x07, 1, 2, 3, 4, 5, 0x02, 0x01]);
        assert_eq!(buf.len(), IcdTime::WIRE_SIZE);

        let mut slice = buf.as_slice();
        assert_eq!(IcdTime::read_from(&mut slice), t);
    }

    #[test]
    fn test_invalid_date_has_no_datetime() {
        let t = IcdTime {
            year: 2024,
            month: 13,
            ..Default::default()
        };
        assert!(t.to_datetime().is_none());
    }
}
