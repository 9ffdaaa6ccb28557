// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Human readable config scalars.

use std::{
    fmt::{self, Write},
    ops::{Div, Mul},
    str::FromStr,
    time::Duration,
};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

const MS_IN_SECOND: u64 = 1_000;
const MS_IN_MINUTE: u64 = 60 * MS_IN_SECOND;
const MS_IN_HOUR: u64 = 60 * MS_IN_MINUTE;
const MS_IN_DAY: u64 = 24 * MS_IN_HOUR;

/// A duration that parses from and renders to strings like `30s`, `500ms`
/// or `1h30m`.
#[derive(Clone, Debug, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ReadableDuration(pub Duration);

impl From<ReadableDuration> for Duration {
    fn from(readable: ReadableDuration) -> Duration {
        readable.0
    }
}

impl Mul<u32> for ReadableDuration {
    type Output = ReadableDuration;

    fn mul(self, rhs: u32) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<u32> for ReadableDuration {
    type Output = ReadableDuration;

    fn div(self, rhs: u32) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl ReadableDuration {
    pub const fn secs(secs: u64) -> ReadableDuration {
        ReadableDuration(Duration::from_secs(secs))
    }

    pub const fn millis(millis: u64) -> ReadableDuration {
        ReadableDuration(Duration::from_millis(millis))
    }

    pub const fn minutes(minutes: u64) -> ReadableDuration {
        ReadableDuration::secs(minutes * 60)
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn is_zero(&self) -> bool {
        self.0.as_nanos() == 0
    }
}

impl FromStr for ReadableDuration {
    type Err = String;

    fn from_str(dur_str: &str) -> Result<ReadableDuration, String> {
        let dur_str = dur_str.trim();
        let err_msg = format!(
            "expect a duration like 1h2m3s4ms, given:{}",
            dur_str
        );
        if dur_str.is_empty() {
            return Err(err_msg);
        }

        let bytes = dur_str.as_bytes();
        let mut total_ms = 0u64;
        let mut value: Option<u64> = None;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'0'..=b'9' => {
                    let digit = u64::from(b - b'0');
                    value = Some(
                        value
                            .unwrap_or(0)
                            .checked_mul(10)
                            .and_then(|v| v.checked_add(digit))
                            .ok_or_else(|| err_msg.clone())?,
                    );
                    i += 1;
                }
                b'd' | b'h' | b'm' | b's' => {
                    let v = value.take().ok_or_else(|| err_msg.clone())?;
                    let unit = match b {
                        b'd' => MS_IN_DAY,
                        b'h' => MS_IN_HOUR,
                        b'm' => {
                            if i + 1 < bytes.len() && bytes[i + 1] == b's' {
                                i += 1;
                                1
                            } else {
                                MS_IN_MINUTE
                            }
                        }
                        _ => MS_IN_SECOND,
                    };
                    total_ms = v
                        .checked_mul(unit)
                        .and_then(|v| total_ms.checked_add(v))
                        .ok_or_else(|| err_msg.clone())?;
                    i += 1;
                }
                _ => return Err(err_msg),
            }
        }
        // A trailing bare number has no unit to apply.
        if value.is_some() {
            return Err(err_msg);
        }

        Ok(ReadableDuration::millis(total_ms))
    }
}

impl fmt::Display for ReadableDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remaining = self.as_millis();
        if remaining == 0 {
            return f.write_str("0s");
        }

        let mut written = false;
        for (unit, suffix) in [
            (MS_IN_DAY, "d"),
            (MS_IN_HOUR, "h"),
            (MS_IN_MINUTE, "m"),
            (MS_IN_SECOND, "s"),
            (1, "ms"),
        ] {
            let count = remaining / unit;
            if count > 0 {
                write!(f, "{}{}", count, suffix)?;
                remaining -= count * unit;
                written = true;
            }
        }
        debug_assert!(written);

        Ok(())
    }
}

impl Serialize for ReadableDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut buf = String::new();
        write!(buf, "{}", self).unwrap();
        serializer.serialize_str(&buf)
    }
}

impl<'de> Deserialize<'de> for ReadableDuration {
    fn deserialize<D>(deserializer: D) -> Result<ReadableDuration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurVisitor;

        impl<'de> Visitor<'de> for DurVisitor {
            type Value = ReadableDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("valid duration")
            }

            fn visit_u64<E>(self, millis: u64) -> Result<ReadableDuration, E>
            where
                E: de::Error,
            {
                Ok(ReadableDuration::millis(millis))
            }

            fn visit_str<E>(self, dur_str: &str) -> Result<ReadableDuration, E>
            where
                E: de::Error,
            {
                dur_str.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurVisitor)
    }
}
