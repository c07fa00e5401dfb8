//! Clocks, sleeping, and civil dates.
//!
//! The monotonic clock is anchored at its first use in the process and
//! reports milliseconds since that anchor; the store's TTL bookkeeping and
//! the reactor's timers both derive from it so expiry comparisons never
//! see wall-clock jumps.

use crate::error::{Result, RuntimeError};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds on the process-relative monotonic clock.
#[must_use]
pub fn monotonic_time_ms() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_millis() as u64
}

/// Seconds since the Unix epoch.
pub fn real_time_s() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::NotSupported("real time before epoch"))?;
    Ok(now.as_secs() as i64)
}

/// Blocks the calling thread.
pub fn sleep_ms(ms: u32) {
    std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
}

/// A civil date-time: year, month (1-12), day, hour, minute, second.
pub type CivilDate = [i32; 6];

#[cfg(not(target_arch = "wasm32"))]
mod civil {
    #![allow(unsafe_code)]

    use super::CivilDate;
    use crate::error::{Result, RuntimeError};

    fn convert(tm: &libc::tm) -> CivilDate {
        [
            tm.tm_year + 1900,
            tm.tm_mon + 1,
            tm.tm_mday,
            tm.tm_hour,
            tm.tm_min,
            tm.tm_sec.min(59),
        ]
    }

    pub fn date_now(local: bool) -> Result<CivilDate> {
        // SAFETY: time with a null argument only returns the current
        // calendar time; gmtime_r/localtime_r write solely into the
        // caller-provided tm and return null on failure.
        unsafe {
            let t = libc::time(std::ptr::null_mut());
            let mut tm: libc::tm = std::mem::zeroed();
            let res = if local {
                libc::localtime_r(&raw const t, &raw mut tm)
            } else {
                libc::gmtime_r(&raw const t, &raw mut tm)
            };
            if res.is_null() {
                return Err(RuntimeError::NotSupported("can't convert calendar time"));
            }
            Ok(convert(&tm))
        }
    }
}

/// Current date in UTC.
pub fn date_utc() -> Result<CivilDate> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        civil::date_now(false)
    }
    #[cfg(target_arch = "wasm32")]
    {
        Err(RuntimeError::NotSupported("civil dates"))
    }
}

/// Current date in the process time zone.
pub fn date_local() -> Result<CivilDate> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        civil::date_now(true)
    }
    #[cfg(target_arch = "wasm32")]
    {
        Err(RuntimeError::NotSupported("civil dates"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = monotonic_time_ms();
        sleep_ms(5);
        let b = monotonic_time_ms();
        assert!(b >= a + 4);
    }

    #[test]
    fn real_time_is_after_2020() {
        assert!(real_time_s().unwrap() > 1_577_836_800);
    }

    #[test]
    fn civil_date_fields_are_plausible() {
        let d = date_utc().unwrap();
        assert!(d[0] >= 2024);
        assert!((1..=12).contains(&d[1]));
        assert!((1..=31).contains(&d[2]));
        assert!((0..=23).contains(&d[3]));
        assert!((0..=59).contains(&d[4]));
        assert!((0..=59).contains(&d[5]));
    }
}
