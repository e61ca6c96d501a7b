//! Cached value of the HTTP `Date` response header.
//!
//! The formatted value is kept in an [`ArcSwap`] and refreshed by whichever
//! thread first notices it went stale.

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_millis(800);

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new(REFRESH_INTERVAL));

#[derive(Debug)]
struct Stamp {
    taken_at: Instant,
    value: HeaderValue,
}

#[derive(Debug)]
pub struct DateService {
    current: ArcSwap<Stamp>,
    refresh_interval: Duration,
}

impl DateService {
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new(refresh_interval: Duration) -> Self {
        Self { current: ArcSwap::from_pointee(Stamp::now()), refresh_interval }
    }

    /// The current `Date` header value, at most one refresh interval old.
    pub fn http_date(&self) -> HeaderValue {
        let stamp = self.current.load();
        if stamp.taken_at.elapsed() < self.refresh_interval {
            return stamp.value.clone();
        }

        let fresh = Arc::new(Stamp::now());
        let value = fresh.value.clone();
        self.current.store(fresh);
        value
    }
}

impl Stamp {
    fn now() -> Self {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        let value = HeaderValue::from_maybe_shared(Bytes::from_owner(buf))
            .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
        Self { taken_at: Instant::now(), value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_imf_fixdate() {
        let value = DateService::get_global_instance().http_date();
        let text = value.to_str().unwrap();
        assert_eq!(text.len(), 29);
        assert!(text.ends_with(" GMT"));
    }

    #[test]
    fn refreshes_when_stale() {
        let service = DateService::new(Duration::ZERO);
        let before = service.current.load().taken_at;
        let _ = service.http_date();
        assert!(service.current.load().taken_at >= before);
    }

    #[test]
    fn debug_shows_cached_value() {
        let service = DateService::new(REFRESH_INTERVAL);
        let debug = format!("{service:?}");
        assert!(debug.starts_with("DateService"));
        assert!(debug.contains("GMT"));
    }
}
