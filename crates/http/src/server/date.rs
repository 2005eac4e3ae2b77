use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;

const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// `Date` header value, re-rendered at most every [`REFRESH_INTERVAL`].
///
/// Each server owns one; readers never block each other.
#[derive(Debug)]
pub(crate) struct DateCache {
    current: ArcSwap<(Instant, HeaderValue)>,
}

impl DateCache {
    pub(crate) fn new() -> Self {
        Self { current: ArcSwap::from_pointee((Instant::now(), render())) }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        let current = self.current.load();
        if current.0.elapsed() < REFRESH_INTERVAL {
            return current.1.clone();
        }
        let value = render();
        self.current.store(Arc::new((Instant::now(), value.clone())));
        value
    }
}

fn render() -> HeaderValue {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    // SAFETY: faf_http_date renders an IMF-fixdate, which only contains visible ASCII and spaces.
    unsafe { HeaderValue::from_maybe_shared_unchecked(Bytes::from_owner(buf)) }
}
