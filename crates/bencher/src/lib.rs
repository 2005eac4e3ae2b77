//! Wire samples shared by the benchmarks.

/// One named wire sample.
#[derive(Debug, Copy, Clone)]
pub struct WireSample {
    name: &'static str,
    content: &'static str,
}

impl WireSample {
    pub const fn new(name: &'static str, content: &'static str) -> Self {
        Self { name, content }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

pub static SMALL_REQUEST: WireSample = WireSample::new(
    "small_request",
    "GET /index.html HTTP/1.1\r\n\
     Host: 127.0.0.1:8080\r\n\
     User-Agent: curl/7.79.1\r\n\
     Accept: */*\r\n\r\n",
);

pub static LARGE_REQUEST: WireSample = WireSample::new(
    "large_request",
    "POST /api/v1/upload?session=7f3a9c&chunk=12 HTTP/1.1\r\n\
     Host: upload.example.com\r\n\
     User-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36\r\n\
     Accept: text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8\r\n\
     Accept-Language: en-US,en;q=0.9,de;q=0.7\r\n\
     Accept-Encoding: gzip, deflate, br, zstd\r\n\
     Content-Type: application/octet-stream\r\n\
     Cookie: session=7f3a9c0e2b; theme=dark; tracking=off; region=eu-central-1\r\n\
     Referer: https://upload.example.com/dashboard/projects/42/files\r\n\
     Cache-Control: no-cache\r\n\
     Pragma: no-cache\r\n\
     Connection: keep-alive\r\n\
     Content-Length: 16\r\n\r\n\
     0123456789abcdef",
);

pub static CHUNKED_RESPONSE: WireSample = WireSample::new(
    "chunked_response",
    "HTTP/1.1 200 OK\r\n\
     Content-Type: text/plain\r\n\
     Transfer-Encoding: chunked\r\n\
     Date: Sun, 18 Oct 2026 10:00:00 GMT\r\n\r\n\
     10\r\n0123456789abcdef\r\n\
     10\r\n0123456789abcdef\r\n\
     8\r\n01234567\r\n\
     0\r\n\r\n",
);
