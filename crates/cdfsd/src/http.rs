//! Ranged HTTP reads of remote media (blocking, ureq).

use std::io::{self, Read as _};
use std::time::Duration;

use cdfs_fuse::UrlFetcher;
use tracing::trace;

#[derive(Debug)]
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            // Status codes are checked below; 200 vs 206 matters
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl UrlFetcher for UreqFetcher {
    fn fetch_range(&self, uri: &str, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        trace!(uri, %range, "fetching");

        let response = self
            .agent
            .get(uri)
            .header("Range", &range)
            .call()
            .map_err(|e| io::Error::other(format!("GET {uri}: {e}")))?;

        let status = response.status().as_u16();
        let mut reader = response.into_body().into_reader();
        match status {
            206 => {}
            // Range ignored: the body starts at byte 0
            200 => {
                io::copy(&mut reader.by_ref().take(offset), &mut io::sink())?;
            }
            _ => return Err(io::Error::other(format!("GET {uri}: HTTP {status}"))),
        }

        let mut data = Vec::with_capacity(len.min(1 << 20) as usize);
        reader.take(len).read_to_end(&mut data)?;
        Ok(data)
    }
}
