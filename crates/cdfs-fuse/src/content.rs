//! Lazily-read file contents bound by `open`.

use std::io;

use crate::media::UrlFetcher;

/// What an opened file reads from. Nothing is fetched until [`read_at`].
///
/// [`read_at`]: FileContent::read_at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Generated in memory: listings, status, playlists, metadata
    Text(String),
    /// Remote media served by ranged reads
    Url { uri: String, size: u64 },
}

impl FileContent {
    pub fn size(&self) -> u64 {
        match self {
            FileContent::Text(text) => text.len() as u64,
            FileContent::Url { size, .. } => *size,
        }
    }

    /// Read up to `len` bytes at `offset`. Reads past the end return an
    /// empty buffer.
    pub fn read_at(&self, offset: u64, len: u32, fetcher: &dyn UrlFetcher) -> io::Result<Vec<u8>> {
        let size = self.size();
        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }
        let len = u64::from(len).min(size - offset);
        match self {
            FileContent::Text(text) => {
                let start = offset as usize;
                let end = start + len as usize;
                Ok(text.as_bytes()[start..end].to_vec())
            }
            FileContent::Url { uri, .. } => fetcher.fetch_range(uri, offset, len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(String, u64, u64)>>);

    impl UrlFetcher for Recorder {
        fn fetch_range(&self, uri: &str, offset: u64, len: u64) -> io::Result<Vec<u8>> {
            self.0.lock().unwrap().push((uri.to_string(), offset, len));
            Ok(vec![0u8; len as usize])
        }
    }

    #[test]
    fn text_reads_are_clamped() {
        let fetcher = Recorder(Mutex::new(Vec::new()));
        let content = FileContent::Text("hello world".into());
        assert_eq!(content.read_at(6, 100, &fetcher).unwrap(), b"world");
        assert!(content.read_at(11, 4, &fetcher).unwrap().is_empty());
        assert!(fetcher.0.lock().unwrap().is_empty());
    }

    #[test]
    fn url_reads_go_through_fetcher() {
        let fetcher = Recorder(Mutex::new(Vec::new()));
        let content = FileContent::Url {
            uri: "http://h/a.mp3".into(),
            size: 1000,
        };
        assert_eq!(content.read_at(900, 4096, &fetcher).unwrap().len(), 100);
        assert_eq!(
            *fetcher.0.lock().unwrap(),
            vec![("http://h/a.mp3".to_string(), 900, 100)]
        );
    }
}
