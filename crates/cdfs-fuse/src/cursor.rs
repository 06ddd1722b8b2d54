//! The not-yet-matched suffix of a path during one traversal.

/// Consumes a `/`-separated path strictly left to right. Leading and
/// repeated separators are skipped; there is no way to step back.
#[derive(Debug, Clone)]
pub struct PathCursor<'p> {
    path: &'p str,
    pos: usize,
}

impl<'p> PathCursor<'p> {
    pub fn new(path: &'p str) -> Self {
        let mut cursor = PathCursor { path, pos: 0 };
        cursor.skip_separators();
        cursor
    }

    /// The full path this cursor walks.
    pub fn path(&self) -> &'p str {
        self.path
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.path.len()
    }

    /// The unconsumed remainder, without leading separators.
    pub fn rest(&self) -> &'p str {
        &self.path[self.pos..]
    }

    /// The consumed prefix, as an absolute path.
    pub fn matched(&self) -> String {
        let done = self.path[..self.pos].trim_matches('/');
        let mut out = String::with_capacity(done.len() + 1);
        out.push('/');
        for (i, part) in done.split('/').filter(|p| !p.is_empty()).enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(part);
        }
        out
    }

    /// Next component without consuming it.
    pub fn peek(&self) -> Option<&'p str> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }
        Some(rest.split('/').next().unwrap_or(rest))
    }

    /// Consume and return the next component.
    pub fn next_component(&mut self) -> Option<&'p str> {
        let component = self.peek()?;
        self.pos += component.len();
        self.skip_separators();
        Some(component)
    }

    /// Consume the next component if it is exactly `name`.
    ///
    /// Names that are empty or made only of `/` never match.
    pub fn take_literal(&mut self, name: &str) -> bool {
        if name.trim_matches('/').is_empty() {
            return false;
        }
        if self.peek() == Some(name) {
            self.pos += name.len();
            self.skip_separators();
            true
        } else {
            false
        }
    }

    fn skip_separators(&mut self) {
        let bytes = self.path.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos] == b'/' {
            self.pos += 1;
        }
    }
}
