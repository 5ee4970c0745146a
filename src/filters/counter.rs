/// Structural rule counter: every line that is neither blank nor a comment
/// counts as one rule, whether or not it parses.
#[derive(Debug, Clone)]
pub struct RuleCounter {
    markers: Vec<Box<[u8]>>,
}

impl Default for RuleCounter {
    fn default() -> Self {
        Self::with_markers(["#"])
    }
}

impl RuleCounter {
    /// Empty markers are dropped, they would match every line.
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .filter(|m| !m.as_ref().is_empty())
            .map(|m| m.as_ref().as_bytes().into())
            .collect();
        Self { markers }
    }

    pub fn count(&self, content: &[u8]) -> u64 {
        content
            .split(|&b| b == b'\n')
            .filter(|line| self.is_active(line))
            .count() as u64
    }

    fn is_active(&self, line: &[u8]) -> bool {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = line.trim_ascii_start();
        if line.is_empty() {
            return false;
        }
        !self.markers.iter().any(|m| line.starts_with(m))
    }
}
