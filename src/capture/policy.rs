use regex::Regex;
use url::Url;

/// Decides which URLs may be captured.
///
/// Only web and file pages are eligible; anything matching one of the
/// exclusion patterns is never captured.
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    excluded: Vec<Regex>,
}

impl CapturePolicy {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let excluded = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { excluded })
    }

    pub fn allows(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return false;
        }

        !self.excluded.iter().any(|re| re.is_match(url))
    }
}
