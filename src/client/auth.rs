use eyre::{Context, Result, eyre};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::path::Path;

/// Static header set sent with every search request
///
/// Loaded once from a JSON credentials file such as
/// ```json
/// {
///     // RapidAPI gateway credentials
///     "X-RapidAPI-Key": "...",
///     "X-RapidAPI-Host": "zillow56.p.rapidapi.com"
/// }
/// ```
/// The file is parsed leniently (comments and trailing commas are allowed).
#[derive(Clone, Default, PartialEq)]
pub struct ApiCredentials {
    headers: BTreeMap<String, String>,
}

impl ApiCredentials {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self { headers }
    }

    /// No authentication headers
    pub fn none() -> Self {
        Self::default()
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse credentials file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let headers: BTreeMap<String, String> = json5::from_str(content)?;
        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }

    /// Convert to a reqwest header map
    ///
    /// # Errors
    /// Returns an error if a header name or value is not valid HTTP
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| eyre!("Invalid header name in credentials: {}", name))?;
            let mut header_value = HeaderValue::from_str(value)
                .map_err(|_| eyre!("Invalid value for header {}", name))?;
            header_value.set_sensitive(true);
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("headers", &self.header_names())
            .finish()
    }
}

impl std::fmt::Display for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.headers.len() {
            0 => write!(f, "None"),
            n => write!(f, "{} header(s)", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_lenient_json() {
        let content = r#"{
            // gateway key
            "X-RapidAPI-Key": "secret",
            "X-RapidAPI-Host": "zillow56.p.rapidapi.com",
        }"#;
        let credentials = ApiCredentials::parse(content).unwrap();
        assert_eq!(credentials.header_names(), vec!["X-RapidAPI-Host", "X-RapidAPI-Key"]);

        let map = credentials.to_header_map().unwrap();
        assert_eq!(map.get("x-rapidapi-key").unwrap(), "secret");
        assert!(map.get("x-rapidapi-key").unwrap().is_sensitive());
    }

    #[test]
    fn test_secrets_not_in_debug() {
        let credentials = ApiCredentials::parse(r#"{"X-RapidAPI-Key": "secret"}"#).unwrap();
        assert!(!format!("{:?}", credentials).contains("secret"));
        assert_eq!(credentials.to_string(), "1 header(s)");
    }

    #[test]
    fn test_rejects_non_string_values() {
        assert!(ApiCredentials::parse(r#"{"X-RapidAPI-Key": 42}"#).is_err());
    }

    #[test]
    fn test_rejects_invalid_header_name() {
        let credentials = ApiCredentials::parse(r#"{"bad header": "x"}"#).unwrap();
        assert!(credentials.to_header_map().is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = ApiCredentials::read(temp.path().join("config_api.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read credentials file"));
    }
}
