use crate::error::AppError;
use tracing::debug;

/// Parses `Name: value` (or `Name=value`) header arguments.
///
/// The first `:` splits name from value; `=` is accepted when no `:` is
/// present. Empty names are rejected.
pub fn parse_headers(headers: &[String]) -> Result<Vec<(String, String)>, AppError> {
    headers
        .iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .or_else(|| header.split_once('='))
                .ok_or_else(|| AppError::InvalidInput(format!("Invalid header format: {header}")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "Header without a name: {header}"
                )));
            }
            debug!("Added header: {name}");
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let parsed = parse_headers(&[
            "Cookie: session=abc".to_string(),
            "X-Token=t".to_string(),
            "Origin:https://site.test".to_string(),
        ])
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("Cookie".to_string(), "session=abc".to_string()),
                ("X-Token".to_string(), "t".to_string()),
                ("Origin".to_string(), "https://site.test".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_headers_rejects_malformed() {
        assert!(parse_headers(&["no-separator".to_string()]).is_err());
        assert!(parse_headers(&[": value".to_string()]).is_err());
    }
}
