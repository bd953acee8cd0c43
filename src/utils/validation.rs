//! Common validation utilities shared across modules

/// Validate that a port number is in valid range (1-65535)
pub fn validate_port_range(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("Port must be between 1 and 65535".to_string());
    }
    Ok(())
}

/// Check if a string is empty or only whitespace
pub fn is_empty_or_whitespace(s: &str) -> bool {
    s.trim().is_empty()
}

/// Require a non-blank value, naming the field in the error
pub fn require_non_blank(field: &str, value: &str) -> Result<(), String> {
    if is_empty_or_whitespace(value) {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port_range_valid() {
        assert!(validate_port_range(1).is_ok());
        assert!(validate_port_range(80).is_ok());
        assert!(validate_port_range(443).is_ok());
        assert!(validate_port_range(8080).is_ok());
        assert!(validate_port_range(65535).is_ok());
    }

    #[test]
    fn test_validate_port_range_invalid() {
        assert!(validate_port_range(0).is_err());
        assert_eq!(validate_port_range(0).unwrap_err(), "Port must be between 1 and 65535");
    }

    #[test]
    fn test_is_empty_or_whitespace() {
        assert!(is_empty_or_whitespace(""));
        assert!(is_empty_or_whitespace("   "));
        assert!(is_empty_or_whitespace("\t"));
        assert!(is_empty_or_whitespace("  \t\n  "));
        assert!(!is_empty_or_whitespace("hello"));
        assert!(!is_empty_or_whitespace("  hello  "));
    }

    #[test]
    fn test_require_non_blank() {
        assert!(require_non_blank("host", "example.com").is_ok());
        assert_eq!(require_non_blank("host", " ").unwrap_err(), "host must not be empty");
    }
}
