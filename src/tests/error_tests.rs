#[cfg(test)]
mod tests {
    use crate::error::{validation, IndexError};
    use std::io;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_index_error_display() {
        let error = IndexError::Config("batch_size must be > 0".to_string());
        assert_eq!(format!("{}", error), "Configuration error: batch_size must be > 0");

        let error = IndexError::InvalidQuery("min_size exceeds max_size".to_string());
        assert_eq!(format!("{}", error), "Invalid query: min_size exceeds max_size");

        let error = IndexError::AlgorithmMismatch { stored: "sha256".into(), configured: "blake3".into() };
        assert_eq!(
            format!("{}", error),
            "Inventory uses checksum algorithm 'sha256', but 'blake3' is configured"
        );
    }

    #[test]
    fn test_fatal_config_classification() {
        assert!(IndexError::Config("x".into()).is_fatal_config());
        assert!(IndexError::InvalidRoot { path: "/nope".into(), reason: "missing".into() }.is_fatal_config());
        assert!(!IndexError::InvalidQuery("x".into()).is_fatal_config());
        assert!(!IndexError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_fatal_config());
    }

    #[test]
    fn test_from_conversions() {
        let err: IndexError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, IndexError::Io(_)));

        let err: IndexError = globset::Glob::new("a[").unwrap_err().into();
        assert!(matches!(err, IndexError::Pattern(_)));

        let err: IndexError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, IndexError::Internal(_)));

        let err: IndexError = ::config::ConfigError::Message("bad".into()).into();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_validate_root_path() {
        let dir = TempDir::new().unwrap();
        let canonical = validation::validate_root_path(dir.path()).unwrap();
        assert!(canonical.is_absolute());

        // Relative segments resolve to the same absolute root.
        let dotted = dir.path().join("sub").join("..");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert_eq!(validation::validate_root_path(&dotted).unwrap(), canonical);

        assert!(validation::validate_root_path(Path::new("")).is_err());
        assert!(validation::validate_root_path(&dir.path().join("missing")).is_err());

        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = validation::validate_root_path(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_validate_size_range() {
        assert!(validation::validate_size_range(None, None).is_ok());
        assert!(validation::validate_size_range(Some(10), None).is_ok());
        assert!(validation::validate_size_range(Some(10), Some(10)).is_ok());
        assert!(validation::validate_size_range(Some(11), Some(10)).is_err());
    }
}
