use thiserror::Error;

/// One processor's failure within a dispatch.
#[derive(Debug)]
pub struct ProcessorFailure {
    pub processor: String,
    pub error: anyhow::Error,
}

/// Aggregate failure surface of a dispatch or flush.
///
/// Carries every failing processor from the operation, in registry order,
/// without short-circuiting the processors that succeeded. Callers inspect
/// `failures` for the underlying causes.
#[derive(Debug, Error)]
pub struct DispatchError {
    pub failures: Vec<ProcessorFailure>,
}

impl DispatchError {
    pub fn new(failures: Vec<ProcessorFailure>) -> Self {
        Self { failures }
    }

    /// Flatten several dispatch results into one aggregate; `Ok` when no
    /// dispatch failed.
    pub fn merge(errors: impl IntoIterator<Item = DispatchError>) -> Result<(), DispatchError> {
        let failures: Vec<ProcessorFailure> =
            errors.into_iter().flat_map(|e| e.failures).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::new(failures))
        }
    }

    pub fn processor_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.processor.as_str()).collect()
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} processor(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {:#}", failure.processor, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_empty_is_ok() {
        assert!(DispatchError::merge(Vec::new()).is_ok());
    }

    #[test]
    fn test_merge_flattens_in_order() {
        let first = DispatchError::new(vec![ProcessorFailure {
            processor: "a".to_string(),
            error: anyhow::anyhow!("e1"),
        }]);
        let second = DispatchError::new(vec![ProcessorFailure {
            processor: "b".to_string(),
            error: anyhow::anyhow!("e2"),
        }]);

        let merged = DispatchError::merge([first, second]).unwrap_err();
        assert_eq!(merged.processor_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_display_enumerates_failures() {
        let err = DispatchError::new(vec![ProcessorFailure {
            processor: "webhook".to_string(),
            error: anyhow::anyhow!("connection refused"),
        }]);
        let rendered = err.to_string();
        assert!(rendered.contains("1 processor(s) failed"));
        assert!(rendered.contains("webhook"));
        assert!(rendered.contains("connection refused"));
    }
}
