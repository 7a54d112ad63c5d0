//! Native filter boundary.
//!
//! The actual edge-detection implementation is a collaborator behind the
//! [`Filter`] trait; the [`FilterGateway`] owns the call contract: fail
//! closed while the backend is initializing, contain panics from external
//! code, and reject output that breaks the same-byte-layout guarantee.

pub mod edge;

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{error, warn};

use crate::error::FilterError;

pub use edge::SobelEdgeFilter;

/// External filtering capability: `filter(bytes, width, height) -> bytes`.
/// Output must have the same byte layout as the input (pixel values change,
/// format does not).
pub trait Filter {
    fn is_ready(&self) -> bool;

    fn apply(&self, frame: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FilterError>;
}

/// Synchronous call boundary to the external filter. Owns no state beyond
/// the boxed backend.
pub struct FilterGateway {
    inner: Box<dyn Filter + Send>,
}

impl FilterGateway {
    pub fn new(inner: Box<dyn Filter + Send>) -> Self {
        Self { inner }
    }

    /// Run the filter over one packed frame.
    ///
    /// Never lets a backend failure escape as anything but a [`FilterError`];
    /// the caller decides the fallback (pass the unfiltered frame through).
    pub fn apply(&self, frame: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FilterError> {
        if !self.inner.is_ready() {
            return Err(FilterError::Unavailable);
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.apply(frame, width, height)
        }));

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("filter failed: {}", e);
                return Err(e);
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("filter panicked: {}", msg);
                return Err(FilterError::Failed(msg));
            }
        };

        if output.is_empty() || output.len() != frame.len() {
            return Err(FilterError::BadOutput {
                expected: frame.len(),
                got: output.len(),
            });
        }

        metrics::histogram!("filter_time_us").record(started.elapsed().as_micros() as f64);
        Ok(output)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdentityFilter;

    impl Filter for IdentityFilter {
        fn is_ready(&self) -> bool {
            true
        }

        fn apply(&self, frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            Ok(frame.to_vec())
        }
    }

    struct NotReadyFilter;

    impl Filter for NotReadyFilter {
        fn is_ready(&self) -> bool {
            false
        }

        fn apply(&self, _frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            unreachable!("gateway must not call an unready filter")
        }
    }

    struct PanickingFilter;

    impl Filter for PanickingFilter {
        fn is_ready(&self) -> bool {
            true
        }

        fn apply(&self, _frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            panic!("backend exploded");
        }
    }

    struct TruncatingFilter;

    impl Filter for TruncatingFilter {
        fn is_ready(&self) -> bool {
            true
        }

        fn apply(&self, frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            Ok(frame[..frame.len() / 2].to_vec())
        }
    }

    #[test]
    fn identity_passes_through() {
        let gateway = FilterGateway::new(Box::new(IdentityFilter));
        let input = vec![1u8, 2, 3, 4];
        assert_eq!(gateway.apply(&input, 2, 1).unwrap(), input);
    }

    #[test]
    fn unready_backend_fails_closed() {
        let gateway = FilterGateway::new(Box::new(NotReadyFilter));
        let err = gateway.apply(&[0u8; 4], 2, 1).unwrap_err();
        assert_eq!(err, FilterError::Unavailable);
    }

    #[test]
    fn panic_is_contained() {
        let gateway = FilterGateway::new(Box::new(PanickingFilter));
        let err = gateway.apply(&[0u8; 4], 2, 1).unwrap_err();
        assert!(matches!(err, FilterError::Failed(msg) if msg.contains("exploded")));
    }

    #[test]
    fn size_changing_output_is_rejected() {
        let gateway = FilterGateway::new(Box::new(TruncatingFilter));
        let err = gateway.apply(&[0u8; 8], 2, 2).unwrap_err();
        assert_eq!(
            err,
            FilterError::BadOutput {
                expected: 8,
                got: 4
            }
        );
    }

    #[test]
    fn empty_output_is_rejected() {
        struct EmptyFilter;
        impl Filter for EmptyFilter {
            fn is_ready(&self) -> bool {
                true
            }
            fn apply(&self, _f: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
                Ok(Vec::new())
            }
        }
        let gateway = FilterGateway::new(Box::new(EmptyFilter));
        assert!(matches!(
            gateway.apply(&[0u8; 4], 2, 1),
            Err(FilterError::BadOutput { .. })
        ));
    }
}
