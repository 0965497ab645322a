//! Exercises of the protected-block protocol through the public API.

use faultline_runtime::{
    depth, last_diagnostic, last_fault, protect, raise, raise_with, registry, FaultCode, MAX_DEPTH,
};

const METRIC_REJECTED: FaultCode = FaultCode::user(0);
const MEASURE_REJECTED: FaultCode = FaultCode::user(1);

/// Collaborator vocabulary: codes above USER_BASE, named once at startup,
/// dispatched like any built-in.
#[test]
fn test_collaborator_codes_round_trip() {
    registry::install(&[
        (METRIC_REJECTED, "metric-rejected"),
        (MEASURE_REJECTED, "measure-rejected"),
    ])
    .unwrap();

    let message = protect(|| {
        raise_with(METRIC_REJECTED, "metric has no unit");
    })
    .catch_any(&[METRIC_REJECTED, MEASURE_REJECTED], |fault| fault.to_string())
    .run();

    assert_eq!(message, "metric-rejected: metric has no unit");
    assert_eq!(last_fault(), Some(METRIC_REJECTED));
}

#[test]
fn test_fault_climbs_through_three_levels() {
    let caught_at = protect(|| {
        protect(|| {
            protect(|| {
                raise(FaultCode::REQUEST_SETUP_FAILURE);
            })
            // Unrelated clause: the inner fallback reports and re-raises.
            .catch(FaultCode::OPEN_FAILURE, |_| 1)
            .run()
        })
        .catch(FaultCode::MALFORMED_RESPONSE, |_| 2)
        .run()
    })
    .catch(FaultCode::REQUEST_SETUP_FAILURE, |_| 3)
    .run();

    assert_eq!(caught_at, 3);
    assert_eq!(depth(), 0);
}

#[test]
fn test_nesting_below_the_guard_is_free() {
    fn nest(levels: usize) -> usize {
        if levels == 0 {
            return depth();
        }
        protect(|| nest(levels - 1)).run()
    }

    // One level is held by nothing here, so MAX_DEPTH blocks all fit.
    let deepest = nest(MAX_DEPTH);
    assert_eq!(deepest, MAX_DEPTH);
    assert_eq!(depth(), 0);
}

#[test]
fn test_diagnostic_visible_to_catch_all() {
    protect(|| {
        raise_with(
            FaultCode::REQUEST_EXECUTION_FAILURE,
            "connection refused by 127.0.0.1:8080",
        );
    })
    .catch_all(|fault| {
        assert_eq!(fault.code, FaultCode::REQUEST_EXECUTION_FAILURE);
        assert_eq!(
            fault.diagnostic.as_deref(),
            Some("connection refused by 127.0.0.1:8080")
        );
    })
    .run();
    assert_eq!(
        last_diagnostic().as_deref(),
        Some("connection refused by 127.0.0.1:8080")
    );
}
