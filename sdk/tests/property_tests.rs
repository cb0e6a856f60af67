use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};
use sdk::executor::{ExecutionOutcome, FileEdit};
use sdk::git::filter_diff;

// Property: every error carries a non-empty, path-free user hint.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "\\PC*") {
        let errs = vec![
            EngineError::Validation(detail.clone()),
            EngineError::ClaimConflict(detail.clone()),
            EngineError::UnitNotFound(detail.clone()),
            EngineError::Executor(detail.clone()),
            EngineError::Storage(detail.clone()),
            EngineError::Isolation(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            // Hints are static strings; the raw detail never leaks into them.
            prop_assert!(!hint.contains('/') || !detail.contains('/'));
        }
    }
}

// Property: only validation errors abort the run.
proptest! {
    #[test]
    fn test_unit_scoped_errors_never_run_fatal(detail in "\\PC*", secs in 0u64..100_000) {
        prop_assert!(EngineError::Validation(detail.clone()).is_run_fatal());
        prop_assert!(!EngineError::ClaimConflict(detail.clone()).is_run_fatal());
        prop_assert!(!EngineError::Executor(detail.clone()).is_run_fatal());
        prop_assert!(!EngineError::ExecutorTimeout(secs).is_run_fatal());
        prop_assert!(!EngineError::Storage(detail.clone()).is_run_fatal());
        prop_assert!(!EngineError::Isolation(detail).is_run_fatal());
    }
}

// Property: executor outcomes survive a JSON round-trip unchanged.
proptest! {
    #[test]
    fn test_outcome_roundtrip(
        success in any::<bool>(),
        summary in "[a-zA-Z0-9 .,-]{0,120}",
        path in "[a-z0-9/_.-]{1,60}",
        content in "\\PC{0,200}",
    ) {
        let outcome = ExecutionOutcome {
            success,
            changes: vec![FileEdit::new(path.clone(), content.clone())],
            summary: summary.clone(),
            error: if success { None } else { Some("boom".to_string()) },
        };

        let json = serde_json::to_string(&outcome).expect("serialize");
        let back: ExecutionOutcome = serde_json::from_str(&json).expect("deserialize");

        prop_assert_eq!(back.success, success);
        prop_assert_eq!(back.summary, summary);
        prop_assert_eq!(back.changes.len(), 1);
        prop_assert_eq!(&back.changes[0].path, &path);
        prop_assert_eq!(&back.changes[0].content, &content);
    }
}

// Property: diff filtering never invents content and is idempotent.
proptest! {
    #[test]
    fn test_filter_diff_idempotent(body in "[ -~\\n]{0,400}") {
        let diff = format!("diff --git a/src/x.rs b/src/x.rs\n{body}");
        let once = filter_diff(&diff);
        let twice = filter_diff(&once);
        prop_assert_eq!(once, twice);
    }
}
