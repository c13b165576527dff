//! Stable exit codes for autoloop CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, unreadable state, or any other error.
pub const INVALID: i32 = 1;
/// The configured engine could not be resolved to an executable.
pub const ENGINE_NOT_FOUND: i32 = 2;
/// The referenced idea does not exist.
pub const NOT_FOUND: i32 = 3;
/// The idea exists but is no longer pending.
pub const NOT_PENDING: i32 = 4;
/// Another `autoloop run` holds this project's loop lock.
pub const ALREADY_RUNNING: i32 = 5;
/// A second termination signal arrived while a cycle was still running.
pub const INTERRUPTED: i32 = 130;

/// Exit code for an error surfaced at the CLI boundary.
pub fn for_error(err: &anyhow::Error) -> i32 {
    use crate::io::engine::EngineNotFound;
    use crate::io::ideas::IdeaError;
    use crate::io::instance::AlreadyRunning;

    if err.downcast_ref::<EngineNotFound>().is_some() {
        return ENGINE_NOT_FOUND;
    }
    if err.downcast_ref::<AlreadyRunning>().is_some() {
        return ALREADY_RUNNING;
    }
    match err.downcast_ref::<IdeaError>() {
        Some(IdeaError::NotFound(_)) => NOT_FOUND,
        Some(IdeaError::NotPending { .. }) => NOT_PENDING,
        _ => INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ideas::IdeaStatus;
    use crate::io::engine::EngineNotFound;
    use crate::io::ideas::IdeaError;
    use crate::io::instance::AlreadyRunning;

    #[test]
    fn typed_errors_map_to_codes() {
        let engine = anyhow::Error::new(EngineNotFound {
            engine: "codex".into(),
        });
        assert_eq!(for_error(&engine), ENGINE_NOT_FOUND);

        let missing = anyhow::Error::new(IdeaError::NotFound("1".into()));
        assert_eq!(for_error(&missing.context("approve")), NOT_FOUND);

        let done = anyhow::Error::new(IdeaError::NotPending {
            id: "1".into(),
            status: IdeaStatus::Rejected,
        });
        assert_eq!(for_error(&done), NOT_PENDING);

        let running = anyhow::Error::new(AlreadyRunning { pid: Some(42) });
        assert_eq!(for_error(&running), ALREADY_RUNNING);

        assert_eq!(for_error(&anyhow::anyhow!("bad config")), INVALID);
        assert_eq!(for_error(&IdeaError::EmptyText.into()), INVALID);
    }
}
