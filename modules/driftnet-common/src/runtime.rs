use std::env;
use std::path::Path;

/// Environment variables that mark a constrained serverless runtime.
const CONSTRAINED_ENV_MARKERS: &[&str] = &[
    "AWS_LAMBDA_FUNCTION_NAME",
    "AWS_EXECUTION_ENV",
    "LAMBDA_TASK_ROOT",
    "AWS_LAMBDA_RUNTIME_API",
];

/// Working directories that only exist inside constrained runtimes.
const CONSTRAINED_CWD: &[&str] = &["/var/task"];

/// Where the process is running. Computed once at startup and passed
/// explicitly to the components that change behaviour on it, instead of
/// sniffing environment variables at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeProfile {
    /// Constrained runtimes have ephemeral disk and have shown in-memory
    /// corruption of large binary payloads on direct uploads; the object
    /// store must use the spooled upload path.
    pub constrained: bool,
}

impl RuntimeProfile {
    /// Detect from environment markers and the working directory.
    pub fn detect() -> Self {
        let env_marker = CONSTRAINED_ENV_MARKERS
            .iter()
            .any(|key| env::var_os(key).is_some());
        let cwd_marker = env::current_dir()
            .map(|cwd| CONSTRAINED_CWD.iter().any(|p| cwd == Path::new(p)))
            .unwrap_or(false);
        let profile = Self {
            constrained: env_marker || cwd_marker,
        };
        if profile.constrained {
            tracing::info!("Constrained runtime detected; spooled uploads enforced");
        }
        profile
    }

    /// Unconstrained profile, for hosts with stable local disk.
    pub fn standard() -> Self {
        Self { constrained: false }
    }

    /// Constrained profile, for tests and forced spooling.
    pub fn constrained() -> Self {
        Self { constrained: true }
    }
}
