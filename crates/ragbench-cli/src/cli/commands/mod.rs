pub mod bench;
pub mod dispatch;
pub mod judge;

pub use dispatch::dispatch;

use crate::cli::args::BackendArgs;
use ragbench_core::BackendConfig;

/// Flags win over the config file.
pub(crate) fn apply_backend_overrides(backend: &mut BackendConfig, args: &BackendArgs) {
    if let Some(provider) = &args.backend {
        backend.provider = provider.clone();
    }
    if let Some(url) = &args.base_url {
        backend.base_url = url.clone();
    }
    if let Some(t) = args.request_timeout {
        backend.request_timeout_s = t;
    }
    if let Some(n) = args.max_attempts {
        backend.max_attempts = n;
    }
}
