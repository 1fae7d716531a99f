use once_cell::sync::Lazy;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn spawn_async<F>(fut: F) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut)
}

/// Accepts `host:port`, `http://host:port` or a full endpoint URL.
/// Missing scheme defaults to `http`, missing path to `/graphql`.
pub fn normalize_endpoint(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let after_scheme = with_scheme.splitn(2, "://").nth(1).unwrap_or_default();
    if after_scheme.contains('/') {
        with_scheme
    } else {
        format!("{}/graphql", with_scheme)
    }
}
