pub mod chat_view;
pub mod main_window;

use adw::Application;
use gtk4::glib;
use log::error;

use crate::app::AppConfig;

pub fn build_ui(app: &Application) {
    let config = AppConfig::load();
    match crate::app::init(&config) {
        Ok(session) => main_window::show_main_window(app, session),
        Err(e) => {
            error!("cannot start chat against {}: {e}", config.endpoint);
            main_window::show_startup_error(app, &e.to_string());
        }
    }
}

/// Run `fut` on the tokio runtime and hand its output to `on_done` on the GTK main loop.
pub fn run_async_to_main<T, Fut, F>(fut: Fut, on_done: F)
where
    T: Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    F: FnOnce(T) + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    crate::utils::spawn_async(async move {
        let _ = tx.send(fut.await);
    });
    glib::spawn_future_local(async move {
        if let Ok(value) = rx.await {
            on_done(value);
        }
    });
}
