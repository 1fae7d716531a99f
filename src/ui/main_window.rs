use adw::prelude::*;
use adw::Application;
use gtk4::glib;
use log::{info, warn};
use std::sync::Arc;

use crate::app::Session;
use crate::ui::chat_view::ChatView;

fn window_shell(app: &Application, child: &impl IsA<gtk4::Widget>) -> adw::ApplicationWindow {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Chat")
        .default_width(480)
        .default_height(720)
        .build();

    let container = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let title = gtk4::Label::new(Some("Chat"));
    header.set_title_widget(Some(&title));
    container.append(&header);
    container.append(child);
    window.set_content(Some(&container));
    window
}

pub fn show_main_window(app: &Application, session: Arc<Session>) {
    let overlay = adw::ToastOverlay::new();
    overlay.set_vexpand(true);
    let chat = ChatView::new(session.clone(), overlay.clone());
    overlay.set_child(Some(&chat.widget()));

    let window = window_shell(app, &overlay);
    window.present();

    match session.restore_cached() {
        Ok(true) => info!("showing cached messages until the server answers"),
        Ok(false) => {}
        Err(e) => warn!("could not read message cache: {e}"),
    }

    // Subscribe before fetching so nothing posted in between is missed.
    {
        let session = session.clone();
        let chat = chat.clone();
        crate::ui::run_async_to_main(
            {
                let session = session.clone();
                async move { session.mount().await }
            },
            move |live| {
                match live {
                    Ok(handle) => chat.attach(handle),
                    Err(e) => chat.toast(&format!("Live updates unavailable: {e}")),
                }
                crate::ui::run_async_to_main(
                    async move { session.load_initial().await },
                    move |loaded| {
                        if let Err(e) = loaded {
                            chat.toast(&format!("Failed to load messages: {e}"));
                        }
                    },
                );
            },
        );
    }

    window.connect_close_request(move |_| {
        chat.detach();
        if let Err(e) = session.persist() {
            warn!("could not cache messages: {e}");
        }
        glib::Propagation::Proceed
    });
}

pub fn show_startup_error(app: &Application, message: &str) {
    let status = adw::StatusPage::builder()
        .icon_name("dialog-error-symbolic")
        .title("Cannot start chat")
        .description(message)
        .vexpand(true)
        .build();
    window_shell(app, &status).present();
}
