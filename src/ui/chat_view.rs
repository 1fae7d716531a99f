use adw::prelude::*;
use gtk4 as gtk;
use gtk4::{gio, glib};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::api::models::{Message, MessageSender, MessageStatus};
use crate::app::Session;
use crate::composer::Composer;
use crate::session::Mounted;
use crate::store::{list_change, StoreSnapshot};

/// Message list with the composer row underneath.
pub struct ChatView {
    session: Arc<Session>,
    overlay: adw::ToastOverlay,
    root: gtk::Box,
    scroller: gtk::ScrolledWindow,
    /// One `BoxedAnyObject` holding a `Message` per row.
    rows: gio::ListStore,
    /// Last snapshot rendered.
    current: RefCell<StoreSnapshot>,
    earlier_spinner: gtk::Spinner,
    initial_spinner: gtk::Spinner,
    entry: gtk::Entry,
    send_btn: gtk::Button,
    composer: RefCell<Composer>,
    loaded: Cell<bool>,
    live: RefCell<Option<Mounted>>,
    closed: Cell<bool>,
}

impl ChatView {
    pub fn new(session: Arc<Session>, overlay: adw::ToastOverlay) -> Rc<Self> {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let earlier_spinner = gtk::Spinner::new();
        earlier_spinner.set_tooltip_text(Some("Loading previous messages…"));
        earlier_spinner.set_visible(false);
        root.append(&earlier_spinner);

        let initial_spinner = gtk::Spinner::builder()
            .spinning(true)
            .vexpand(true)
            .width_request(48)
            .height_request(48)
            .tooltip_text("Loading messages…")
            .build();
        root.append(&initial_spinner);

        let rows = gio::ListStore::new::<glib::BoxedAnyObject>();
        let factory = gtk::SignalListItemFactory::new();
        let list = gtk::ListView::new(
            Some(gtk::NoSelection::new(Some(rows.clone()))),
            Some(factory.clone()),
        );
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .visible(false)
            .child(&list)
            .build();
        root.append(&scroller);

        // Input row
        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Message text"));
        let send_btn = gtk::Button::with_label("Send");
        send_btn.add_css_class("suggested-action");
        send_btn.set_sensitive(false);
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        let view = Rc::new(Self {
            session,
            overlay,
            root,
            scroller,
            rows,
            current: RefCell::default(),
            earlier_spinner,
            initial_spinner,
            entry,
            send_btn,
            composer: RefCell::new(Composer::new()),
            loaded: Cell::new(false),
            live: RefCell::default(),
            closed: Cell::new(false),
        });
        view.connect_rows(&factory);
        view.connect_signals();
        view.watch_store();
        view
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn toast(&self, text: &str) {
        self.overlay.add_toast(adw::Toast::new(text));
    }

    /// Keep the live feeds for as long as the view is open.
    pub fn attach(&self, mut live: Mounted) {
        if self.closed.get() {
            return;
        }
        if let Some(mut lost) = live.lost_feeds() {
            let overlay = self.overlay.clone();
            glib::spawn_future_local(async move {
                while let Some(feed) = lost.recv().await {
                    let text = format!("Live updates stopped ({})", feed.operation_name());
                    overlay.add_toast(adw::Toast::new(&text));
                }
            });
        }
        self.live.replace(Some(live));
    }

    /// Drop the live feeds. Anything attached later is dropped straight away.
    pub fn detach(&self) {
        self.closed.set(true);
        if let Some(live) = self.live.take() {
            live.unmount();
        }
    }

    fn connect_rows(self: &Rc<Self>, factory: &gtk::SignalListItemFactory) {
        let view = Rc::downgrade(self);
        factory.connect_bind(move |_, obj| {
            let Some(view) = view.upgrade() else { return };
            let Some(item) = obj.downcast_ref::<gtk::ListItem>() else {
                return;
            };
            let Some(boxed) = item.item().and_downcast::<glib::BoxedAnyObject>() else {
                return;
            };
            let message = boxed.borrow::<Message>();
            item.set_child(Some(&view.message_row(&message)));
        });
        factory.connect_unbind(|_, obj| {
            if let Some(item) = obj.downcast_ref::<gtk::ListItem>() {
                item.set_child(gtk::Widget::NONE);
            }
        });
    }

    fn connect_signals(self: &Rc<Self>) {
        self.entry.connect_changed(with_view(self, |view, entry: &gtk::Entry| {
            view.composer.borrow_mut().set_text(entry.text().to_string());
            view.refresh_send_button();
        }));
        self.entry.connect_activate(with_view(self, |view, _: &gtk::Entry| view.submit()));
        self.send_btn.connect_clicked(with_view(self, |view, _: &gtk::Button| view.submit()));

        let view = Rc::downgrade(self);
        self.scroller.connect_edge_reached(move |_, pos| {
            if pos != gtk::PositionType::Top {
                return;
            }
            if let Some(view) = view.upgrade() {
                if view.current.borrow().has_older() {
                    view.load_earlier();
                }
            }
        });

        // Keep loading until the rows overflow the viewport.
        let view = Rc::downgrade(self);
        self.scroller.vadjustment().connect_changed(move |adj| {
            let Some(view) = view.upgrade() else { return };
            if view.current.borrow().wants_older(adj.upper(), adj.page_size()) {
                view.load_earlier();
            }
        });
    }

    fn watch_store(self: &Rc<Self>) {
        let mut rx = self.session.watch();
        let view = Rc::downgrade(self);
        glib::spawn_future_local(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                match view.upgrade() {
                    Some(view) => view.render(&snapshot),
                    None => break,
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    fn load_earlier(&self) {
        let session = self.session.clone();
        crate::utils::spawn_async(async move {
            session.load_earlier().await;
        });
    }

    fn refresh_send_button(&self) {
        let enabled = self.composer.borrow().can_submit(self.loaded.get());
        self.send_btn.set_sensitive(enabled);
    }

    fn submit(&self) {
        let Some(draft) = self.composer.borrow_mut().submit(self.loaded.get()) else {
            return;
        };
        self.entry.set_text("");
        let session = self.session.clone();
        let overlay = self.overlay.clone();
        crate::ui::run_async_to_main(async move { session.send(draft).await }, move |res| {
            if let Err(e) = res {
                overlay.add_toast(adw::Toast::new(&format!("Message not sent: {e}")));
            }
        });
        self.scroll_to_bottom();
    }

    fn retry(&self, temp_id: String) {
        let session = self.session.clone();
        let overlay = self.overlay.clone();
        crate::ui::run_async_to_main(async move { session.retry(&temp_id).await }, move |res| {
            if let Err(e) = res {
                overlay.add_toast(adw::Toast::new(&format!("Message not sent: {e}")));
            }
        });
    }

    fn discard(&self, temp_id: &str) {
        if let Err(e) = self.session.discard(temp_id) {
            self.toast(&e.to_string());
        }
    }

    fn scroll_to_bottom(&self) {
        let adj = self.scroller.vadjustment();
        // Wait for the list to be re-allocated so `upper` is current.
        glib::idle_add_local_once(move || adj.set_value(adj.upper()));
    }

    /// Keep the row that was on screen in place after rows are added above it.
    fn keep_distance_from_bottom(&self, distance: f64) {
        let adj = self.scroller.vadjustment();
        glib::idle_add_local_once(move || adj.set_value(adj.upper() - distance));
    }

    fn render(&self, snapshot: &StoreSnapshot) {
        self.earlier_spinner.set_visible(snapshot.loading_earlier);
        self.earlier_spinner.set_spinning(snapshot.loading_earlier);

        let Some(page) = &snapshot.page else {
            return;
        };
        let first_load = !self.loaded.replace(true);
        self.initial_spinner.set_spinning(false);
        self.initial_spinner.set_visible(false);
        self.scroller.set_visible(true);

        let adj = self.scroller.vadjustment();
        let at_bottom = adj.value() + adj.page_size() >= adj.upper() - 1.0;
        let from_bottom = adj.upper() - adj.value();

        let shown: Vec<Message> = self
            .current
            .borrow()
            .page
            .iter()
            .flat_map(|p| p.messages().cloned())
            .collect();
        let messages: Vec<Message> = page.messages().cloned().collect();
        let change = list_change(&shown, &messages);
        if let Some(change) = &change {
            let added: Vec<glib::BoxedAnyObject> = messages[change.added.clone()]
                .iter()
                .cloned()
                .map(glib::BoxedAnyObject::new)
                .collect();
            self.rows
                .splice(change.position as u32, change.removed as u32, &added);
        }
        self.current.replace(snapshot.clone());

        self.refresh_send_button();
        if first_load || at_bottom {
            self.scroll_to_bottom();
        } else if change.is_some_and(|c| c.is_prepend()) {
            self.keep_distance_from_bottom(from_bottom);
        }
    }

    fn message_row(self: &Rc<Self>, message: &Message) -> gtk::Box {
        let bubble = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        bubble.set_margin_top(4);
        bubble.set_margin_bottom(4);
        bubble.set_margin_start(8);
        bubble.set_margin_end(8);
        let outgoing = message.sender == MessageSender::Admin;
        bubble.set_halign(if outgoing { gtk::Align::End } else { gtk::Align::Start });

        if message.status == MessageStatus::Sending {
            let spinner = gtk::Spinner::new();
            spinner.start();
            spinner.set_tooltip_text(Some("Sending"));
            bubble.append(&spinner);
        }

        let label = gtk::Label::new(Some(&message.text));
        label.set_wrap(true);
        label.set_xalign(0.0);
        label.set_selectable(true);
        if outgoing {
            label.add_css_class("accent");
        }
        if message.status == MessageStatus::Read {
            label.set_tooltip_text(Some("Read"));
        }
        bubble.append(&label);

        if message.status == MessageStatus::Failed {
            label.add_css_class("error");
            let retry = gtk::Button::from_icon_name("view-refresh-symbolic");
            retry.set_tooltip_text(Some("Retry"));
            retry.add_css_class("flat");
            let discard = gtk::Button::from_icon_name("user-trash-symbolic");
            discard.set_tooltip_text(Some("Discard"));
            discard.add_css_class("flat");

            let id = message.id.clone();
            retry.connect_clicked(with_view(self, move |view, _: &gtk::Button| {
                view.retry(id.clone())
            }));
            let id = message.id.clone();
            discard.connect_clicked(with_view(self, move |view, _: &gtk::Button| {
                view.discard(&id)
            }));
            bubble.append(&retry);
            bubble.append(&discard);
        }

        bubble
    }
}

/// Signal handler that holds the view weakly and does nothing once it is gone.
fn with_view<W: 'static>(
    view: &Rc<ChatView>,
    f: impl Fn(&Rc<ChatView>, &W) + 'static,
) -> impl Fn(&W) + 'static {
    let view: Weak<ChatView> = Rc::downgrade(view);
    move |widget| {
        if let Some(view) = view.upgrade() {
            f(&view, widget);
        }
    }
}
