use adw::prelude::*;
use adw::Application;

static GLIB_LOGGER: glib::GlibLogger = glib::GlibLogger::new(
    glib::GlibLoggerFormat::Plain,
    glib::GlibLoggerDomain::CrateTarget,
);

fn main() -> glib::ExitCode {
    let _ = log::set_logger(&GLIB_LOGGER);
    log::set_max_level(log::LevelFilter::Info);

    let app = Application::builder()
        .application_id("com.example.GqlChat")
        .build();
    app.connect_activate(gqlchat::ui::build_ui);
    app.run()
}
