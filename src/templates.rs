//! Tera template engine initialization and shared render context.
//!
//! Three named views are required: `index.html`, `bad_state.html`, and
//! `internal_error.html`, all extending `base.html` from the configured
//! asset directory.

use tera::Tera;

use crate::config::UiConfig;

/// Initialize the Tera template engine from the asset directory glob.
pub fn init_templates(template_glob: &str) -> Result<Tera, tera::Error> {
    Tera::new(template_glob)
}

/// Base render context shared by all views: the UI configuration under
/// the `config` key.
pub fn base_context(ui: &UiConfig) -> tera::Context {
    let mut context = tera::Context::new();
    context.insert("config", ui);
    context
}
